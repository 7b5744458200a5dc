//! Slicing criteria
//!
//! Syntax: `Class.method[:line][(occurrence)][:variables]`. `variables` is
//! `*` for every value used at the location, a local variable name, or a set
//! `{a,b}`. Without variables only the location's control dependences are
//! followed. Occurrences count executions of the location, starting at 1.

use crate::bytecode::{MethodId, Program};
use crate::error::{Error, Result};
use crate::trace::InstructionInstance;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

static CRITERION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<class>[\w$/.]+)\.(?P<method>[\w$<>]+)(?::(?P<line>\d+))?(?:\((?P<occurrence>\d+)\))?(?::(?P<variables>\*|\{[^{}]*\}|[\w$]+))?$",
    )
    .unwrap()
});

/// Which values at the location start the slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableSpec {
    /// Only why the location executed
    ControlOnly,
    /// Every value the location reads
    AllData,
    /// The final values of these local variables
    Named(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlicingCriterion {
    pub class_name: String,
    pub method_name: String,
    pub line: Option<u32>,
    pub occurrence: Option<u64>,
    pub variables: VariableSpec,
}

impl SlicingCriterion {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let invalid = |message: &str| Error::InvalidCriterion {
            criterion: text.to_string(),
            message: message.to_string(),
        };

        let captures = CRITERION_REGEX
            .captures(text)
            .ok_or_else(|| invalid("malformed criterion"))?;

        let line = match captures.name("line") {
            Some(line) => Some(
                line.as_str()
                    .parse::<u32>()
                    .map_err(|_| invalid("line number out of range"))?,
            ),
            None => None,
        };
        let occurrence = match captures.name("occurrence") {
            Some(occurrence) => {
                let occurrence = occurrence
                    .as_str()
                    .parse::<u64>()
                    .map_err(|_| invalid("occurrence out of range"))?;
                if occurrence == 0 {
                    return Err(invalid("occurrences start at 1"));
                }
                Some(occurrence)
            }
            None => None,
        };
        let variables = match captures.name("variables").map(|m| m.as_str()) {
            None => VariableSpec::ControlOnly,
            Some("*") => VariableSpec::AllData,
            Some(set) if set.starts_with('{') => {
                let names: Vec<String> = set[1..set.len() - 1]
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect();
                if names.is_empty() {
                    return Err(invalid("empty variable set"));
                }
                VariableSpec::Named(names)
            }
            Some(name) => VariableSpec::Named(vec![name.to_string()]),
        };

        Ok(Self {
            class_name: captures["class"].to_string(),
            method_name: captures["method"].to_string(),
            line,
            occurrence,
            variables,
        })
    }

    /// Parse criteria separated by `;`
    pub fn parse_all(text: &str) -> Result<Vec<Self>> {
        text.split(';')
            .filter(|part| !part.trim().is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Resolve the criterion against `program`
    pub fn instance<'p>(&self, program: &'p Program) -> Result<CriterionInstance<'p>> {
        let invalid = |message: String| Error::InvalidCriterion {
            criterion: self.to_string(),
            message,
        };

        let methods: Vec<_> = program
            .find_methods(&self.class_name, &self.method_name)
            .collect();
        if methods.is_empty() {
            return Err(invalid(format!(
                "no method {}.{} in the program",
                self.class_name, self.method_name
            )));
        }

        if let Some(line) = self.line {
            let has_line = methods
                .iter()
                .any(|method| method.instructions.iter().any(|i| i.line == line));
            if !has_line {
                return Err(invalid(format!("no instruction on line {}", line)));
            }
        }

        let mut local_slots = HashMap::new();
        if let VariableSpec::Named(names) = &self.variables {
            for name in names {
                if !methods.iter().any(|method| method.local_slot(name).is_some()) {
                    return Err(invalid(format!("unknown local variable '{}'", name)));
                }
            }
            for method in &methods {
                let mut slots: Vec<usize> = names
                    .iter()
                    .filter_map(|name| method.local_slot(name))
                    .collect();
                slots.sort_unstable();
                slots.dedup();
                local_slots.insert(method.id, slots);
            }
        }

        Ok(CriterionInstance {
            program,
            criterion: self.clone(),
            methods: methods.iter().map(|method| method.id).collect(),
            local_slots,
            run: None,
        })
    }
}

impl FromStr for SlicingCriterion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for SlicingCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class_name, self.method_name)?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
        }
        if let Some(occurrence) = self.occurrence {
            write!(f, "({})", occurrence)?;
        }
        match &self.variables {
            VariableSpec::ControlOnly => Ok(()),
            VariableSpec::AllData => write!(f, ":*"),
            VariableSpec::Named(names) if names.len() == 1 => write!(f, ":{}", names[0]),
            VariableSpec::Named(names) => write!(f, ":{{{}}}", names.join(",")),
        }
    }
}

/// Outcome of testing one instance against a criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriterionMatch {
    No,
    /// First instance (in walk order) of a run of matching instances
    RunStart,
    RunContinued,
}

impl CriterionMatch {
    pub fn matched(self) -> bool {
        self != CriterionMatch::No
    }
}

/// A consecutive stretch of instances at the criterion location
#[derive(Debug, Clone, Copy)]
struct Run {
    depth: usize,
    frame: u64,
    selected: bool,
}

/// A criterion resolved against a program, matched during one backward walk
#[derive(Debug, Clone)]
pub struct CriterionInstance<'p> {
    program: &'p Program,
    criterion: SlicingCriterion,
    methods: Vec<MethodId>,
    local_slots: HashMap<MethodId, Vec<usize>>,
    run: Option<Run>,
}

impl CriterionInstance<'_> {
    pub fn criterion(&self) -> &SlicingCriterion {
        &self.criterion
    }

    pub fn match_all_data(&self) -> bool {
        self.criterion.variables == VariableSpec::AllData
    }

    pub fn has_local_variables(&self) -> bool {
        matches!(self.criterion.variables, VariableSpec::Named(_))
    }

    /// Slots of the named variables in `method`
    pub fn local_variables(&self, method: MethodId) -> &[usize] {
        self.local_slots
            .get(&method)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn occurrence_number(&self) -> Option<u64> {
        self.criterion.occurrence
    }

    fn at_location(&self, instance: &InstructionInstance) -> Result<bool> {
        if !self.methods.contains(&instance.method) {
            return Ok(false);
        }
        match self.criterion.line {
            Some(line) => Ok(self.program.instruction(instance.method, instance.index)?.line == line),
            None => Ok(true),
        }
    }

    /// Test the next instance of the backward walk
    ///
    /// Instances in calls made from the location neither match nor end the
    /// current run.
    pub fn matches(&mut self, instance: &InstructionInstance) -> Result<CriterionMatch> {
        let at_location = self.at_location(instance)?;

        if let Some(run) = self.run {
            if instance.stack_depth > run.depth {
                return Ok(CriterionMatch::No);
            }
            if at_location && instance.stack_depth == run.depth && instance.frame == run.frame {
                return Ok(if run.selected {
                    CriterionMatch::RunContinued
                } else {
                    CriterionMatch::No
                });
            }
            self.run = None;
        }

        if !at_location {
            return Ok(CriterionMatch::No);
        }
        let selected = self
            .criterion
            .occurrence
            .map_or(true, |occurrence| occurrence == instance.occurrence);
        self.run = Some(Run {
            depth: instance.stack_depth,
            frame: instance.frame,
            selected,
        });
        Ok(if selected {
            CriterionMatch::RunStart
        } else {
            CriterionMatch::No
        })
    }
}
