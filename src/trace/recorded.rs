//! In-memory recorded traces and the JSON trace bundle

use super::{BackwardTrace, InstanceInfo, InstructionInstance};
use crate::bytecode::{InstructionIndex, MethodId, Program};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// One executed instruction, in forward order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub method: MethodId,
    pub index: InstructionIndex,
    pub depth: usize,
    #[serde(default)]
    pub info: InstanceInfo,
}

/// A forward-ordered trace held in memory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedTrace {
    /// Methods live on the stack when recording stopped, outermost first
    #[serde(default)]
    initial_stack: Vec<MethodId>,
    records: Vec<TraceRecord>,
}

impl RecordedTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_stack(mut self, methods: Vec<MethodId>) -> Self {
        self.initial_stack = methods;
        self
    }

    pub fn initial_stack(&self) -> &[MethodId] {
        &self.initial_stack
    }

    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append an executed instruction without dynamic information
    pub fn push(&mut self, method: MethodId, index: InstructionIndex, depth: usize) -> &mut Self {
        self.push_with_info(method, index, depth, InstanceInfo::None)
    }

    pub fn push_with_info(
        &mut self,
        method: MethodId,
        index: InstructionIndex,
        depth: usize,
        info: InstanceInfo,
    ) -> &mut Self {
        self.records.push(TraceRecord {
            method,
            index,
            depth,
            info,
        });
        self
    }

    /// Check that every record refers to an instruction of `program`
    pub fn validate(&self, program: &Program) -> Result<()> {
        for method in &self.initial_stack {
            program.method(*method)?;
        }
        for (position, record) in self.records.iter().enumerate() {
            program.instruction(record.method, record.index)?;
            if record.depth == 0 {
                return Err(Error::trace(format!(
                    "record {} has stack depth 0",
                    position
                )));
            }
        }
        Ok(())
    }

    /// Walk the trace from the last executed instruction to the first
    pub fn backward(&self) -> BackwardRecords<'_> {
        BackwardRecords::new(self)
    }
}

/// Backward iterator over a [`RecordedTrace`]
#[derive(Debug, Clone)]
pub struct BackwardRecords<'a> {
    records: &'a [TraceRecord],
    initial_stack: &'a [MethodId],
    /// Forward occurrence number of each record
    occurrences: Vec<u64>,
    remaining: usize,
}

impl<'a> BackwardRecords<'a> {
    fn new(trace: &'a RecordedTrace) -> Self {
        let mut counts: HashMap<(MethodId, InstructionIndex), u64> = HashMap::new();
        let occurrences = trace
            .records
            .iter()
            .map(|record| {
                let count = counts.entry((record.method, record.index)).or_insert(0);
                *count += 1;
                *count
            })
            .collect();

        Self {
            records: &trace.records,
            initial_stack: &trace.initial_stack,
            occurrences,
            remaining: trace.records.len(),
        }
    }
}

impl Iterator for BackwardRecords<'_> {
    type Item = Result<InstructionInstance>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let position = self.remaining;
        let record = &self.records[position];
        if record.depth == 0 {
            return Some(Err(Error::trace(format!(
                "record {} has stack depth 0",
                position
            ))));
        }

        Some(Ok(InstructionInstance {
            method: record.method,
            index: record.index,
            stack_depth: record.depth,
            instance_nr: (self.records.len() - 1 - position) as u64,
            occurrence: self.occurrences[position],
            frame: 0,
            info: record.info,
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl BackwardTrace for BackwardRecords<'_> {
    fn initial_stack_methods(&self) -> Vec<MethodId> {
        self.initial_stack.to_vec()
    }

    fn percentage_done(&self) -> f64 {
        if self.records.is_empty() {
            return 100.0;
        }
        let done = self.records.len() - self.remaining;
        100.0 * done as f64 / self.records.len() as f64
    }
}

/// Program and trace stored together, as read by the command line tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceBundle {
    pub program: Program,
    pub trace: RecordedTrace,
}

impl TraceBundle {
    pub fn new(program: Program, trace: RecordedTrace) -> Self {
        Self { program, trace }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let bundle: TraceBundle = serde_json::from_str(json)?;
        bundle.trace.validate(&bundle.program)?;
        Ok(bundle)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read and validate a bundle file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)
            .map_err(|e| Error::Io(format!("Failed to write {}: {}", path.display(), e)))
    }
}
