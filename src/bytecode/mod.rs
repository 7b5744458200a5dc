//! Static bytecode model
//!
//! Methods, their instructions and exception tables, as consumed by the
//! control flow analysis and the backward trace walk. Every method starts with
//! a method-entry label and ends with an abnormal-termination label; both are
//! executed (and therefore traced) like ordinary instructions.

pub mod builder;
pub mod descriptor;
pub mod instruction;
pub mod instruction_types;

pub use builder::{Label, MethodBuilder, ProgramBuilder};
pub use descriptor::MethodDescriptor;
pub use instruction::{
    Instruction, InstructionKind, InvokeKind, JumpCondition, LabelKind, MethodRef, StackOp,
};
pub use instruction_types::{FieldId, InstructionIndex, MethodId};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Protected range `[start, end)` and the entry label of its handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionHandler {
    pub start: InstructionIndex,
    pub end: InstructionIndex,
    pub handler: InstructionIndex,
}

impl ExceptionHandler {
    pub fn covers(&self, index: InstructionIndex) -> bool {
        self.start <= index && index < self.end
    }
}

/// Debug name of a local variable slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVariableInfo {
    pub slot: usize,
    pub name: String,
}

/// Static field reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl FieldRef {
    pub fn is_wide(&self) -> bool {
        descriptor::is_wide_field(&self.descriptor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Method {
    #[serde(skip)]
    pub id: MethodId,
    pub class_name: String,
    pub name: String,
    pub descriptor: String,
    #[serde(default)]
    pub is_static: bool,
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub exception_handlers: Vec<ExceptionHandler>,
    #[serde(default)]
    pub local_variables: Vec<LocalVariableInfo>,
}

impl Method {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instruction(&self, index: InstructionIndex) -> Option<&Instruction> {
        self.instructions.get(index.value())
    }

    /// The method entry sentinel (always the first instruction)
    pub fn entry_label(&self) -> InstructionIndex {
        InstructionIndex::zero()
    }

    /// The abnormal termination sentinel (always the last instruction)
    pub fn abnormal_termination_label(&self) -> InstructionIndex {
        InstructionIndex::new(self.instructions.len().saturating_sub(1))
    }

    /// `Class.method`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.class_name, self.name)
    }

    /// Look up the slot of a named local variable
    pub fn local_slot(&self, name: &str) -> Option<usize> {
        self.local_variables
            .iter()
            .find(|local| local.name == name)
            .map(|local| local.slot)
    }

    /// Whether `index` is the entry of one of this method's exception handlers
    pub fn is_handler_entry(&self, index: InstructionIndex) -> bool {
        self.exception_handlers.iter().any(|h| h.handler == index)
    }

    /// Whether an invocation of `target` may dispatch to this method
    pub fn is_invoked_by(&self, target: &MethodRef) -> bool {
        self.name == target.name && self.descriptor == target.descriptor
    }

    fn validate(&self) -> Result<()> {
        let name = self.qualified_name();
        let first = self.instructions.first().and_then(|i| i.kind.label_kind());
        let last = self.instructions.last().and_then(|i| i.kind.label_kind());
        if first != Some(LabelKind::MethodEntry) {
            return Err(Error::invalid_program(format!(
                "{} does not start with a method entry label",
                name
            )));
        }
        if last != Some(LabelKind::AbnormalTermination) || self.instructions.len() < 2 {
            return Err(Error::invalid_program(format!(
                "{} does not end with an abnormal termination label",
                name
            )));
        }
        for handler in &self.exception_handlers {
            let entry = self.instruction(handler.handler).and_then(|i| i.kind.label_kind());
            if entry != Some(LabelKind::CatchBlock) {
                return Err(Error::invalid_program(format!(
                    "{}: handler {} is not a catch block label",
                    name, handler.handler
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class_name, self.name, self.descriptor)
    }
}

/// All methods and fields a trace refers to
#[derive(Debug, Clone, Serialize)]
pub struct Program {
    methods: Vec<Method>,
    fields: Vec<FieldRef>,
    #[serde(skip)]
    descriptors: HashMap<String, MethodDescriptor>,
}

impl Program {
    /// Assemble a program, assigning method ids and instruction positions
    pub fn new(mut methods: Vec<Method>, fields: Vec<FieldRef>) -> Result<Self> {
        let mut descriptors = HashMap::new();
        for (id, method) in methods.iter_mut().enumerate() {
            method.id = MethodId::new(id as u32);
            for (index, instruction) in method.instructions.iter_mut().enumerate() {
                instruction.method = method.id;
                instruction.index = InstructionIndex::new(index);
            }
            method.validate()?;

            for instruction in &method.instructions {
                match &instruction.kind {
                    InstructionKind::Invoke { target, .. } => {
                        if !descriptors.contains_key(&target.descriptor) {
                            let parsed = MethodDescriptor::parse(&target.descriptor)?;
                            descriptors.insert(target.descriptor.clone(), parsed);
                        }
                    }
                    InstructionKind::GetField { field, .. }
                    | InstructionKind::PutField { field, .. } => {
                        if field.value() as usize >= fields.len() {
                            return Err(Error::invalid_program(format!(
                                "{} refers to unknown field {}",
                                method.qualified_name(),
                                field
                            )));
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(Self {
            methods,
            fields,
            descriptors,
        })
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn fields(&self) -> &[FieldRef] {
        &self.fields
    }

    pub fn method(&self, id: MethodId) -> Result<&Method> {
        self.methods
            .get(id.value() as usize)
            .ok_or(Error::UnknownMethod { method: id.value() })
    }

    pub fn instruction(&self, method: MethodId, index: InstructionIndex) -> Result<&Instruction> {
        self.method(method)?
            .instruction(index)
            .ok_or(Error::UnknownInstruction {
                method: method.value(),
                index: index.value() as u32,
            })
    }

    pub fn field(&self, id: FieldId) -> Option<&FieldRef> {
        self.fields.get(id.value() as usize)
    }

    /// Slot layout of an invoked method
    pub fn call_layout(&self, target: &MethodRef) -> Result<&MethodDescriptor> {
        self.descriptors
            .get(&target.descriptor)
            .ok_or_else(|| Error::InvalidDescriptor {
                descriptor: target.descriptor.clone(),
            })
    }

    /// Methods named `class.name`, in id order
    pub fn find_methods<'a>(
        &'a self,
        class_name: &'a str,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Method> + 'a {
        self.methods
            .iter()
            .filter(move |m| m.class_name == class_name && m.name == name)
    }
}

impl<'de> Deserialize<'de> for Program {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawProgram {
            methods: Vec<Method>,
            #[serde(default)]
            fields: Vec<FieldRef>,
        }

        let raw = RawProgram::deserialize(deserializer)?;
        Program::new(raw.methods, raw.fields).map_err(serde::de::Error::custom)
    }
}
