//! Builders for methods and programs
//!
//! Used by the tests and benchmarks to write bytecode with forward jumps
//! without computing instruction positions by hand.

use super::{
    ExceptionHandler, FieldId, FieldRef, Instruction, InstructionIndex, InstructionKind,
    InvokeKind, JumpCondition, LabelKind, LocalVariableInfo, Method, MethodId, MethodRef, Program,
};
use crate::error::{Error, Result};

/// A jump target that may be placed after it is referenced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

/// Incrementally builds one [`Method`]
#[derive(Debug)]
pub struct MethodBuilder {
    class_name: String,
    name: String,
    descriptor: String,
    is_static: bool,
    line: u32,
    instructions: Vec<Instruction>,
    labels: Vec<Option<InstructionIndex>>,
    /// Instructions whose branch targets are labels, in operand order
    fixups: Vec<(usize, Vec<Label>)>,
    handlers: Vec<(Label, Label, Label)>,
    locals: Vec<LocalVariableInfo>,
}

impl MethodBuilder {
    /// Start a method; the method entry label is emitted immediately
    pub fn new(
        class_name: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        let mut builder = Self {
            class_name: class_name.into(),
            name: name.into(),
            descriptor: descriptor.into(),
            is_static: true,
            line: 0,
            instructions: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            handlers: Vec::new(),
            locals: Vec::new(),
        };
        builder.push(InstructionKind::Label {
            kind: LabelKind::MethodEntry,
        });
        builder
    }

    pub fn instance_method(mut self) -> Self {
        self.is_static = false;
        self
    }

    /// Set the line number of the following instructions
    pub fn line(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    /// Name a local variable slot
    pub fn local(&mut self, slot: usize, name: impl Into<String>) -> &mut Self {
        self.locals.push(LocalVariableInfo {
            slot,
            name: name.into(),
        });
        self
    }

    pub fn push(&mut self, kind: InstructionKind) -> InstructionIndex {
        let index = InstructionIndex::new(self.instructions.len());
        self.instructions.push(Instruction::new(kind, self.line));
        index
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Emit a plain label instruction for `label`
    pub fn place(&mut self, label: Label) -> InstructionIndex {
        self.place_as(label, LabelKind::Plain)
    }

    /// Emit the catch block label of an exception handler
    pub fn place_handler(&mut self, label: Label) -> InstructionIndex {
        self.place_as(label, LabelKind::CatchBlock)
    }

    fn place_as(&mut self, label: Label, kind: LabelKind) -> InstructionIndex {
        let index = self.push(InstructionKind::Label { kind });
        self.labels[label.0] = Some(index);
        index
    }

    pub fn jump(&mut self, condition: JumpCondition, target: Label) -> InstructionIndex {
        self.push_with_targets(
            InstructionKind::Jump {
                condition,
                target: InstructionIndex::UNRESOLVED,
            },
            vec![target],
        )
    }

    pub fn subroutine(&mut self, target: Label) -> InstructionIndex {
        self.push_with_targets(
            InstructionKind::Subroutine {
                target: InstructionIndex::UNRESOLVED,
            },
            vec![target],
        )
    }

    pub fn table_switch(&mut self, default: Label, targets: &[Label]) -> InstructionIndex {
        let kind = InstructionKind::TableSwitch {
            default: InstructionIndex::UNRESOLVED,
            targets: vec![InstructionIndex::UNRESOLVED; targets.len()],
        };
        let labels = std::iter::once(default).chain(targets.iter().copied()).collect();
        self.push_with_targets(kind, labels)
    }

    pub fn lookup_switch(&mut self, default: Label, cases: &[(i32, Label)]) -> InstructionIndex {
        let kind = InstructionKind::LookupSwitch {
            default: InstructionIndex::UNRESOLVED,
            cases: cases
                .iter()
                .map(|(key, _)| (*key, InstructionIndex::UNRESOLVED))
                .collect(),
        };
        let labels = std::iter::once(default)
            .chain(cases.iter().map(|(_, label)| *label))
            .collect();
        self.push_with_targets(kind, labels)
    }

    pub fn invoke(
        &mut self,
        kind: InvokeKind,
        class_name: &str,
        name: &str,
        descriptor: &str,
    ) -> InstructionIndex {
        self.push(InstructionKind::Invoke {
            target: MethodRef::new(class_name, name, descriptor),
            kind,
        })
    }

    /// Protect `[start, end)` with the handler placed at `handler`
    pub fn try_catch(&mut self, start: Label, end: Label, handler: Label) -> &mut Self {
        self.handlers.push((start, end, handler));
        self
    }

    fn push_with_targets(&mut self, kind: InstructionKind, labels: Vec<Label>) -> InstructionIndex {
        let index = self.push(kind);
        self.fixups.push((index.value(), labels));
        index
    }

    fn resolve(&self, label: Label) -> Result<InstructionIndex> {
        self.labels
            .get(label.0)
            .copied()
            .flatten()
            .ok_or_else(|| {
                Error::invalid_program(format!(
                    "{}.{}: label {} was never placed",
                    self.class_name, self.name, label.0
                ))
            })
    }

    /// Finish the method, appending the abnormal termination label
    pub fn build(mut self) -> Result<Method> {
        self.push(InstructionKind::Label {
            kind: LabelKind::AbnormalTermination,
        });

        let fixups = std::mem::take(&mut self.fixups);
        for (position, labels) in fixups {
            let resolved = labels
                .iter()
                .map(|&label| self.resolve(label))
                .collect::<Result<Vec<_>>>()?;
            let targets = self.instructions[position].kind.branch_targets_mut();
            for (slot, target) in targets.into_iter().zip(resolved) {
                *slot = target;
            }
        }

        let exception_handlers = self
            .handlers
            .iter()
            .map(|&(start, end, handler)| {
                Ok(ExceptionHandler {
                    start: self.resolve(start)?,
                    end: self.resolve(end)?,
                    handler: self.resolve(handler)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Method {
            id: MethodId::default(),
            class_name: self.class_name,
            name: self.name,
            descriptor: self.descriptor,
            is_static: self.is_static,
            instructions: self.instructions,
            exception_handlers,
            local_variables: self.locals,
        })
    }
}

/// Collects methods and fields into a [`Program`]
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    methods: Vec<Method>,
    fields: Vec<FieldRef>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(&mut self, owner: &str, name: &str, descriptor: &str) -> FieldId {
        self.fields.push(FieldRef {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        });
        FieldId::new(self.fields.len() as u32 - 1)
    }

    pub fn method(&mut self, builder: MethodBuilder) -> Result<MethodId> {
        self.methods.push(builder.build()?);
        Ok(MethodId::new(self.methods.len() as u32 - 1))
    }

    pub fn build(self) -> Result<Program> {
        Program::new(self.methods, self.fields)
    }
}
