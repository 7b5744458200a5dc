//! Static instructions and their opcode categories

use super::instruction_types::{FieldId, InstructionIndex, MethodId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a label pseudo-instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelKind {
    /// Ordinary jump target
    Plain,
    /// Entry of an exception handler
    CatchBlock,
    /// Sentinel executed when a method is entered
    MethodEntry,
    /// Sentinel executed when a method is left by an exception
    AbnormalTermination,
}

impl LabelKind {
    /// Sentinels inserted by the tracer rather than present in the bytecode
    pub fn is_additional(self) -> bool {
        matches!(self, LabelKind::MethodEntry | LabelKind::AbnormalTermination)
    }
}

/// Condition of a jump instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JumpCondition {
    /// GOTO
    Always,
    /// Compares one operand (IFEQ, IFNULL, ...)
    Unary,
    /// Compares two operands (IF_ICMPLT, IF_ACMPEQ, ...)
    Binary,
}

/// Stack manipulation opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackOp {
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
}

impl StackOp {
    /// Slots read and slots written
    pub fn effect(self) -> (usize, usize) {
        match self {
            StackOp::Pop => (1, 0),
            StackOp::Pop2 => (2, 0),
            StackOp::Dup => (1, 2),
            StackOp::DupX1 => (2, 3),
            StackOp::DupX2 => (3, 4),
            StackOp::Dup2 => (2, 4),
            StackOp::Dup2X1 => (3, 5),
            StackOp::Dup2X2 => (4, 6),
            StackOp::Swap => (2, 2),
        }
    }
}

/// Dispatch kind of a method invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeKind {
    Static,
    Virtual,
    Special,
    Interface,
}

impl InvokeKind {
    pub fn has_receiver(self) -> bool {
        !matches!(self, InvokeKind::Static)
    }
}

/// Symbolic reference to an invoked method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub class_name: String,
    pub name: String,
    pub descriptor: String,
}

impl MethodRef {
    pub fn new(
        class_name: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class_name, self.name, self.descriptor)
    }
}

/// Opcode category of an instruction, with the operands the analyses need
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "opcode", rename_all = "snake_case")]
pub enum InstructionKind {
    Label {
        kind: LabelKind,
    },
    Nop,
    /// Pushes a constant (ACONST_NULL, ICONST, LDC, BIPUSH, ...)
    Constant {
        #[serde(default = "one")]
        slots: usize,
    },
    Load {
        local: usize,
        #[serde(default)]
        wide: bool,
    },
    Store {
        local: usize,
        #[serde(default)]
        wide: bool,
    },
    /// IINC
    Increment {
        local: usize,
    },
    /// Pops `pops` slots and pushes `pushes` slots (IADD, LCMP, I2L, ...)
    Arithmetic {
        pops: usize,
        pushes: usize,
    },
    Stack {
        op: StackOp,
    },
    /// CHECKCAST and INSTANCEOF
    TypeCheck,
    Jump {
        condition: JumpCondition,
        target: InstructionIndex,
    },
    /// JSR
    Subroutine {
        target: InstructionIndex,
    },
    /// Subroutine return (RET)
    Ret {
        local: usize,
    },
    TableSwitch {
        default: InstructionIndex,
        targets: Vec<InstructionIndex>,
    },
    LookupSwitch {
        default: InstructionIndex,
        cases: Vec<(i32, InstructionIndex)>,
    },
    Return {
        #[serde(default)]
        slots: usize,
    },
    Throw,
    GetField {
        field: FieldId,
        #[serde(default)]
        is_static: bool,
    },
    PutField {
        field: FieldId,
        #[serde(default)]
        is_static: bool,
    },
    ArrayLoad {
        #[serde(default)]
        wide: bool,
    },
    ArrayStore {
        #[serde(default)]
        wide: bool,
    },
    ArrayLength,
    New,
    NewArray {
        #[serde(default = "one")]
        dimensions: usize,
    },
    Invoke {
        target: MethodRef,
        kind: InvokeKind,
    },
    /// MONITORENTER and MONITOREXIT
    Monitor,
}

fn one() -> usize {
    1
}

impl InstructionKind {
    pub fn label_kind(&self) -> Option<LabelKind> {
        match self {
            InstructionKind::Label { kind } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_label(&self) -> bool {
        matches!(self, InstructionKind::Label { .. })
    }

    /// Unconditional jump
    pub fn is_goto(&self) -> bool {
        matches!(
            self,
            InstructionKind::Jump {
                condition: JumpCondition::Always,
                ..
            }
        )
    }

    pub fn is_invoke(&self) -> bool {
        matches!(self, InstructionKind::Invoke { .. })
    }

    /// Instructions that only exist for control flow bookkeeping
    pub fn is_bookkeeping(&self) -> bool {
        self.is_label() || self.is_goto()
    }

    /// Whether an instance of this instruction can be the one that raised an
    /// exception; tracer sentinels and GOTO never are
    pub fn can_raise(&self) -> bool {
        !(self.is_goto() || self.label_kind().is_some_and(LabelKind::is_additional))
    }

    /// Explicit branch targets, in operand order
    pub fn branch_targets(&self) -> Vec<InstructionIndex> {
        match self {
            InstructionKind::Jump { target, .. } | InstructionKind::Subroutine { target } => {
                vec![*target]
            }
            InstructionKind::TableSwitch { default, targets } => {
                std::iter::once(*default).chain(targets.iter().copied()).collect()
            }
            InstructionKind::LookupSwitch { default, cases } => std::iter::once(*default)
                .chain(cases.iter().map(|(_, target)| *target))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Mutable branch targets, in the same order as [`Self::branch_targets`]
    pub fn branch_targets_mut(&mut self) -> Vec<&mut InstructionIndex> {
        match self {
            InstructionKind::Jump { target, .. } | InstructionKind::Subroutine { target } => {
                vec![target]
            }
            InstructionKind::TableSwitch { default, targets } => {
                std::iter::once(default).chain(targets.iter_mut()).collect()
            }
            InstructionKind::LookupSwitch { default, cases } => std::iter::once(default)
                .chain(cases.iter_mut().map(|(_, target)| target))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstructionKind::Label { kind } => match kind {
                LabelKind::Plain => write!(f, "LABEL"),
                LabelKind::CatchBlock => write!(f, "LABEL (catch)"),
                LabelKind::MethodEntry => write!(f, "LABEL (method entry)"),
                LabelKind::AbnormalTermination => write!(f, "LABEL (abnormal termination)"),
            },
            InstructionKind::Nop => write!(f, "NOP"),
            InstructionKind::Constant { slots } => write!(f, "CONST/{}", slots),
            InstructionKind::Load { local, wide } => {
                write!(f, "{} {}", if *wide { "LOAD2" } else { "LOAD" }, local)
            }
            InstructionKind::Store { local, wide } => {
                write!(f, "{} {}", if *wide { "STORE2" } else { "STORE" }, local)
            }
            InstructionKind::Increment { local } => write!(f, "IINC {}", local),
            InstructionKind::Arithmetic { pops, pushes } => {
                write!(f, "ARITH {}->{}", pops, pushes)
            }
            InstructionKind::Stack { op } => write!(f, "{}", format!("{:?}", op).to_uppercase()),
            InstructionKind::TypeCheck => write!(f, "TYPECHECK"),
            InstructionKind::Jump { condition, target } => match condition {
                JumpCondition::Always => write!(f, "GOTO {}", target),
                JumpCondition::Unary => write!(f, "IF {}", target),
                JumpCondition::Binary => write!(f, "IF_CMP {}", target),
            },
            InstructionKind::Subroutine { target } => write!(f, "JSR {}", target),
            InstructionKind::Ret { local } => write!(f, "RET {}", local),
            InstructionKind::TableSwitch { default, targets } => {
                write!(f, "TABLESWITCH default {} ({} cases)", default, targets.len())
            }
            InstructionKind::LookupSwitch { default, cases } => {
                write!(f, "LOOKUPSWITCH default {} ({} cases)", default, cases.len())
            }
            InstructionKind::Return { slots } => write!(f, "RETURN/{}", slots),
            InstructionKind::Throw => write!(f, "ATHROW"),
            InstructionKind::GetField { field, is_static } => {
                write!(f, "{} {}", if *is_static { "GETSTATIC" } else { "GETFIELD" }, field)
            }
            InstructionKind::PutField { field, is_static } => {
                write!(f, "{} {}", if *is_static { "PUTSTATIC" } else { "PUTFIELD" }, field)
            }
            InstructionKind::ArrayLoad { .. } => write!(f, "ALOAD[]"),
            InstructionKind::ArrayStore { .. } => write!(f, "ASTORE[]"),
            InstructionKind::ArrayLength => write!(f, "ARRAYLENGTH"),
            InstructionKind::New => write!(f, "NEW"),
            InstructionKind::NewArray { dimensions } => write!(f, "NEWARRAY/{}", dimensions),
            InstructionKind::Invoke { target, kind } => {
                write!(f, "INVOKE{} {}", format!("{:?}", kind).to_uppercase(), target)
            }
            InstructionKind::Monitor => write!(f, "MONITOR"),
        }
    }
}

/// One static instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    #[serde(flatten)]
    pub kind: InstructionKind,
    #[serde(default)]
    pub line: u32,
    /// Owning method, assigned when the program is assembled
    #[serde(skip)]
    pub method: MethodId,
    /// Position in the owning method, assigned when the program is assembled
    #[serde(skip)]
    pub index: InstructionIndex,
}

impl Instruction {
    pub fn new(kind: InstructionKind, line: u32) -> Self {
        Self {
            kind,
            line,
            method: MethodId::default(),
            index: InstructionIndex::zero(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_kind() -> Vec<InstructionKind> {
        let target = InstructionIndex::new(3);
        vec![
            InstructionKind::Label {
                kind: LabelKind::CatchBlock,
            },
            InstructionKind::Nop,
            InstructionKind::Constant { slots: 2 },
            InstructionKind::Load { local: 1, wide: true },
            InstructionKind::Store { local: 2, wide: false },
            InstructionKind::Increment { local: 4 },
            InstructionKind::Arithmetic { pops: 2, pushes: 1 },
            InstructionKind::Stack { op: StackOp::DupX1 },
            InstructionKind::TypeCheck,
            InstructionKind::Jump {
                condition: JumpCondition::Binary,
                target,
            },
            InstructionKind::Subroutine { target },
            InstructionKind::Ret { local: 5 },
            InstructionKind::TableSwitch {
                default: target,
                targets: vec![InstructionIndex::new(4), InstructionIndex::new(5)],
            },
            InstructionKind::LookupSwitch {
                default: target,
                cases: vec![(-1, InstructionIndex::new(6))],
            },
            InstructionKind::Return { slots: 1 },
            InstructionKind::Throw,
            InstructionKind::GetField {
                field: FieldId::new(0),
                is_static: true,
            },
            InstructionKind::PutField {
                field: FieldId::new(1),
                is_static: false,
            },
            InstructionKind::ArrayLoad { wide: true },
            InstructionKind::ArrayStore { wide: false },
            InstructionKind::ArrayLength,
            InstructionKind::New,
            InstructionKind::NewArray { dimensions: 2 },
            InstructionKind::Invoke {
                target: MethodRef::new("Main", "square", "(I)I"),
                kind: InvokeKind::Static,
            },
            InstructionKind::Monitor,
        ]
    }

    #[test]
    fn test_instructions_survive_json() {
        for kind in every_kind() {
            let instruction = Instruction::new(kind, 12);
            let json = serde_json::to_string(&instruction).unwrap();
            let back: Instruction = serde_json::from_str(&json).unwrap();
            assert_eq!(back, instruction, "{}", json);
        }
    }

    #[test]
    fn test_stack_operand_and_opcode_tag_coexist() {
        let json = serde_json::to_value(Instruction::new(
            InstructionKind::Stack { op: StackOp::Swap },
            3,
        ))
        .unwrap();
        assert_eq!(json["opcode"], "stack");
        assert_eq!(json["op"], "swap");
        assert_eq!(json["line"], 3);
    }

    #[test]
    fn test_omitted_operands_take_defaults() {
        let instruction: Instruction =
            serde_json::from_str(r#"{"opcode": "constant", "line": 1}"#).unwrap();
        assert_eq!(instruction.kind, InstructionKind::Constant { slots: 1 });

        let instruction: Instruction =
            serde_json::from_str(r#"{"opcode": "load", "local": 2}"#).unwrap();
        assert_eq!(instruction.kind, InstructionKind::Load { local: 2, wide: false });
        assert_eq!(instruction.line, 0);
    }
}
