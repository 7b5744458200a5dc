//! Dynamic dependence extraction
//!
//! The [`DependenceExtractor`] walks a trace backward and reports data and
//! control dependences between instruction instances to registered
//! [`DependencesVisitor`]s. Each visitor opts into the events it wants with
//! [`VisitorCapabilities`].

pub mod extractor;
pub mod simulation;

pub use extractor::{DependenceExtractor, ExtractorOptions};
pub use simulation::{CallFrame, DynamicInformation};

use crate::bytecode::{FieldId, MethodId};
use crate::error::Result;
use bitflags::bitflags;
use std::fmt;
use std::rc::Rc;

/// A storage location tracked by the data dependence engine
///
/// Locals and stack entries are scoped to a frame id; stack offsets are
/// relative to the frame's height when the backward walk entered it and may
/// be negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variable {
    LocalVariable { frame: u64, index: usize },
    StackEntry { frame: u64, offset: i32 },
    /// Instance field, or static field of object 0
    ObjectField { object: u64, field: FieldId },
    ArrayElement { array: u64, index: i64 },
}

impl Variable {
    pub fn is_stack_entry(&self) -> bool {
        matches!(self, Variable::StackEntry { .. })
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Variable::LocalVariable { .. })
    }

    /// Object whose field or element this is
    pub fn heap_object(&self) -> Option<u64> {
        match self {
            Variable::ObjectField { object, .. } => Some(*object),
            Variable::ArrayElement { array, .. } => Some(*array),
            _ => None,
        }
    }

    pub fn frame(&self) -> Option<u64> {
        match self {
            Variable::LocalVariable { frame, .. } | Variable::StackEntry { frame, .. } => {
                Some(*frame)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::LocalVariable { frame, index } => write!(f, "local {}@{}", index, frame),
            Variable::StackEntry { frame, offset } => write!(f, "stack {}@{}", offset, frame),
            Variable::ObjectField { object, field } => write!(f, "#{}.{}", object, field),
            Variable::ArrayElement { array, index } => write!(f, "#{}[{}]", array, index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataDependenceType {
    ReadAfterWrite,
    WriteAfterRead,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Events a visitor wants to receive
    pub struct VisitorCapabilities: u32 {
        const DATA_DEPENDENCES_RAW = 1 << 0;
        const DATA_DEPENDENCES_WAR = 1 << 1;
        const DATA_DEPENDENCES_ALL = Self::DATA_DEPENDENCES_RAW.bits() | Self::DATA_DEPENDENCES_WAR.bits();
        const CONTROL_DEPENDENCES = 1 << 2;
        const INSTRUCTION_EXECUTIONS = 1 << 3;
        const PENDING_CONTROL_DEPENDENCES = 1 << 4;
        const PENDING_DATA_DEPENDENCES_RAW = 1 << 5;
        const PENDING_DATA_DEPENDENCES_WAR = 1 << 6;
        const PENDING_DATA_DEPENDENCES_ALL = Self::PENDING_DATA_DEPENDENCES_RAW.bits() | Self::PENDING_DATA_DEPENDENCES_WAR.bits();
        const METHOD_ENTRY_LEAVE = 1 << 7;
        const UNTRACED_METHOD_CALLS = 1 << 8;
        const OBJECT_CREATION = 1 << 9;
    }
}

/// Receiver of dependence events
///
/// `from` is always the later instance in execution order. Every callback
/// may return [`crate::Error::Interrupted`] to cancel the walk.
#[allow(unused_variables)]
pub trait DependencesVisitor<I> {
    /// `to` wrote `variable` and `from` read it (RAW), or `to` read `variable`
    /// before `from` overwrote it (WAR). `used` lists the variables `to` read
    /// to produce the value; it is empty for WAR and for creations.
    fn visit_data_dependence(
        &mut self,
        from: &Rc<I>,
        to: &Rc<I>,
        used: &[Variable],
        variable: Variable,
        kind: DataDependenceType,
    ) -> Result<()> {
        Ok(())
    }

    /// `from` waits for the instance it depends on through `variable`
    fn visit_pending_data_dependence(
        &mut self,
        from: &Rc<I>,
        variable: Variable,
        kind: DataDependenceType,
    ) -> Result<()> {
        Ok(())
    }

    /// A pending dependence was dropped without being resolved
    fn discard_pending_data_dependence(
        &mut self,
        from: &Rc<I>,
        variable: Variable,
        kind: DataDependenceType,
    ) -> Result<()> {
        Ok(())
    }

    /// `from` executes only because of `to`
    fn visit_control_dependence(&mut self, from: &Rc<I>, to: &Rc<I>) -> Result<()> {
        Ok(())
    }

    fn visit_pending_control_dependence(&mut self, from: &Rc<I>) -> Result<()> {
        Ok(())
    }

    fn visit_instruction_execution(&mut self, instance: &Rc<I>) -> Result<()> {
        Ok(())
    }

    /// The walk passed the start of an activation of `method`
    fn visit_method_entry(&mut self, method: MethodId, depth: usize) -> Result<()> {
        Ok(())
    }

    /// The walk reached the end of an activation of `method`
    fn visit_method_leave(&mut self, method: MethodId, depth: usize) -> Result<()> {
        Ok(())
    }

    /// `caller` invoked a method whose body was not traced
    fn visit_untraced_call(&mut self, caller: &Rc<I>) -> Result<()> {
        Ok(())
    }

    fn visit_object_creation(&mut self, object: u64, creator: &Rc<I>) -> Result<()> {
        Ok(())
    }

    /// The walk completed after `instances` instances
    fn visit_end(&mut self, instances: u64) -> Result<()> {
        Ok(())
    }

    /// The walk is being aborted
    fn interrupted(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Progress of a backward walk, in percent of the trace
pub trait ProgressMonitor {
    fn start(&mut self);
    fn update(&mut self, percentage: f64);
    fn end(&mut self);
}
