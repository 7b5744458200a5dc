//! Execution traces
//!
//! A trace is consumed backward: the last executed instruction comes first.
//! Each record carries its stack depth and, for heap accesses, the object
//! identities the tracer observed.

pub mod pipeline;
pub mod recorded;

pub use pipeline::{PipelineOptions, PipelinedTrace};
pub use recorded::{BackwardRecords, RecordedTrace, TraceBundle, TraceRecord};

use crate::bytecode::{InstructionIndex, MethodId};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dynamic information the tracer recorded alongside an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstanceInfo {
    #[default]
    None,
    /// Receiver object of a field access
    Object { id: u64 },
    /// Array and index of an array element access
    ArrayElement { array: u64, index: i64 },
    /// Identity of the object or array an allocation created
    Created { id: u64 },
}

/// One dynamic occurrence of an instruction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstructionInstance {
    pub method: MethodId,
    pub index: InstructionIndex,
    /// Call stack depth, starting at 1
    pub stack_depth: usize,
    /// Position in the backward walk
    pub instance_nr: u64,
    /// How often this instruction had executed up to and including this instance
    pub occurrence: u64,
    /// Synthetic frame id, assigned by the dependence extractor
    pub frame: u64,
    pub info: InstanceInfo,
}

impl fmt::Display for InstructionInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}:{} (depth {}, occurrence {})",
            self.instance_nr, self.method, self.index, self.stack_depth, self.occurrence
        )
    }
}

/// Instance type carried through a backward pass
///
/// Visitors that need per-instance state wrap [`InstructionInstance`] in
/// their own type; the extractor creates one per trace record.
pub trait TracedInstance: From<InstructionInstance> {
    fn instance(&self) -> &InstructionInstance;
}

impl TracedInstance for InstructionInstance {
    fn instance(&self) -> &InstructionInstance {
        self
    }
}

/// A reversed instance stream
pub trait BackwardTrace: Iterator<Item = Result<InstructionInstance>> {
    /// Methods on the call stack when recording ended, outermost first
    fn initial_stack_methods(&self) -> Vec<MethodId>;

    /// Estimated completion in percent, for progress reporting only
    fn percentage_done(&self) -> f64 {
        0.0
    }
}
