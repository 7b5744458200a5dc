//! trace-slicer: backward dynamic slicing of recorded bytecode traces
//!
//! This library walks an execution trace from its last instruction to its
//! first, reconstructs data and control dependences between instruction
//! instances, and computes the dynamic slice for a set of criteria.

pub mod bytecode;
pub mod cfg;
pub mod cli;
pub mod dependence;
pub mod error;
pub mod slicing;
pub mod trace;
pub mod watchdog;

pub use error::{Error, Result};

// Re-export commonly used types
pub use bytecode::{MethodBuilder, Program, ProgramBuilder};
pub use cfg::{Cfg, ControlDependences};
pub use dependence::{DependenceExtractor, DependencesVisitor, VisitorCapabilities};
pub use slicing::{SliceInstructionsCollector, Slicer, SlicingCriterion};
pub use trace::{RecordedTrace, TraceBundle};
pub use watchdog::{FlagWatchdog, LazyWatchdog, Watchdog};
