//! Type-safe wrappers for bytecode addressing
//!
//! This module provides type-safe wrappers to distinguish between:
//! - Instruction indices (positions within a method's instruction list)
//! - Method ids (positions within a program's method table)
//! - Field ids (positions within a program's field table)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Instruction index within a method (0-based position in the method's instruction list)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord, Default)]
pub struct InstructionIndex(pub usize);

impl InstructionIndex {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn value(&self) -> usize {
        self.0
    }

    /// Placeholder for jump targets that are patched once their label is placed
    pub const UNRESOLVED: InstructionIndex = InstructionIndex(usize::MAX);

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<usize> for InstructionIndex {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<InstructionIndex> for usize {
    fn from(index: InstructionIndex) -> usize {
        index.0
    }
}

impl fmt::Display for InstructionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Method id (position in the program's method table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord, Default)]
pub struct MethodId(pub u32);

impl MethodId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Field id (position in the program's field table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct FieldId(pub u32);

impl FieldId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}
