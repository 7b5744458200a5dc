//! JVM-style type descriptors
//!
//! Only the slot layout matters to the simulator: how many operand stack
//! slots the parameters of a call take, and how many the returned value takes.

use crate::error::{Error, Result};

/// Slot layout of a method descriptor such as `(IJLjava/lang/String;)V`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// One entry per declared parameter, `true` for long and double
    pub wide_parameters: Vec<bool>,
    /// Slots taken by the returned value (0, 1 or 2)
    pub return_slots: usize,
}

impl MethodDescriptor {
    /// Parse a method descriptor
    pub fn parse(descriptor: &str) -> Result<Self> {
        let invalid = || Error::InvalidDescriptor {
            descriptor: descriptor.to_string(),
        };

        let rest = descriptor.strip_prefix('(').ok_or_else(invalid)?;
        let close = rest.find(')').ok_or_else(invalid)?;
        let (params, ret) = (&rest[..close], &rest[close + 1..]);

        let mut wide_parameters = Vec::new();
        let mut chars = params;
        while !chars.is_empty() {
            let (slots, consumed) = field_type(chars).ok_or_else(invalid)?;
            wide_parameters.push(slots == 2);
            chars = &chars[consumed..];
        }

        let return_slots = if ret == "V" {
            0
        } else {
            match field_type(ret) {
                Some((slots, consumed)) if consumed == ret.len() => slots,
                _ => return Err(invalid()),
            }
        };

        Ok(Self {
            wide_parameters,
            return_slots,
        })
    }

    /// Operand stack slots consumed by the arguments, including the receiver
    pub fn parameter_slots(&self, has_receiver: bool) -> usize {
        let declared: usize = self
            .wide_parameters
            .iter()
            .map(|&wide| if wide { 2 } else { 1 })
            .sum();
        declared + usize::from(has_receiver)
    }
}

/// Whether a field descriptor denotes a two-slot value
pub fn is_wide_field(descriptor: &str) -> bool {
    matches!(descriptor, "J" | "D")
}

/// Parse one field type, returning its slot size and the bytes consumed
fn field_type(s: &str) -> Option<(usize, usize)> {
    let bytes = s.as_bytes();
    match bytes.first()? {
        b'J' | b'D' => Some((2, 1)),
        b'Z' | b'B' | b'C' | b'S' | b'I' | b'F' => Some((1, 1)),
        b'L' => s.find(';').map(|end| (1, end + 1)),
        b'[' => {
            let dims = bytes.iter().take_while(|&&b| b == b'[').count();
            let (_, consumed) = field_type(&s[dims..])?;
            Some((1, dims + consumed))
        }
        _ => None,
    }
}
