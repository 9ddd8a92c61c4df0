//! Reference handles for command/acknowledge correlation.
//!
//! Every command that leaves a thread controller carries a [`Reference`]
//! issued by the controller's [`ReferenceManager`]. The acknowledge that
//! eventually comes back quotes the same reference.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default reference width in bits.
pub const DEFAULT_REFERENCE_WIDTH: u32 = 32;

/// Opaque correlation handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference(pub u32);

impl Reference {
    /// Reserved value, never issued.
    pub const INVALID: Reference = Reference(0);

    /// Whether this is a reference that could have been issued.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Raw value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Issues and recycles references of a bounded width.
///
/// The search for a free value starts right after the last issued one and
/// wraps around, so a released reference is not handed out again before
/// the rest of the space has been tried.
#[derive(Debug)]
pub struct ReferenceManager {
    width: u32,
    /// Highest issuable value, `2^width - 1`.
    max: u32,
    last_issued: u32,
    blocked: HashSet<u32>,
}

impl ReferenceManager {
    /// Create a manager using the full 32 bit space.
    pub fn new() -> Self {
        Self::with_width(DEFAULT_REFERENCE_WIDTH)
    }

    /// Create a manager for `width` bit references (clamped to `1..=32`).
    pub fn with_width(width: u32) -> Self {
        let width = width.clamp(1, 32);
        let max = if width == 32 {
            u32::MAX
        } else {
            (1u32 << width) - 1
        };
        Self {
            width,
            max,
            last_issued: 0,
            blocked: HashSet::new(),
        }
    }

    /// Reference width in bits.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Size of the value space, `INVALID` included.
    pub fn capacity(&self) -> u64 {
        self.max as u64 + 1
    }

    /// Number of references currently blocked (`INVALID` excluded).
    pub fn outstanding(&self) -> usize {
        self.blocked.len()
    }

    /// Whether `reference` is currently outstanding.
    pub fn is_blocked(&self, reference: Reference) -> bool {
        reference == Reference::INVALID || self.blocked.contains(&reference.0)
    }

    /// Issue a new reference and block it until it is released.
    pub fn get_new_ref(&mut self) -> Result<Reference> {
        // INVALID counts as permanently blocked.
        if self.blocked.len() as u64 + 1 >= self.capacity() {
            return Err(Error::ReferenceExhausted {
                capacity: self.capacity(),
            });
        }

        let mut candidate = self.last_issued;
        for _ in 0..self.capacity() {
            candidate = if candidate >= self.max { 1 } else { candidate + 1 };
            if self.blocked.insert(candidate) {
                self.last_issued = candidate;
                return Ok(Reference(candidate));
            }
        }

        Err(Error::ReferenceExhausted {
            capacity: self.capacity(),
        })
    }

    /// Release a reference. Releasing a free reference or `INVALID` is a no-op.
    pub fn unblock_reference(&mut self, reference: Reference) {
        if reference.is_valid() {
            self.blocked.remove(&reference.0);
        }
    }
}

impl Default for ReferenceManager {
    fn default() -> Self {
        Self::new()
    }
}
