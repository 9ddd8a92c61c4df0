//! Interrupt vector table and master dispatch.
//!
//! The peripheral interrupt expansion (PIE) routes [`VECTOR_COUNT`]
//! interrupt lines in groups of [`LINES_PER_GROUP`]. Installing a handler
//! enables its line, removing it disables the line. Lines that fire without
//! a handler go to a dummy handler which disables them, so an unhandled
//! source cannot keep interrupting.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{HalError, Result};

/// Interrupt line number.
pub type InterruptId = u16;

/// PIE groups.
pub const PIE_GROUPS: u16 = 12;
/// Lines per PIE group.
pub const LINES_PER_GROUP: u16 = 8;
/// Interrupt lines handled by the table.
pub const VECTOR_COUNT: u16 = PIE_GROUPS * LINES_PER_GROUP;

/// PIE group of a line, counted from 1.
pub fn group_of(id: InterruptId) -> u16 {
    id / LINES_PER_GROUP + 1
}

/// Access to the interrupt routing hardware.
pub trait InterruptController: Send + Sync {
    /// Enable a line.
    fn enable(&self, id: InterruptId);

    /// Disable a line.
    fn disable(&self, id: InterruptId);

    /// Highest priority pending line, if any.
    fn pending(&self) -> Option<InterruptId>;

    /// Re-arm a PIE group after its interrupt was served.
    fn acknowledge(&self, group: u16);
}

/// Interrupt service routine.
pub type InterruptHandler = Arc<dyn Fn(InterruptId) + Send + Sync>;

/// What one dispatch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Nothing was pending.
    Idle,
    /// The registered handler ran.
    Handled(InterruptId),
    /// No handler; the line was disabled.
    Spurious(InterruptId),
}

#[derive(Default, Clone)]
struct Vector {
    handler: Option<InterruptHandler>,
    spurious: u64,
}

/// Interrupt vector table.
pub struct InterruptTable<C: InterruptController> {
    controller: C,
    vectors: RwLock<Vec<Vector>>,
}

impl<C: InterruptController> InterruptTable<C> {
    /// Table with every line unhandled.
    pub fn new(controller: C) -> Self {
        Self {
            controller,
            vectors: RwLock::new(vec![Vector::default(); VECTOR_COUNT as usize]),
        }
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// Install `handler` for `id` and enable the line; `None` removes the
    /// handler and disables the line.
    pub fn register_interrupt(
        &self,
        id: InterruptId,
        handler: Option<InterruptHandler>,
    ) -> Result<()> {
        let index = check(id)?;
        let mut vectors = self.vectors.write();
        let install = handler.is_some();
        vectors[index].handler = handler;
        if install {
            self.controller.enable(id);
        } else {
            self.controller.disable(id);
        }
        tracing::debug!(interrupt = id, install, "Interrupt vector changed");
        Ok(())
    }

    /// Whether a handler is installed for `id`.
    pub fn is_registered(&self, id: InterruptId) -> bool {
        self.vectors
            .read()
            .get(id as usize)
            .is_some_and(|v| v.handler.is_some())
    }

    /// Dummy handler hits of `id`.
    pub fn spurious_count(&self, id: InterruptId) -> u64 {
        self.vectors
            .read()
            .get(id as usize)
            .map_or(0, |v| v.spurious)
    }

    /// Serve the pending interrupt, if any.
    ///
    /// The handler runs without the table lock held, so it may register or
    /// remove vectors itself.
    pub fn dispatch(&self) -> Dispatch {
        let Some(id) = self.controller.pending() else {
            return Dispatch::Idle;
        };

        let handler = match self.vectors.read().get(id as usize) {
            Some(vector) => vector.handler.clone(),
            None => {
                tracing::error!(interrupt = id, "Pending interrupt outside the vector table");
                None
            }
        };

        let outcome = match handler {
            Some(handler) => {
                handler(id);
                Dispatch::Handled(id)
            }
            None => {
                self.dummy_handler(id);
                Dispatch::Spurious(id)
            }
        };
        self.controller.acknowledge(group_of(id));
        outcome
    }

    /// Serve interrupts until none is pending. Returns the number served.
    pub fn dispatch_all(&self) -> usize {
        let mut served = 0;
        while self.dispatch() != Dispatch::Idle {
            served += 1;
        }
        served
    }

    fn dummy_handler(&self, id: InterruptId) {
        self.controller.disable(id);
        if let Some(vector) = self.vectors.write().get_mut(id as usize) {
            vector.spurious += 1;
        }
        tracing::warn!(interrupt = id, "Unhandled interrupt, line disabled");
    }
}

fn check(id: InterruptId) -> Result<usize> {
    if id < VECTOR_COUNT {
        Ok(id as usize)
    } else {
        Err(HalError::InterruptOutOfRange {
            id,
            count: VECTOR_COUNT,
        })
    }
}
