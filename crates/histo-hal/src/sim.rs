//! Simulated interrupt controller.

use std::collections::{BTreeSet, HashSet};

use parking_lot::Mutex;

use crate::interrupt::{InterruptController, InterruptId};

#[derive(Debug, Default)]
struct State {
    enabled: HashSet<InterruptId>,
    /// Raised lines; the lowest id has the highest priority
    flagged: BTreeSet<InterruptId>,
    acknowledged: Vec<u16>,
}

/// In-memory PIE.
///
/// Raised lines are pending only while enabled. [`pending`] reports the
/// lowest one and clears its flag.
///
/// [`pending`]: InterruptController::pending
#[derive(Debug, Default)]
pub struct SimulatedPie {
    state: Mutex<State>,
}

impl SimulatedPie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag a line as raised.
    pub fn raise(&self, id: InterruptId) {
        self.state.lock().flagged.insert(id);
    }

    pub fn is_enabled(&self, id: InterruptId) -> bool {
        self.state.lock().enabled.contains(&id)
    }

    /// Groups acknowledged so far, in order.
    pub fn acknowledged(&self) -> Vec<u16> {
        self.state.lock().acknowledged.clone()
    }
}

impl InterruptController for SimulatedPie {
    fn enable(&self, id: InterruptId) {
        self.state.lock().enabled.insert(id);
    }

    fn disable(&self, id: InterruptId) {
        self.state.lock().enabled.remove(&id);
    }

    fn pending(&self) -> Option<InterruptId> {
        let mut state = self.state.lock();
        let id = state
            .flagged
            .iter()
            .copied()
            .find(|id| state.enabled.contains(id))?;
        state.flagged.remove(&id);
        Some(id)
    }

    fn acknowledge(&self, group: u16) {
        self.state.lock().acknowledged.push(group);
    }
}
