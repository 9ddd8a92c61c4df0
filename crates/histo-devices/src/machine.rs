//! Common contract of device state machines.
//!
//! A device machine is a tagged state plus a transition function. Each
//! input yields the next state and at most one outcome for the caller.
//! Machines are driven synchronously from their controller's task: the
//! initiating request and every later hardware report are separate inputs.

use std::fmt::Debug;

/// Result of one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<S, O> {
    /// State after the input
    pub next: S,
    /// Outcome to report, if the operation finished
    pub outcome: Option<O>,
}

impl<S, O> Transition<S, O> {
    /// Move to `next` without finishing.
    pub fn to(next: S) -> Self {
        Self {
            next,
            outcome: None,
        }
    }

    /// Finish the operation in `next` with `outcome`.
    pub fn finish(next: S, outcome: O) -> Self {
        Self {
            next,
            outcome: Some(outcome),
        }
    }
}

/// A device state machine.
pub trait DeviceStateMachine {
    /// State tag.
    type State: Copy + PartialEq + Debug;
    /// Requests and hardware reports.
    type Input;
    /// Operation result.
    type Outcome;

    /// Current state.
    fn state(&self) -> Self::State;

    /// Whether no operation is in progress.
    fn is_idle(&self) -> bool;

    /// Feed one input.
    fn handle(&mut self, input: Self::Input) -> Option<Self::Outcome>;
}
