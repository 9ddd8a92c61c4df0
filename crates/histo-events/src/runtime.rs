//! Per-occurrence runtime state of an event.

use chrono::{DateTime, Utc};
use histo_core::{ActionResult, EventKey, SystemEvent};
use uuid::Uuid;

use crate::config::ButtonType;

/// Tracks one raised event while its action sequence runs.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRuntimeInfo {
    pub key: EventKey,
    /// Correlation id for log output
    pub correlation: Uuid,
    pub event_id: u32,
    pub scenario: u32,
    pub source: String,
    pub raised_at: DateTime<Utc>,
    /// Step being executed, `0` before the first step
    pub current_step: u32,
    /// Waiting for the result of `current_step`
    pub awaiting_result: bool,
    pub last_result: Option<ActionResult>,
    /// Buttons of the operator prompt currently shown
    pub pending_selection: Option<ButtonType>,
    /// Translation arguments, one list per raise or update
    pub string_args: Vec<Vec<String>>,
}

impl EventRuntimeInfo {
    pub fn new(key: EventKey, event: &SystemEvent) -> Self {
        Self {
            key,
            correlation: Uuid::new_v4(),
            event_id: event.event_id,
            scenario: event.scenario,
            source: event.source.clone(),
            raised_at: event.raised_at,
            current_step: 0,
            awaiting_result: false,
            last_result: None,
            pending_selection: None,
            string_args: vec![event.string_args.clone()],
        }
    }

    /// Arguments of the latest raise or update.
    pub fn latest_args(&self) -> &[String] {
        self.string_args
            .iter()
            .rev()
            .find(|l| !l.is_empty())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn enter_step(&mut self, step: u32) {
        self.current_step = step;
        self.awaiting_result = false;
        self.pending_selection = None;
    }
}
