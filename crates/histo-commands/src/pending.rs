//! Outstanding commands awaiting their acknowledge.
//!
//! A sent command is tracked under its reference until the acknowledge
//! arrives or its deadline passes, whichever comes first. Whatever comes
//! second finds nothing and is ignored.

use std::collections::HashMap;

use histo_core::{Reference, Timeout};
use tokio::time::Instant;

/// One command waiting for its acknowledge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    /// Reference the command was sent with
    pub reference: Reference,
    /// Command type name
    pub name: &'static str,
    /// When it was sent
    pub sent_at: Instant,
    /// Acknowledge deadline, `None` for `NOTIMEOUT` commands
    pub deadline: Option<Instant>,
}

/// Reference-keyed table of outstanding commands.
#[derive(Debug, Default)]
pub struct PendingCommands {
    pending: HashMap<Reference, PendingCommand>,
}

impl PendingCommands {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a command sent at `now`.
    pub fn register(&mut self, reference: Reference, name: &'static str, timeout: Timeout, now: Instant) {
        let deadline = timeout.as_duration().map(|d| now + d);
        self.pending.insert(
            reference,
            PendingCommand {
                reference,
                name,
                sent_at: now,
                deadline,
            },
        );
    }

    /// Remove the entry for an arriving acknowledge.
    pub fn take(&mut self, reference: Reference) -> Option<PendingCommand> {
        self.pending.remove(&reference)
    }

    /// Remove and return every entry whose deadline is at or before `now`,
    /// earliest first.
    pub fn take_expired(&mut self, now: Instant) -> Vec<PendingCommand> {
        let expired: Vec<Reference> = self
            .pending
            .values()
            .filter(|p| p.deadline.is_some_and(|d| d <= now))
            .map(|p| p.reference)
            .collect();

        let mut out: Vec<PendingCommand> = expired
            .into_iter()
            .filter_map(|r| self.pending.remove(&r))
            .collect();
        out.sort_by_key(|p| (p.deadline, p.reference));
        out
    }

    /// Earliest deadline of all tracked commands.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().filter_map(|p| p.deadline).min()
    }

    /// Whether `reference` is outstanding.
    pub fn contains(&self, reference: Reference) -> bool {
        self.pending.contains_key(&reference)
    }

    /// Number of outstanding commands.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
