//! System events raised by any subsystem and consumed by the event hub.
//!
//! Raising an event never fails from the caller's point of view. When the
//! event handler is gone the event is written to the diagnostic log instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Error, ErrorCategory};
use crate::services::AdjustedTime;

/// Event codes raised by the infrastructure itself.
pub mod codes {
    /// Inbound command type has no registered handler.
    pub const UNSUPPORTED_COMMAND: u32 = 0x0001_0001;
    /// Notification command arrived with a non-zero timeout.
    pub const TIMEOUT_NOT_ALLOWED: u32 = 0x0001_0002;
    /// Command handler returned an error.
    pub const HANDLER_FAILED: u32 = 0x0001_0003;
    /// Command channel closed or full.
    pub const CHANNEL_ERROR: u32 = 0x0001_0004;
    /// No free reference for an outbound command.
    pub const REFERENCE_EXHAUSTED: u32 = 0x0001_0005;
    /// Acknowledge deadline passed.
    pub const COMMAND_TIMEOUT: u32 = 0x0001_0006;
    /// Configuration or data file rejected.
    pub const CONFIGURATION_ERROR: u32 = 0x0001_0007;
    /// Device reported a failure.
    pub const HARDWARE_ERROR: u32 = 0x0001_0008;
    /// Panic or unclassified failure caught at a dispatch boundary.
    pub const FATAL_ERROR: u32 = 0x0001_00FF;

    /// Default event code for an error category.
    pub fn for_category(category: super::ErrorCategory) -> u32 {
        match category {
            super::ErrorCategory::Protocol => HANDLER_FAILED,
            super::ErrorCategory::ResourceExhaustion => REFERENCE_EXHAUSTED,
            super::ErrorCategory::Hardware => HARDWARE_ERROR,
            super::ErrorCategory::Configuration => CONFIGURATION_ERROR,
            super::ErrorCategory::Fatal => FATAL_ERROR,
        }
    }
}

/// Unique key of one event occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey(pub u64);

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of an action step reported back to the event hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionResult {
    Success,
    Fail,
    Timeout,
}

/// A raised system event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    /// Configured event id
    pub event_id: u32,
    /// Scenario the instrument was in
    pub scenario: u32,
    /// `false` deactivates a previously raised event
    pub active: bool,
    /// Result of the step the event key is waiting on
    pub action_result: Option<ActionResult>,
    /// Translation arguments
    pub string_args: Vec<String>,
    /// Occurrence key, assigned by the hub for new events
    pub key: Option<EventKey>,
    /// Raising component
    pub source: String,
    /// Time of raising
    pub raised_at: DateTime<Utc>,
}

impl SystemEvent {
    /// Create an active event.
    pub fn new(event_id: u32) -> Self {
        Self {
            event_id,
            scenario: 0,
            active: true,
            action_result: None,
            string_args: Vec::new(),
            key: None,
            source: String::new(),
            raised_at: Utc::now(),
        }
    }

    /// Create an event describing an error caught at a dispatch boundary.
    pub fn from_error(error: &Error) -> Self {
        let category = error.category();
        let event_id = match error {
            Error::UnsupportedCommand(_) => codes::UNSUPPORTED_COMMAND,
            Error::TimeoutNotAllowed(_) => codes::TIMEOUT_NOT_ALLOWED,
            Error::ChannelClosed(_) | Error::ChannelFull(_) => codes::CHANNEL_ERROR,
            Error::Timeout(_) => codes::COMMAND_TIMEOUT,
            _ => codes::for_category(category),
        };
        Self::new(event_id).with_args(vec![error.to_string(), category.to_string()])
    }

    /// Set the scenario.
    pub fn with_scenario(mut self, scenario: u32) -> Self {
        self.scenario = scenario;
        self
    }

    /// Set the translation arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.string_args = args;
        self
    }

    /// Set the source component.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Address an existing occurrence.
    pub fn with_key(mut self, key: EventKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Report a step result for an existing occurrence.
    pub fn with_result(mut self, result: ActionResult) -> Self {
        self.action_result = Some(result);
        self
    }

    /// Mark as deactivation.
    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Handle used to raise system events.
#[derive(Debug, Clone)]
pub struct EventReporter {
    tx: Option<mpsc::UnboundedSender<SystemEvent>>,
    source: String,
    clock: Option<AdjustedTime>,
}

impl EventReporter {
    /// Create a reporter and the receiving end for the event handler.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SystemEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                source: "system".to_string(),
                clock: None,
            },
            rx,
        )
    }

    /// Reporter without an event handler; events only reach the log.
    pub fn detached() -> Self {
        Self {
            tx: None,
            source: "system".to_string(),
            clock: None,
        }
    }

    /// Clone with a different default source.
    pub fn for_source(&self, source: impl Into<String>) -> Self {
        Self {
            tx: self.tx.clone(),
            source: source.into(),
            clock: self.clock.clone(),
        }
    }

    /// Stamp reported events with instrument time.
    pub fn with_clock(mut self, clock: AdjustedTime) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Default source name.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Raise an event.
    pub fn report(&self, mut event: SystemEvent) {
        if event.source.is_empty() {
            event.source = self.source.clone();
        }
        if let Some(clock) = &self.clock {
            event.raised_at = clock.now();
        }
        let undelivered = match &self.tx {
            Some(tx) => tx.send(event).err().map(|e| e.0),
            None => Some(event),
        };
        if let Some(event) = undelivered {
            tracing::error!(
                event_id = event.event_id,
                source = %event.source,
                args = ?event.string_args,
                "Event handler unavailable, event logged only"
            );
        }
    }

    /// Raise the event describing `error`.
    pub fn report_error(&self, error: &Error) {
        self.report(SystemEvent::from_error(error));
    }

    /// Raise an event with an explicit code and arguments.
    pub fn raise(&self, event_id: u32, args: Vec<String>) {
        self.report(SystemEvent::new(event_id).with_args(args));
    }
}
