//! Command and acknowledge value objects.
//!
//! A command is immutable once constructed. It travels as a boxed
//! [`Command`] trait object between thread controllers and as a byte frame
//! (see [`crate::codec`]) across process boundaries. Concrete commands are
//! plain serde structs whose first field is the `timeout`; the
//! [`impl_command!`](crate::impl_command) macro wires them up.

use std::any::Any;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Command timeout in milliseconds. Zero is the `NOTIMEOUT` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Timeout(pub u32);

impl Timeout {
    /// No timeout; the sender does not track an acknowledge deadline.
    pub const NONE: Timeout = Timeout(0);

    /// Timeout in milliseconds.
    pub fn from_millis(ms: u32) -> Self {
        Self(ms)
    }

    /// Whether this is the `NOTIMEOUT` sentinel.
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// Milliseconds.
    pub fn millis(&self) -> u32 {
        self.0
    }

    /// Deadline offset, `None` for [`Timeout::NONE`].
    pub fn as_duration(&self) -> Option<Duration> {
        if self.is_none() {
            None
        } else {
            Some(Duration::from_millis(self.0 as u64))
        }
    }
}

impl std::fmt::Display for Timeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            f.write_str("NOTIMEOUT")
        } else {
            write!(f, "{}ms", self.0)
        }
    }
}

/// Type-erased command.
pub trait Command: Any + Send + std::fmt::Debug {
    /// Type discriminator, unique per command type.
    fn name(&self) -> &'static str;

    /// Acknowledge timeout.
    fn timeout(&self) -> Timeout;

    /// Fire-and-forget commands must not declare a timeout.
    fn is_notification(&self) -> bool {
        false
    }

    /// Borrow as [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Convert into [`Any`] for downcasting by value.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;

    /// Serialize the command fields in declaration order.
    fn encode_body(&self) -> Result<Vec<u8>>;
}

/// A concrete command type with a compile-time name.
pub trait NamedCommand: Command + Serialize + DeserializeOwned + Sized {
    /// Type discriminator.
    const NAME: &'static str;
}

/// Acknowledge status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckStatus {
    /// Command executed.
    Ok,
    /// Command refused or failed.
    Nok,
}

/// Severity attached to an acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
    Fatal,
}

/// Acknowledge for a previously sent command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledge {
    /// Outcome
    pub status: AckStatus,
    /// Optional message text
    pub text: Option<String>,
    /// Severity classification
    pub severity: Severity,
}

impl Acknowledge {
    /// Positive acknowledge.
    pub fn ok() -> Self {
        Self {
            status: AckStatus::Ok,
            text: None,
            severity: Severity::Info,
        }
    }

    /// Positive acknowledge with text.
    pub fn ok_with(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::ok()
        }
    }

    /// Negative acknowledge.
    pub fn nok(text: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Nok,
            text: Some(text.into()),
            severity: Severity::Error,
        }
    }

    /// Override the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Whether the command succeeded.
    pub fn is_ok(&self) -> bool {
        self.status == AckStatus::Ok
    }
}

/// Whether a type-erased command is a `C`.
pub fn is<C: NamedCommand>(cmd: &dyn Command) -> bool {
    cmd.as_any().is::<C>()
}

/// Downcast a boxed command into its concrete type.
pub fn downcast<C: NamedCommand>(cmd: Box<dyn Command>) -> Option<C> {
    cmd.into_any().downcast::<C>().ok().map(|c| *c)
}
