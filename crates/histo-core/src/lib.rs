//! Core traits and types for the HistoCore instrument controller.
//!
//! This crate defines the primitives every subsystem is built on:
//! command and acknowledge value objects, reference handles for
//! command correlation, the command wire codec, the system event
//! reporter and the explicitly constructed process services.

pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod macros;
pub mod notify;
pub mod password;
pub mod reference;
pub mod services;

pub use codec::CommandCodec;
pub use command::{AckStatus, Acknowledge, Command, NamedCommand, Severity, Timeout};
pub use config::SystemConfig;
pub use error::{Error, ErrorCategory, Result};
pub use event::{ActionResult, EventKey, EventReporter, SystemEvent};
pub use notify::{NotificationBus, NotificationReceiver, StateNotification};
pub use reference::{Reference, ReferenceManager};
pub use services::{AdjustedTime, SystemPaths};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::command::{AckStatus, Acknowledge, Command, NamedCommand, Severity, Timeout};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::event::{ActionResult, EventKey, EventReporter, SystemEvent};
    pub use crate::reference::{Reference, ReferenceManager};
}
