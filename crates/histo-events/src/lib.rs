//! Event handling for the HistoCore instrument controller.
//!
//! - Event, scenario and action step configuration with load-time checks
//! - The event/action hub interpreting configured action sequences
//! - String translation for log lines and operator prompts
//! - The daily event log file
//! - The event handler thread handler tying these together

pub mod commands;
pub mod config;
pub mod error;
pub mod handler;
pub mod hub;
pub mod log;
pub mod runtime;
pub mod translator;

pub use commands::{CmdEventAction, CmdShowEventMessage, NotifyEventInfo, NotifySystemEvent};
pub use config::{
    AlarmType, AuthorityType, ButtonType, Disposition, ErrorType, EventCatalog, EventConfig,
    LogLevel, StepConfig, StepType,
};
pub use error::{ConfigIssue, EventConfigError};
pub use handler::{EVENT_HANDLER, EventHandler};
pub use hub::{EventActionHub, HubEffect};
pub use log::{DataLogger, LogEntry};
pub use runtime::EventRuntimeInfo;
pub use translator::Translator;
