//! Event configuration errors.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using [`EventConfigError`].
pub type Result<T> = std::result::Result<T, EventConfigError>;

/// A problem found while validating an event configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    /// Two events share a code.
    DuplicateEvent { code: u32 },
    /// Two steps of one event share an id.
    DuplicateStep { code: u32, step: u32 },
    /// Step id 0 marks the end of a sequence and cannot be declared.
    ReservedStepId { code: u32 },
    /// `root_step` names no step of the event.
    MissingRootStep { code: u32, step: u32 },
    /// A scenario override names no step of the event.
    MissingScenarioRoot { code: u32, scenario: u32, step: u32 },
    /// A `next_on_*` target names no step of the event.
    DanglingTarget { code: u32, step: u32, target: u32 },
    /// A loop through ACT/ALM steps only; nothing would ever stop it.
    UnattendedCycle { code: u32, steps: Vec<u32> },
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigIssue::DuplicateEvent { code } => write!(f, "event {} declared twice", code),
            ConfigIssue::DuplicateStep { code, step } => {
                write!(f, "event {}: step {} declared twice", code, step)
            }
            ConfigIssue::ReservedStepId { code } => {
                write!(f, "event {}: step id 0 is reserved for end of sequence", code)
            }
            ConfigIssue::MissingRootStep { code, step } => {
                write!(f, "event {}: root step {} does not exist", code, step)
            }
            ConfigIssue::MissingScenarioRoot {
                code,
                scenario,
                step,
            } => write!(
                f,
                "event {}: root step {} of scenario {} does not exist",
                code, step, scenario
            ),
            ConfigIssue::DanglingTarget { code, step, target } => write!(
                f,
                "event {}: step {} continues with missing step {}",
                code, step, target
            ),
            ConfigIssue::UnattendedCycle { code, steps } => {
                let path: Vec<String> = steps.iter().map(|s| s.to_string()).collect();
                write!(
                    f,
                    "event {}: steps {} loop without a MSG step",
                    code,
                    path.join(" -> ")
                )
            }
        }
    }
}

/// Event configuration errors.
#[derive(Debug, Error)]
pub enum EventConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{} configuration problem(s): {}", .0.len(), join(.0))]
    Invalid(Vec<ConfigIssue>),
}

fn join(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for EventConfigError {
    fn from(e: serde_json::Error) -> Self {
        EventConfigError::Parse(e.to_string())
    }
}

impl From<toml::de::Error> for EventConfigError {
    fn from(e: toml::de::Error) -> Self {
        EventConfigError::Parse(e.to_string())
    }
}

impl From<EventConfigError> for histo_core::Error {
    fn from(e: EventConfigError) -> Self {
        histo_core::Error::Config(e.to_string())
    }
}
