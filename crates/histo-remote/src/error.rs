//! Remote subsystem errors.

use thiserror::Error;

/// Result type alias using [`RemoteError`].
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Errors of the process supervisor and the network device.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Process {0} is already running")]
    AlreadyRunning(String),

    #[error("Failed to signal process {name}: {reason}")]
    Signal { name: String, reason: String },

    #[error("Command frame: {0}")]
    Frame(String),

    #[error(transparent)]
    Core(#[from] histo_core::Error),
}

impl From<RemoteError> for histo_core::Error {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Io(io) => histo_core::Error::Io(io),
            RemoteError::Json(_) | RemoteError::Protocol(_) | RemoteError::Frame(_) => {
                histo_core::Error::Codec(e.to_string())
            }
            RemoteError::Core(core) => core,
            other => histo_core::Error::Hardware(other.to_string()),
        }
    }
}
