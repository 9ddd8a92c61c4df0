//! Error types shared by every subsystem.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used when an error is turned into a system event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Malformed or unregistered command, forbidden timeout.
    Protocol,
    /// Reference pool or connection slots used up.
    ResourceExhaustion,
    /// A device reported a failure.
    Hardware,
    /// Configuration or data file could not be used.
    Configuration,
    /// Anything unexpected caught at a dispatch boundary.
    Fatal,
}

impl ErrorCategory {
    /// Get the category name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::ResourceExhaustion => "resource_exhaustion",
            ErrorCategory::Hardware => "hardware",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Reference pool exhausted: all {capacity} references are blocked")]
    ReferenceExhausted { capacity: u64 },

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("Command already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Command {0} must not carry a timeout")]
    TimeoutNotAllowed(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Channel full: {0}")]
    ChannelFull(String),

    #[error("No acknowledge for {0} in time")]
    Timeout(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Handler panicked: {0}")]
    Panic(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Classify the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::UnsupportedCommand(_)
            | Error::AlreadyRegistered(_)
            | Error::TimeoutNotAllowed(_)
            | Error::Codec(_)
            | Error::Timeout(_)
            | Error::ChannelClosed(_) => ErrorCategory::Protocol,
            Error::ReferenceExhausted { .. } | Error::ChannelFull(_) => {
                ErrorCategory::ResourceExhaustion
            }
            Error::Hardware(_) => ErrorCategory::Hardware,
            Error::Config(_) | Error::Serialization(_) | Error::Io(_) => {
                ErrorCategory::Configuration
            }
            Error::InvalidState(_) | Error::Panic(_) => ErrorCategory::Fatal,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        assert_eq!(
            Error::ReferenceExhausted { capacity: 256 }.category(),
            ErrorCategory::ResourceExhaustion
        );
        assert_eq!(
            Error::UnsupportedCommand("CmdX".into()).category(),
            ErrorCategory::Protocol
        );
        assert_eq!(Error::Hardware("rfid".into()).category(), ErrorCategory::Hardware);
        assert_eq!(Error::Config("bad".into()).category(), ErrorCategory::Configuration);
        assert_eq!(Error::Panic("boom".into()).category(), ErrorCategory::Fatal);
    }

    #[test]
    fn test_error_display() {
        let err = Error::AlreadyRegistered("CmdReadRackRfid".into());
        assert_eq!(err.to_string(), "Command already registered: CmdReadRackRfid");
    }
}
