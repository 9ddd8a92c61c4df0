//! Device error types.

/// Device error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("Device {0} is busy")]
    Busy(String),

    #[error("Invalid channel: {0}")]
    InvalidChannel(u8),

    #[error("Hardware request failed: {0}")]
    Hardware(String),

    #[error("Device not connected: {0}")]
    NotConnected(String),
}

impl From<DeviceError> for histo_core::Error {
    fn from(e: DeviceError) -> Self {
        histo_core::Error::Hardware(e.to_string())
    }
}

/// Result type alias using [`DeviceError`].
pub type Result<T> = std::result::Result<T, DeviceError>;
