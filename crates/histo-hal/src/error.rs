//! Firmware error codes.
//!
//! A code is 16 bits wide: the high byte is the [`ErrorCategory`], the low
//! byte numbers the error within its category.

use thiserror::Error;

/// Result type alias using [`HalError`].
pub type Result<T> = std::result::Result<T, HalError>;

/// Error category, the high byte of an [`ErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    General,
    Parameter,
    Module,
    Hardware,
    Timeout,
}

impl ErrorCategory {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(ErrorCategory::General),
            0x01 => Some(ErrorCategory::Parameter),
            0x02 => Some(ErrorCategory::Module),
            0x03 => Some(ErrorCategory::Hardware),
            0x04 => Some(ErrorCategory::Timeout),
            _ => None,
        }
    }
}

/// Firmware error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    /// Category, `None` for codes outside the known ranges.
    pub fn category(self) -> Option<ErrorCategory> {
        ErrorCategory::from_byte((self.0 >> 8) as u8)
    }

    pub fn is_ok(self) -> bool {
        self == codes::NO_ERROR
    }

    /// Description of the code.
    pub fn as_str(self) -> &'static str {
        error_string(self.0)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X} {}", self.0, self.as_str())
    }
}

/// Known error codes.
pub mod codes {
    use super::ErrorCode;

    pub const NO_ERROR: ErrorCode = ErrorCode(0x0000);
    pub const GENERAL_FAILURE: ErrorCode = ErrorCode(0x0001);
    pub const NOT_SUPPORTED: ErrorCode = ErrorCode(0x0002);

    pub const PARAM_OUT_OF_RANGE: ErrorCode = ErrorCode(0x0101);
    pub const PARAM_NULL: ErrorCode = ErrorCode(0x0102);
    pub const PARAM_INVALID_INTERRUPT: ErrorCode = ErrorCode(0x0103);

    pub const MODULE_NOT_INITIALIZED: ErrorCode = ErrorCode(0x0201);
    pub const MODULE_BUSY: ErrorCode = ErrorCode(0x0202);
    pub const MODULE_ALREADY_OPEN: ErrorCode = ErrorCode(0x0203);

    pub const HW_FAILURE: ErrorCode = ErrorCode(0x0301);
    pub const HW_NOT_RESPONDING: ErrorCode = ErrorCode(0x0302);
    pub const HW_SPURIOUS_INTERRUPT: ErrorCode = ErrorCode(0x0303);

    pub const TIMEOUT: ErrorCode = ErrorCode(0x0401);
    pub const TIMEOUT_BUS: ErrorCode = ErrorCode(0x0402);
}

static ERROR_STRINGS: &[(u16, &str)] = &[
    (0x0000, "no error"),
    (0x0001, "general failure"),
    (0x0002, "function not supported"),
    (0x0101, "parameter out of range"),
    (0x0102, "null parameter"),
    (0x0103, "invalid interrupt id"),
    (0x0201, "module not initialized"),
    (0x0202, "module busy"),
    (0x0203, "module already open"),
    (0x0301, "hardware failure"),
    (0x0302, "hardware not responding"),
    (0x0303, "spurious interrupt"),
    (0x0401, "timeout"),
    (0x0402, "bus timeout"),
];

/// Static description of a firmware error code.
pub fn error_string(code: u16) -> &'static str {
    ERROR_STRINGS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, s)| *s)
        .unwrap_or("unknown error")
}

/// HAL errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HalError {
    #[error("interrupt {id} out of range (0..{count})")]
    InterruptOutOfRange { id: u16, count: u16 },

    #[error("firmware error {0}")]
    Firmware(ErrorCode),
}

impl HalError {
    /// Firmware code of the error.
    pub fn code(&self) -> ErrorCode {
        match self {
            HalError::InterruptOutOfRange { .. } => codes::PARAM_INVALID_INTERRUPT,
            HalError::Firmware(code) => *code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_string() {
        assert_eq!(error_string(0x0302), "hardware not responding");
        assert_eq!(error_string(0x7777), "unknown error");
        assert_eq!(codes::TIMEOUT.as_str(), "timeout");
    }

    #[test]
    fn test_category() {
        assert_eq!(codes::NO_ERROR.category(), Some(ErrorCategory::General));
        assert_eq!(codes::PARAM_NULL.category(), Some(ErrorCategory::Parameter));
        assert_eq!(codes::MODULE_BUSY.category(), Some(ErrorCategory::Module));
        assert_eq!(codes::HW_FAILURE.category(), Some(ErrorCategory::Hardware));
        assert_eq!(codes::TIMEOUT_BUS.category(), Some(ErrorCategory::Timeout));
        assert_eq!(ErrorCode(0x9901).category(), None);
        assert!(codes::NO_ERROR.is_ok());
    }

    #[test]
    fn test_display() {
        assert_eq!(codes::MODULE_BUSY.to_string(), "0x0202 module busy");
        let err = HalError::InterruptOutOfRange { id: 200, count: 96 };
        assert_eq!(err.code(), codes::PARAM_INVALID_INTERRUPT);
        assert_eq!(err.to_string(), "interrupt 200 out of range (0..96)");
    }
}
