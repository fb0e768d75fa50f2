//! Common error types for bus manager operations

use thiserror::Error;

/// Bus manager errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// Port, unit, channel or pin number out of range
    #[error("invalid parameter")]
    InvalidParameter,
    /// Pins already latched for this port
    #[error("already configured")]
    AlreadyConfigured,
    /// `configure` has not been called for this port
    #[error("not configured")]
    NotConfigured,
    /// The unit has no live driver handle
    #[error("not acquired")]
    NotAcquired,
    /// Peripheral stayed busy
    #[error("peripheral busy")]
    Busy,
    /// Operation timed out
    #[error("operation timeout")]
    Timeout,
    /// Driver-specific error code
    #[error("driver error code: {0}")]
    Driver(i32),
}

/// Result type for bus manager operations
pub type HalResult<T> = Result<T, HalError>;

/// Status reported by a driver implementation
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    #[error("driver timeout")]
    Timeout,
    #[error("driver busy")]
    Busy,
    #[error("driver error code: {0}")]
    Other(i32),
}

impl DriverError {
    /// Transient conditions that a read may retry.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Timeout | Self::Busy)
    }
}

impl From<DriverError> for HalError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Timeout => Self::Timeout,
            DriverError::Busy => Self::Busy,
            DriverError::Other(code) => Self::Driver(code),
        }
    }
}
