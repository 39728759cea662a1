//! Telemetry error types.

use thiserror::Error;

/// Errors from setting up diagnostic logging.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The level, format or a directive is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A global subscriber is already installed.
    #[error("Initialization error: {0}")]
    InitError(String),
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
