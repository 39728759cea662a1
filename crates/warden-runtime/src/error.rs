//! Runtime error types.

use thiserror::Error;

/// Errors from building or shutting down the engine.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration or state-directory error.
    #[error("configuration error: {0}")]
    Config(#[from] warden_config::ConfigError),

    /// Key loading failed.
    #[error("key error: {0}")]
    Crypto(#[from] warden_crypto::CryptoError),

    /// The audit logger or chain failed.
    #[error("audit error: {0}")]
    Audit(#[from] warden_audit::AuditError),

    /// The lockout store failed.
    #[error("lockout error: {0}")]
    Lockout(#[from] warden_lockout::LockoutError),

    /// Diagnostic logging could not be installed.
    #[error("telemetry error: {0}")]
    Telemetry(#[from] warden_telemetry::TelemetryError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
