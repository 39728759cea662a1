//! Audit-related error types.

use std::time::Duration;

use thiserror::Error;
use warden_storage::{IntegrityViolation, StorageError};

/// Errors that can occur with audit logging.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The audit system halted after a failure and refuses further events.
    ///
    /// Callers must treat this as a hard stop for sensitive operations.
    #[error("audit system failed ({last_failure}); sensitive operations are blocked")]
    SystemFailed {
        /// Description of the failure that halted the system.
        last_failure: String,
    },

    /// Too many consecutive failures; the breaker is rejecting events.
    #[error("audit circuit breaker open; retry in {}ms", retry_in.as_millis())]
    CircuitBreakerOpen {
        /// Time left before a trial is allowed.
        retry_in: Duration,
    },

    /// Writing an audit line failed.
    #[error("audit write failed: {0}")]
    Write(String),

    /// Flushing the audit log to stable storage failed.
    #[error("audit sync failed: {0}")]
    Sync(String),

    /// Rotating the audit log failed.
    #[error("audit log rotation failed: {0}")]
    Rotation(String),

    /// Audit storage usage reached the critical threshold.
    #[error("audit storage critical: {used_bytes} of {budget_bytes} bytes used")]
    CapacityCritical {
        /// Bytes currently used by audit files.
        used_bytes: u64,
        /// Configured budget.
        budget_bytes: u64,
    },

    /// The chain could not be persisted within the retry budget.
    #[error("failed to persist audit chain after {attempts} attempts: {reason}")]
    SaveFailed {
        /// Attempts made.
        attempts: u32,
        /// Last error seen.
        reason: String,
    },

    /// The persisted chain failed verification.
    #[error("audit chain integrity compromised: {violation}")]
    ChainCompromised {
        /// What was detected.
        violation: IntegrityViolation,
    },

    /// Key rotation without re-signing would orphan existing entries.
    #[error("key rotation requires re-signing {entries} existing chain entries")]
    ResignRequired {
        /// Number of entries in the chain.
        entries: usize,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error outside the write path.
    #[error("audit I/O error: {0}")]
    Io(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] warden_crypto::CryptoError),
}

impl From<StorageError> for AuditError {
    fn from(err: StorageError) -> Self {
        match err.violation() {
            Some(violation) => Self::ChainCompromised { violation },
            None => Self::Storage(err),
        }
    }
}

impl AuditError {
    /// Whether this error was a rejection without any I/O attempt.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::SystemFailed { .. } | Self::CircuitBreakerOpen { .. }
        )
    }
}

/// Result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_violations_map_to_compromised_chain() {
        let tampered = AuditError::from(StorageError::Integrity {
            store: "chain.json".to_owned(),
            violation: IntegrityViolation::Tampered,
        });
        assert!(matches!(
            tampered,
            AuditError::ChainCompromised {
                violation: IntegrityViolation::Tampered
            }
        ));

        let io = AuditError::from(StorageError::Io("disk full".to_owned()));
        assert!(matches!(io, AuditError::Storage(StorageError::Io(_))));
        assert!(!io.is_rejection());
    }
}
