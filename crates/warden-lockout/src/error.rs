//! Lockout error types.

use chrono::{DateTime, Utc};
use thiserror::Error;
use warden_storage::{IntegrityViolation, StorageError};

/// Errors from the lockout store.
#[derive(Debug, Error)]
pub enum LockoutError {
    /// The identifier is locked out.
    #[error("{identifier} is locked out{}", until.map(|u| format!(" until {}", u.to_rfc3339())).unwrap_or_default())]
    Locked {
        /// Masked identifier.
        identifier: String,
        /// When the lock expires; `None` for instant-lockout policies.
        until: Option<DateTime<Utc>>,
    },

    /// The store cannot trust its persisted state and denies everything.
    #[error("lockout store is in paranoid mode ({}); operator action required", violation.map_or_else(|| "state unverifiable".to_string(), |v| v.to_string()))]
    Paranoid {
        /// What was detected, if the state was readable at all.
        violation: Option<IntegrityViolation>,
    },

    /// No record exists for the identifier.
    #[error("identifier not found: {identifier}")]
    NotFound {
        /// Masked identifier.
        identifier: String,
    },

    /// The identifier is not locked.
    #[error("identifier not locked: {identifier}")]
    NotLocked {
        /// Masked identifier.
        identifier: String,
    },

    /// Persisting the lockout state failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Key error.
    #[error("crypto error: {0}")]
    Crypto(#[from] warden_crypto::CryptoError),
}

impl LockoutError {
    /// Whether this error denies the authentication attempt.
    ///
    /// Every lockout error does; storage and key failures deny too.
    #[must_use]
    pub fn is_denial(&self) -> bool {
        !matches!(self, Self::NotFound { .. } | Self::NotLocked { .. })
    }
}

/// Result type for lockout operations.
pub type LockoutResult<T> = Result<T, LockoutError>;
