//! Storage error types.

use std::fmt;

use serde::{Deserialize, Serialize};
use warden_crypto::CryptoError;

/// Why a store's persisted state cannot be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityViolation {
    /// The state file is gone although the store has written or read it
    /// before, or its key proves prior use.
    Missing,
    /// The signature does not match the content.
    Tampered,
    /// The file is not a well-formed signed envelope.
    Corrupt,
    /// The file verifies, but it is not the state this process last wrote.
    RolledBack,
}

impl IntegrityViolation {
    /// Stable event-name suffix (`DELETED`, `TAMPERED`, ...).
    #[must_use]
    pub fn event_suffix(self) -> &'static str {
        match self {
            Self::Missing => "DELETED",
            Self::Tampered => "TAMPERED",
            Self::Corrupt => "CORRUPTED",
            Self::RolledBack => "ROLLED_BACK",
        }
    }
}

impl fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "state file missing"),
            Self::Tampered => write!(f, "signature mismatch"),
            Self::Corrupt => write!(f, "state file corrupt"),
            Self::RolledBack => write!(f, "state file replaced by an older signed copy"),
        }
    }
}

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Persisted state failed verification; the store is now paranoid.
    #[error("integrity violation in {store}: {violation}")]
    Integrity {
        /// Store description (usually its path).
        store: String,
        /// What was detected.
        violation: IntegrityViolation,
    },

    /// The store is in paranoid mode and refuses the operation.
    #[error("{store} is in paranoid mode ({violation}); operator action required")]
    Paranoid {
        /// Store description (usually its path).
        store: String,
        /// The violation that triggered paranoid mode.
        violation: IntegrityViolation,
    },

    /// Reading or writing the backend failed.
    #[error("storage I/O error: {0}")]
    Io(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Key error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl StorageError {
    /// The integrity violation behind this error, if any.
    #[must_use]
    pub fn violation(&self) -> Option<IntegrityViolation> {
        match self {
            Self::Integrity { violation, .. } | Self::Paranoid { violation, .. } => {
                Some(*violation)
            },
            _ => None,
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
