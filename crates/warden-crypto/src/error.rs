//! Crypto and key-management error types.

use thiserror::Error;

use crate::key::KeySource;

/// Errors that can occur with signing keys.
///
/// Messages name the variable, path or mode involved so an operator can fix
/// the configuration. They never include key material.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Raw key bytes were not exactly 32 bytes long.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// A MAC tag was not exactly 32 bytes long.
    #[error("invalid MAC tag length: expected {expected} bytes, got {actual}")]
    InvalidTagLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Hex input could not be decoded.
    #[error("invalid hex encoding")]
    InvalidHexEncoding,

    /// A key supplied through an environment variable was rejected.
    #[error("{var} is invalid: {reason} (expected 64 hex characters encoding 32 bytes)")]
    InvalidEnvKey {
        /// The environment variable name.
        var: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A configured key file does not exist.
    #[error("key file not found: {path}")]
    KeyFileMissing {
        /// Path that was checked.
        path: String,
    },

    /// A key file exists but its contents are unusable.
    #[error("invalid key file {path}: {reason}")]
    InvalidKeyFile {
        /// Path of the key file.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A key file is readable by group or others.
    #[error(
        "key file {path} has insecure permissions {mode:04o}; required mode is 0600 (owner read/write only)"
    )]
    InsecurePermissions {
        /// Path of the key file.
        path: String,
        /// Observed permission bits.
        mode: u32,
    },

    /// A key path is a symlink.
    #[error("refusing to use key file {path}: path is a symlink")]
    SymlinkRefused {
        /// Path of the key file.
        path: String,
    },

    /// An operation needed a key before one was loaded (or after close).
    #[error("no signing key loaded for {namespace}")]
    KeyNotLoaded {
        /// Key namespace (e.g. `audit`, `lockout`).
        namespace: String,
    },

    /// Rotation is not possible for this key source.
    #[error(
        "cannot rotate a key sourced from the {key_source}; replace it at the source and restart"
    )]
    RotationUnsupported {
        /// Where the active key came from.
        key_source: KeySource,
    },

    /// A store failed to re-sign its content under a rotated key.
    #[error("re-signing under the rotated key failed: {0}")]
    ResignFailed(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
