//! Warden Lockout - integrity-protected brute-force protection.
//!
//! Tracks failed authentication attempts per identifier and locks an
//! identifier out once it reaches the policy limit. State is persisted as a
//! signed envelope and re-verified on every call; any sign of deletion,
//! alteration or rollback switches the store into paranoid mode, where every
//! identifier is treated as locked until an operator intervenes.
//!
//! Identifiers are stored as SHA-256 digests and only ever appear masked
//! (`hash:` plus 12 hex characters) in logs, errors and audit events.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use warden_crypto::{KeyManager, KeyManagerConfig};
//! use warden_lockout::{LockoutPolicy, LockoutStore};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let keys = KeyManager::new(KeyManagerConfig::lockout(dir.path()));
//! keys.load_with_env(&Default::default()).unwrap();
//!
//! let store = LockoutStore::open(dir.path(), Arc::new(keys), LockoutPolicy::default()).unwrap();
//! for _ in 0..3 {
//!     store.record_attempt("alice", false).unwrap();
//! }
//! assert!(store.is_locked("alice"));
//! assert!(store.record_attempt("alice", true).is_err());
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod record;
mod store;
mod sweeper;

pub use error::{LockoutError, LockoutResult};
pub use record::{
    AttemptRecord, AttemptSnapshot, CleanupSummary, LockedIdentifier, LockoutState, LockoutStats,
    identifier_key, mask_identifier,
};
pub use store::{LockoutPolicy, LockoutStore, STATE_FILE, events};
pub use sweeper::{DEFAULT_SWEEP_INTERVAL, LockoutSweeper};
