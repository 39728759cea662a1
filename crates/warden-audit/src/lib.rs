//! Warden Audit - fail-secure audit logging with an HMAC-linked chain.
//!
//! This crate provides:
//! - Secret redaction for every free-text event field
//! - A line-oriented, human-auditable log with size-based rotation
//! - Storage capacity monitoring with warning and critical thresholds
//! - The AU-5 failure response: circuit breaker and halt-on-failure
//! - A tamper-evident chain of event digests persisted as a signed envelope
//!
//! # Security Model
//!
//! Every logged event is:
//! - Redacted before it is written or hashed
//! - Written and synced before `log` returns
//! - Linked to the previous event via `HMAC(key, digest || previous_hash)`
//!
//! A failed audit write is never silently dropped. With `halt_on_failure`
//! (the default) the first failure halts the logger and every later call
//! fails with [`AuditError::SystemFailed`], so callers that gate sensitive
//! actions on the audit record are blocked too.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use warden_audit::{AuditEvent, AuditLogger, AuditLoggerConfig, ChainConfig, ChainProtector};
//! use warden_crypto::{KeyManager, KeyManagerConfig};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let keys = KeyManager::new(KeyManagerConfig::audit(dir.path()));
//! keys.load_with_env(&Default::default()).unwrap();
//!
//! let chain = Arc::new(ChainProtector::open(dir.path(), Arc::new(keys), ChainConfig::default()).unwrap());
//! let logger = AuditLogger::open(dir.path().join("audit.log"), AuditLoggerConfig::default())
//!     .unwrap()
//!     .with_chain(Arc::clone(&chain));
//!
//! logger.log(AuditEvent::new("STARTUP").with_session("s-1")).unwrap();
//! assert!(chain.verify_chain().unwrap().valid);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod breaker;
mod capacity;
mod chain;
mod error;
mod event;
mod logger;
mod redact;
mod sink;
mod verify;
mod witness;

pub use breaker::{BreakerConfig, BreakerState};
pub use capacity::{CapacityLevel, CapacityPolicy, CapacityStatus};
pub use chain::{CHAIN_FILE, ChainConfig, ChainEntry, ChainProtector, ChainRotation, WITNESS_FILE};
pub use error::{AuditError, AuditResult};
pub use event::{AuditEvent, event_types};
pub use logger::{AuditLogger, AuditLoggerConfig, DEFAULT_MAX_FILE_SIZE, FailureCallback};
pub use redact::{MAX_QUERY_CHARS, PatternRedactor, RedactionSet, Redactor, truncate_query};
pub use sink::{AuditSink, FileSink, LogSink};
pub use verify::{ChainIssue, ChainVerification, TamperReport};
