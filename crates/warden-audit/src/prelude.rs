//! Prelude module - commonly used types for convenient import.
//!
//! Use `use warden_audit::prelude::*;` to import all essential types.

// Errors
pub use crate::{AuditError, AuditResult};

// Events
pub use crate::{AuditEvent, event_types};

// Logger
pub use crate::{AuditLogger, AuditLoggerConfig, AuditSink, FileSink, LogSink};

// Chain and verification
pub use crate::{ChainConfig, ChainEntry, ChainIssue, ChainProtector, ChainVerification, TamperReport};
