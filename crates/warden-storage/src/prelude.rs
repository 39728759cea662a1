//! Prelude module - commonly used types for convenient import.
//!
//! Use `use warden_storage::prelude::*;` to import all essential types.

pub use crate::{
    FileBackend, IntegrityStore, IntegrityViolation, MemoryBackend, SignedEnvelope, StateBackend,
    StorageError, StorageResult,
};
