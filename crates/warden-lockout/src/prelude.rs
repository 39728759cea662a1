//! Prelude module - commonly used types for convenient import.
//!
//! Use `use warden_lockout::prelude::*;` to import all essential types.

pub use crate::{LockoutError, LockoutResult};

pub use crate::{AttemptSnapshot, LockoutPolicy, LockoutStats, LockoutStore, LockoutSweeper};
