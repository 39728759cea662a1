//! Prelude module - commonly used types for convenient import.
//!
//! Use `use warden_runtime::prelude::*;` to import all essential types.

pub use crate::{RuntimeError, RuntimeResult, SecurityState, SecurityStatus};

pub use warden_config::{Config, WardenHome};
