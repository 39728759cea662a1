//! Prelude module - commonly used test helpers.
//!
//! Use `use warden_test::prelude::*;` in tests.

pub use crate::fixtures::{TestHome, env_with_keys, test_event, test_key_hex, test_keys};
pub use crate::mocks::{RecordingAuditSink, ScriptedSink};
pub use crate::init_test_logging;
