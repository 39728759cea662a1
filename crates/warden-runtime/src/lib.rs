//! Warden Runtime - assembles the security-state engine.
//!
//! [`SecurityState`] owns one key manager per store, the audit chain, the
//! audit logger and the lockout store, built explicitly from a
//! [`Config`](warden_config::Config) and a [`WardenHome`](warden_config::WardenHome).
//! Nothing is global: tests and embedders may run several engines side by
//! side in different directories.
//!
//! # Example
//!
//! ```rust,no_run
//! use warden_config::{Config, WardenHome};
//! use warden_runtime::SecurityState;
//!
//! # async fn run() -> Result<(), warden_runtime::RuntimeError> {
//! let home = WardenHome::resolve()?;
//! let config = Config::load(&home)?.config;
//! warden_runtime::init_logging(&config)?;
//!
//! let state = SecurityState::open(&config, &home)?;
//! if state.lockout().is_locked("alice") {
//!     // deny
//! }
//! state.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

/// Config sections to domain configs.
pub mod convert;
mod error;
mod state;

pub use error::{RuntimeError, RuntimeResult};
pub use state::{SecurityState, SecurityStatus};

/// Install diagnostic logging from the `[logging]` section.
///
/// # Errors
///
/// Returns an error if the section is invalid or a subscriber is already
/// installed.
pub fn init_logging(config: &warden_config::Config) -> RuntimeResult<()> {
    let log_config = warden_telemetry::LogConfig::try_from(&config.logging)?;
    warden_telemetry::setup_logging(&log_config)?;
    Ok(())
}
