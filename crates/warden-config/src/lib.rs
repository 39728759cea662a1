//! Warden Config - configuration for the Warden security-state engine.
//!
//! A single [`Config`] is built from three layers, lowest priority first:
//!
//! 1. **Embedded defaults** (`defaults.toml` compiled into the binary)
//! 2. **User file** (`$WARDEN_HOME/config.toml`, default `~/.warden/config.toml`)
//! 3. **Environment overrides** (`WARDEN_LOCKOUT_MAX_ATTEMPTS`, ...; see
//!    [`env::ENV_OVERRIDES`])
//!
//! # Usage
//!
//! ```rust,no_run
//! use warden_config::{Config, WardenHome};
//!
//! let home = WardenHome::resolve().unwrap();
//! home.ensure().unwrap();
//! let resolved = Config::load(&home).unwrap();
//! println!("max attempts: {}", resolved.config.lockout.max_attempts);
//! ```
//!
//! This crate has no dependencies on other Warden crates. Conversion into
//! domain types happens in `warden-runtime`.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

/// Environment variable overrides.
pub mod env;
/// Configuration error types.
pub mod error;
/// The state directory layout.
pub mod home;
/// Configuration file loading.
pub mod loader;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use home::{HOME_ENV_VAR, WardenHome};
pub use loader::ResolvedConfig;
pub use types::*;

impl Config {
    /// Load the configuration for `home` using the process environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the user file is malformed, an override
    /// cannot be parsed, or the result fails validation.
    pub fn load(home: &WardenHome) -> ConfigResult<ResolvedConfig> {
        loader::load(Some(home.config_path().as_path()), &env::collect_env_vars())
    }

    /// Load with an explicit environment map.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub fn load_with_env(
        home: &WardenHome,
        env: &std::collections::HashMap<String, String>,
    ) -> ConfigResult<ResolvedConfig> {
        loader::load(Some(home.config_path().as_path()), env)
    }
}
