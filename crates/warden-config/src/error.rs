//! Configuration error types.

use std::io;

use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file exists but could not be read.
    #[error("failed to read config file at {path}: {source}")]
    ReadError {
        /// Path of the file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A config file is not valid TOML or does not match the schema.
    #[error("failed to parse config file at {path}: {source}")]
    ParseError {
        /// Path of the file, or `<embedded defaults>`.
        path: String,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range or inconsistent with another value.
    #[error("validation error in field '{field}': {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong.
        message: String,
    },

    /// An environment variable holds an unusable value.
    #[error("environment variable '{var_name}': {message}")]
    EnvError {
        /// Name of the variable.
        var_name: String,
        /// What is wrong.
        message: String,
    },

    /// Neither `WARDEN_HOME` nor a home directory could be determined.
    #[error("could not determine the Warden home directory; set WARDEN_HOME")]
    NoHomeDir,

    /// Creating the state directories failed.
    #[error("failed to prepare {path}: {source}")]
    Layout {
        /// Directory being created.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
