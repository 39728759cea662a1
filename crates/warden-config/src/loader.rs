//! Config file loading.
//!
//! 1. Parse the embedded `defaults.toml`
//! 2. Merge the user file (`$WARDEN_HOME/config.toml`) if it exists
//! 3. Apply `WARDEN_*` environment overrides
//! 4. Deserialize into [`Config`]
//! 5. Validate

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};

use crate::env::apply_env_overrides;
use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Largest accepted config file, 1 MiB.
const MAX_CONFIG_FILE_SIZE: usize = 1_048_576;

/// A loaded configuration and where it came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The validated configuration.
    pub config: Config,
    /// Config files that were merged, in order.
    pub loaded_files: Vec<String>,
    /// Environment variables that overrode a value.
    pub env_overrides: Vec<String>,
}

/// Load defaults, the optional user file at `user_path` and the overrides
/// found in `env`.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is unreadable or malformed, an
/// override cannot be parsed, or the result fails validation.
pub fn load(user_path: Option<&Path>, env: &HashMap<String, String>) -> ConfigResult<ResolvedConfig> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;
    let mut loaded_files = Vec::new();

    if let Some(path) = user_path
        && let Some(overlay) = try_load_file(path)?
    {
        deep_merge(&mut merged, &overlay);
        loaded_files.push(path.display().to_string());
        info!(path = %path.display(), "loaded user config");
    }

    let env_overrides = apply_env_overrides(&mut merged, env)?;
    if !env_overrides.is_empty() {
        debug!(vars = ?env_overrides, "applied environment overrides");
    }

    let config: Config = merged
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: "<merged config>".to_owned(),
            source: e,
        })?;
    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        loaded_files,
        env_overrides,
    })
}

/// Load a single file on top of the defaults, with no environment overrides.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is missing, unreadable, malformed
/// or invalid.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    if try_load_file(path)?.is_none() {
        return Err(ConfigError::ReadError {
            path: path.display().to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
    }
    load(Some(path), &HashMap::new()).map(|resolved| resolved.config)
}

/// Read and parse a TOML file; `None` if it does not exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    toml::from_str(&content)
        .map(Some)
        .map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            source: e,
        })
}

/// Merge `overlay` into `base`: tables recursively, everything else replaced.
fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_table.insert(key.clone(), value.clone());
                    },
                }
            }
        },
        (base, overlay) => *base = overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_default_impl() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_without_user_file() {
        let resolved = load(None, &HashMap::new()).unwrap();
        assert!(resolved.loaded_files.is_empty());
        assert_eq!(resolved.config.lockout.max_attempts, 3);
        assert!(resolved.config.chain.strict);
    }

    #[test]
    fn test_user_file_overrides_only_its_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[lockout]\nmax_attempts = 5\n\n[chain]\nstrict = false\n",
        )
        .unwrap();

        let resolved = load(Some(path.as_path()), &HashMap::new()).unwrap();
        assert_eq!(resolved.loaded_files.len(), 1);
        assert_eq!(resolved.config.lockout.max_attempts, 5);
        assert_eq!(resolved.config.lockout.duration_secs, 900);
        assert!(!resolved.config.chain.strict);
        assert_eq!(resolved.config.chain.max_retries, 3);
    }

    #[test]
    fn test_env_beats_user_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[lockout]\nmax_attempts = 5\n").unwrap();
        let env = HashMap::from([("WARDEN_LOCKOUT_MAX_ATTEMPTS".to_owned(), "9".to_owned())]);

        let resolved = load(Some(path.as_path()), &env).unwrap();
        assert_eq!(resolved.config.lockout.max_attempts, 9);
        assert_eq!(resolved.env_overrides, vec!["WARDEN_LOCKOUT_MAX_ATTEMPTS"]);
    }

    #[test]
    fn test_invalid_user_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[audit]\ncapacity_warning_pct = 99\n").unwrap();
        assert!(matches!(
            load(Some(path.as_path()), &HashMap::new()),
            Err(ConfigError::ValidationError { .. })
        ));

        std::fs::write(&path, "[audit\n").unwrap();
        assert!(matches!(
            load(Some(path.as_path()), &HashMap::new()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_load_file_requires_the_file() {
        let result = load_file(Path::new("/nonexistent/warden/config.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_oversized_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.toml");
        let data = "x = \"".to_owned() + &"a".repeat(1_100_000) + "\"";
        std::fs::write(&path, data).unwrap();

        assert!(matches!(
            try_load_file(&path),
            Err(ConfigError::ValidationError { .. })
        ));
    }
}
