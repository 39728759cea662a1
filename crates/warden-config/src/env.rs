//! `WARDEN_*` environment overrides.
//!
//! Overrides are applied to the merged TOML tree before it is deserialized.
//! Each value is parsed according to the type of the field it replaces.

use std::collections::HashMap;

use crate::error::{ConfigError, ConfigResult};

/// Environment variables and the dotted field each one overrides.
pub const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("WARDEN_LOG_LEVEL", "logging.level"),
    ("WARDEN_LOG_FORMAT", "logging.format"),
    ("WARDEN_LOCKOUT_ENABLED", "lockout.enabled"),
    ("WARDEN_LOCKOUT_MAX_ATTEMPTS", "lockout.max_attempts"),
    ("WARDEN_LOCKOUT_DURATION_SECS", "lockout.duration_secs"),
    ("WARDEN_AUDIT_ENABLED", "audit.enabled"),
    ("WARDEN_AUDIT_MAX_FILE_SIZE", "audit.max_file_size"),
    ("WARDEN_AUDIT_HALT_ON_FAILURE", "audit.halt_on_failure"),
    ("WARDEN_CHAIN_STRICT", "chain.strict"),
];

/// Snapshot the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Apply every override present in `env` to `tree`.
///
/// Returns the names of the variables that were applied.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] if a value cannot be parsed as the
/// field's type.
pub fn apply_env_overrides(
    tree: &mut toml::Value,
    env: &HashMap<String, String>,
) -> ConfigResult<Vec<String>> {
    let mut applied = Vec::new();
    for (var, path) in ENV_OVERRIDES {
        let Some(raw) = env.get(*var).map(|v| v.trim()).filter(|v| !v.is_empty()) else {
            continue;
        };
        let Some(slot) = lookup_mut(tree, path) else {
            continue;
        };
        *slot = parse_like(slot, raw).map_err(|message| ConfigError::EnvError {
            var_name: (*var).to_owned(),
            message,
        })?;
        applied.push((*var).to_owned());
    }
    Ok(applied)
}

fn lookup_mut<'a>(tree: &'a mut toml::Value, path: &str) -> Option<&'a mut toml::Value> {
    path.split('.')
        .try_fold(tree, |node, key| node.as_table_mut()?.get_mut(key))
}

fn parse_like(current: &toml::Value, raw: &str) -> Result<toml::Value, String> {
    match current {
        toml::Value::Boolean(_) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(toml::Value::Boolean(true)),
            "0" | "false" | "no" | "off" => Ok(toml::Value::Boolean(false)),
            _ => Err(format!("expected a boolean, got '{raw}'")),
        },
        toml::Value::Integer(_) => raw
            .parse::<i64>()
            .map(toml::Value::Integer)
            .map_err(|e| format!("expected an integer, got '{raw}': {e}")),
        _ => Ok(toml::Value::String(raw.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> toml::Value {
        toml::from_str(
            r#"
            [lockout]
            enabled = true
            max_attempts = 3

            [logging]
            level = "info"
        "#,
        )
        .unwrap()
    }

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_overrides_follow_field_types() {
        let mut tree = tree();
        let applied = apply_env_overrides(
            &mut tree,
            &env(&[
                ("WARDEN_LOCKOUT_ENABLED", "off"),
                ("WARDEN_LOCKOUT_MAX_ATTEMPTS", "7"),
                ("WARDEN_LOG_LEVEL", "debug"),
            ]),
        )
        .unwrap();

        assert_eq!(applied.len(), 3);
        assert_eq!(tree["lockout"]["enabled"].as_bool(), Some(false));
        assert_eq!(tree["lockout"]["max_attempts"].as_integer(), Some(7));
        assert_eq!(tree["logging"]["level"].as_str(), Some("debug"));
    }

    #[test]
    fn test_bad_value_names_the_variable() {
        let mut tree = tree();
        let err = apply_env_overrides(
            &mut tree,
            &env(&[("WARDEN_LOCKOUT_MAX_ATTEMPTS", "many")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("WARDEN_LOCKOUT_MAX_ATTEMPTS"));
    }

    #[test]
    fn test_blank_and_unknown_fields_are_ignored() {
        let mut tree = tree();
        let applied = apply_env_overrides(
            &mut tree,
            &env(&[("WARDEN_LOG_LEVEL", "  "), ("WARDEN_CHAIN_STRICT", "false")]),
        )
        .unwrap();
        assert!(applied.is_empty());
    }
}
