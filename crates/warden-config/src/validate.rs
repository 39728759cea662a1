//! Post-merge validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Longest accepted lock, one year.
const MAX_LOCKOUT_SECS: u64 = 31_536_000;

/// Smallest accepted rotation size, 64 KiB.
const MIN_FILE_SIZE: u64 = 65_536;

/// Longest accepted retry base delay, one minute.
const MAX_BASE_DELAY_MS: u64 = 60_000;

/// Upper bound on save attempts per chain append.
const MAX_RETRIES: u32 = 20;

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

/// Validate a merged configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_keys(config)?;
    validate_lockout(config)?;
    validate_audit(config)?;
    validate_chain(config)?;
    validate_logging(config)?;
    Ok(())
}

fn validate_keys(config: &Config) -> ConfigResult<()> {
    let k = &config.keys;
    let vars = [
        ("keys.audit_env_var", &k.audit_env_var),
        ("keys.audit_file_env_var", &k.audit_file_env_var),
        ("keys.lockout_env_var", &k.lockout_env_var),
        ("keys.lockout_file_env_var", &k.lockout_file_env_var),
    ];
    for (field, name) in vars {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid(
                field,
                format!("'{name}' is not a valid environment variable name"),
            ));
        }
    }
    if k.audit_env_var == k.lockout_env_var || k.audit_file_env_var == k.lockout_file_env_var {
        return Err(invalid(
            "keys",
            "the audit and lockout stores must not share key variables",
        ));
    }
    Ok(())
}

fn validate_lockout(config: &Config) -> ConfigResult<()> {
    let l = &config.lockout;
    if l.duration_secs == 0 || l.duration_secs > MAX_LOCKOUT_SECS {
        return Err(invalid(
            "lockout.duration_secs",
            format!("must be between 1 and {MAX_LOCKOUT_SECS}"),
        ));
    }
    Ok(())
}

fn validate_audit(config: &Config) -> ConfigResult<()> {
    let a = &config.audit;
    if a.log_file.is_empty() || a.log_file.contains(['/', '\\']) {
        return Err(invalid(
            "audit.log_file",
            "must be a plain file name inside the audit directory",
        ));
    }
    if a.max_file_size < MIN_FILE_SIZE {
        return Err(invalid(
            "audit.max_file_size",
            format!("must be at least {MIN_FILE_SIZE} bytes"),
        ));
    }
    if a.breaker_threshold == 0 {
        return Err(invalid("audit.breaker_threshold", "must be at least 1"));
    }
    if a.capacity_budget_bytes == 0 {
        return Err(invalid("audit.capacity_budget_bytes", "must be positive"));
    }
    if a.capacity_critical_pct == 0 || a.capacity_critical_pct > 100 {
        return Err(invalid(
            "audit.capacity_critical_pct",
            "must be between 1 and 100",
        ));
    }
    if a.capacity_warning_pct >= a.capacity_critical_pct {
        return Err(invalid(
            "audit.capacity_warning_pct",
            format!(
                "warning threshold ({}) must be below the critical threshold ({})",
                a.capacity_warning_pct, a.capacity_critical_pct
            ),
        ));
    }
    Ok(())
}

fn validate_chain(config: &Config) -> ConfigResult<()> {
    let c = &config.chain;
    if c.max_retries == 0 || c.max_retries > MAX_RETRIES {
        return Err(invalid(
            "chain.max_retries",
            format!("must be between 1 and {MAX_RETRIES}"),
        ));
    }
    if c.base_delay_ms > MAX_BASE_DELAY_MS {
        return Err(invalid(
            "chain.base_delay_ms",
            format!("must not exceed {MAX_BASE_DELAY_MS}"),
        ));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;
    if !matches!(
        l.level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error" | "off"
    ) {
        return Err(invalid(
            "logging.level",
            format!("unknown level '{}'", l.level),
        ));
    }
    if !matches!(l.format.as_str(), "pretty" | "compact" | "json" | "full") {
        return Err(invalid(
            "logging.format",
            format!(
                "unknown format '{}'; expected one of: pretty, compact, json, full",
                l.format
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(result: ConfigResult<()>) -> String {
        match result {
            Err(ConfigError::ValidationError { field, .. }) => field,
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_attempts_is_allowed() {
        let mut config = Config::default();
        config.lockout.max_attempts = 0;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_rejects_zero_duration() {
        let mut config = Config::default();
        config.lockout.duration_secs = 0;
        assert_eq!(field_of(validate(&config)), "lockout.duration_secs");
    }

    #[test]
    fn test_rejects_inverted_capacity_thresholds() {
        let mut config = Config::default();
        config.audit.capacity_warning_pct = 95;
        assert_eq!(field_of(validate(&config)), "audit.capacity_warning_pct");
    }

    #[test]
    fn test_rejects_log_file_path() {
        let mut config = Config::default();
        config.audit.log_file = "../elsewhere.log".to_owned();
        assert_eq!(field_of(validate(&config)), "audit.log_file");
    }

    #[test]
    fn test_rejects_shared_key_variables() {
        let mut config = Config::default();
        config.keys.lockout_env_var = config.keys.audit_env_var.clone();
        assert_eq!(field_of(validate(&config)), "keys");
    }

    #[test]
    fn test_rejects_unknown_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_owned();
        assert_eq!(field_of(validate(&config)), "logging.format");
    }
}
