//! Config sections to domain configs.

use std::time::Duration;

use warden_audit::{AuditLoggerConfig, BreakerConfig, CapacityPolicy, ChainConfig};
use warden_config::{AuditSection, ChainSection, KeysSection, LockoutSection};
use warden_crypto::KeyManagerConfig;
use warden_lockout::LockoutPolicy;

/// Audit logger settings from `[audit]`.
#[must_use]
pub fn audit_logger_config(section: &AuditSection) -> AuditLoggerConfig {
    AuditLoggerConfig {
        enabled: section.enabled,
        max_file_size: section.max_file_size,
        halt_on_failure: section.halt_on_failure,
        breaker: BreakerConfig {
            threshold: section.breaker_threshold,
            cooldown: Duration::from_secs(section.breaker_cooldown_secs),
        },
        capacity: CapacityPolicy {
            budget_bytes: section.capacity_budget_bytes,
            warning_pct: section.capacity_warning_pct,
            critical_pct: section.capacity_critical_pct,
            check_interval: Duration::from_secs(section.capacity_check_interval_secs),
        },
    }
}

/// Chain settings from `[chain]`.
#[must_use]
pub fn chain_config(section: &ChainSection) -> ChainConfig {
    ChainConfig {
        strict: section.strict,
        max_retries: section.max_retries,
        base_delay: Duration::from_millis(section.base_delay_ms),
        witness: section.witness,
    }
}

/// Lockout policy from `[lockout]`.
#[must_use]
pub fn lockout_policy(section: &LockoutSection) -> LockoutPolicy {
    LockoutPolicy {
        max_attempts: section.max_attempts,
        lockout_duration: Duration::from_secs(section.duration_secs),
        enabled: section.enabled,
    }
}

/// Key manager settings for both stores, from `[keys]`.
#[must_use]
pub fn key_manager_configs(
    section: &KeysSection,
    keys_dir: &std::path::Path,
) -> (KeyManagerConfig, KeyManagerConfig) {
    let audit = KeyManagerConfig::audit(keys_dir)
        .with_env_vars(&section.audit_env_var, &section.audit_file_env_var);
    let lockout = KeyManagerConfig::lockout(keys_dir)
        .with_env_vars(&section.lockout_env_var, &section.lockout_file_env_var);
    (audit, lockout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_config::Config;

    #[test]
    fn test_defaults_convert_to_domain_defaults() {
        let config = Config::default();
        assert_eq!(chain_config(&config.chain), ChainConfig::default());
        assert_eq!(lockout_policy(&config.lockout), LockoutPolicy::default());

        let audit = audit_logger_config(&config.audit);
        let expected = AuditLoggerConfig::default();
        assert_eq!(audit.max_file_size, expected.max_file_size);
        assert_eq!(audit.breaker.threshold, expected.breaker.threshold);
        assert_eq!(audit.capacity.budget_bytes, expected.capacity.budget_bytes);
    }

    #[test]
    fn test_key_configs_use_configured_variables() {
        let mut keys = KeysSection::default();
        keys.audit_env_var = "SITE_AUDIT_KEY".to_owned();
        let (audit, lockout) = key_manager_configs(&keys, std::path::Path::new("/k"));
        assert_eq!(audit.env_key_var, "SITE_AUDIT_KEY");
        assert_eq!(lockout.env_key_var, "WARDEN_LOCKOUT_HMAC_KEY");
        assert_eq!(audit.key_dir, std::path::Path::new("/k"));
    }
}
