//! Configuration types.
//!
//! Plain data only: durations are whole seconds or milliseconds and sizes
//! are bytes, so the config crate stays free of internal dependencies.
//! `warden-runtime` converts each section into its domain type. Every
//! struct implements [`Default`] with the same values as the embedded
//! `defaults.toml`, so a bare `[section]` header is a working setup.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment variable names for key material.
    pub keys: KeysSection,
    /// Brute-force lockout policy.
    pub lockout: LockoutSection,
    /// Audit log, capacity and failure response.
    pub audit: AuditSection,
    /// Audit chain persistence.
    pub chain: ChainSection,
    /// Diagnostic logging.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// KeysSection
// ---------------------------------------------------------------------------

/// Where each store looks for externally provisioned keys.
///
/// Key material itself never appears in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysSection {
    /// Variable holding the audit key as 64 hex characters.
    pub audit_env_var: String,
    /// Variable holding a path to the raw 32-byte audit key file.
    pub audit_file_env_var: String,
    /// Variable holding the lockout key as 64 hex characters.
    pub lockout_env_var: String,
    /// Variable holding a path to the raw 32-byte lockout key file.
    pub lockout_file_env_var: String,
}

impl Default for KeysSection {
    fn default() -> Self {
        Self {
            audit_env_var: "WARDEN_AUDIT_HMAC_KEY".to_owned(),
            audit_file_env_var: "WARDEN_AUDIT_HMAC_KEY_FILE".to_owned(),
            lockout_env_var: "WARDEN_LOCKOUT_HMAC_KEY".to_owned(),
            lockout_file_env_var: "WARDEN_LOCKOUT_HMAC_KEY_FILE".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// LockoutSection
// ---------------------------------------------------------------------------

/// Brute-force lockout policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutSection {
    /// Enforce lockouts at all.
    pub enabled: bool,
    /// Failures that trigger a lock; `0` locks every identifier.
    pub max_attempts: u32,
    /// Lock duration in seconds.
    pub duration_secs: u64,
    /// Seconds between background cleanup passes; `0` disables the sweeper.
    pub sweep_interval_secs: u64,
}

impl Default for LockoutSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            duration_secs: 900,
            sweep_interval_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// AuditSection
// ---------------------------------------------------------------------------

/// Audit log settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct AuditSection {
    /// Record audit events at all.
    pub enabled: bool,
    /// Log file name inside the audit directory.
    pub log_file: String,
    /// Rotate the log beyond this many bytes.
    pub max_file_size: u64,
    /// Halt on the first audit failure until an operator resets it.
    pub halt_on_failure: bool,
    /// Consecutive failures that open the circuit breaker.
    pub breaker_threshold: u32,
    /// Seconds the breaker stays open before one trial.
    pub breaker_cooldown_secs: u64,
    /// Storage budget for the audit directory in bytes.
    pub capacity_budget_bytes: u64,
    /// Usage percentage that logs a warning.
    pub capacity_warning_pct: u8,
    /// Usage percentage at which writes are refused.
    pub capacity_critical_pct: u8,
    /// Seconds between two capacity measurements.
    pub capacity_check_interval_secs: u64,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            enabled: true,
            log_file: "audit.log".to_owned(),
            max_file_size: 10_485_760,
            halt_on_failure: true,
            breaker_threshold: 5,
            breaker_cooldown_secs: 60,
            capacity_budget_bytes: 10_737_418_240,
            capacity_warning_pct: 80,
            capacity_critical_pct: 90,
            capacity_check_interval_secs: 300,
        }
    }
}

// ---------------------------------------------------------------------------
// ChainSection
// ---------------------------------------------------------------------------

/// Audit chain persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSection {
    /// Roll back chain entries that cannot be persisted.
    pub strict: bool,
    /// Save attempts per chain append.
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds; doubles per retry.
    pub base_delay_ms: u64,
    /// Keep the append-only witness file.
    pub witness: bool,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            strict: true,
            max_retries: 3,
            base_delay_ms: 100,
            witness: true,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Diagnostic logging (not the audit log).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global level filter (`"trace"` .. `"error"`).
    pub level: String,
    /// `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Per-crate directives, e.g. `["warden_audit=debug"]`.
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}
