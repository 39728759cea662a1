//! Fixtures: deterministic keys, environments, events and state roots.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use warden_audit::AuditEvent;
use warden_config::WardenHome;
use warden_crypto::{KEY_LENGTH, KeyManager, KeyManagerConfig};

/// A fixed 64-character hex key derived from `seed`.
#[must_use]
pub fn test_key_hex(seed: u8) -> String {
    hex::encode([seed; KEY_LENGTH])
}

/// An environment map that provisions both stores from hex variables.
#[must_use]
pub fn env_with_keys(audit_seed: u8, lockout_seed: u8) -> HashMap<String, String> {
    HashMap::from([
        ("WARDEN_AUDIT_HMAC_KEY".to_owned(), test_key_hex(audit_seed)),
        ("WARDEN_LOCKOUT_HMAC_KEY".to_owned(), test_key_hex(lockout_seed)),
    ])
}

/// A loaded key manager for `config`, resolved against an empty
/// environment (so the default key file in `config.key_dir` is used or
/// generated).
///
/// # Panics
///
/// Panics if the key cannot be loaded.
#[must_use]
pub fn test_keys(config: KeyManagerConfig) -> Arc<KeyManager> {
    let keys = KeyManager::new(config);
    keys.load_with_env(&HashMap::new())
        .unwrap_or_else(|e| panic!("test key failed to load: {e}"));
    Arc::new(keys)
}

/// A sample query event.
#[must_use]
pub fn test_event(n: u64) -> AuditEvent {
    AuditEvent::new("QUERY")
        .with_session(format!("session-{n}"))
        .with_tier("local")
        .with_query(format!("question number {n}"))
        .with_usage(n.saturating_mul(10), 0.01)
}

/// A throwaway Warden state root.
pub struct TestHome {
    dir: TempDir,
    home: WardenHome,
}

impl TestHome {
    /// Create and lay out a fresh state root.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let home = WardenHome::from_path(dir.path());
        home.ensure()
            .unwrap_or_else(|e| panic!("state root layout: {e}"));
        Self { dir, home }
    }

    /// The layout.
    #[must_use]
    pub fn home(&self) -> &WardenHome {
        &self.home
    }

    /// The root path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Key manager for the audit chain, using the default key file.
    #[must_use]
    pub fn audit_keys(&self) -> Arc<KeyManager> {
        test_keys(KeyManagerConfig::audit(self.home.keys_dir()))
    }

    /// Key manager for the lockout store, using the default key file.
    #[must_use]
    pub fn lockout_keys(&self) -> Arc<KeyManager> {
        test_keys(KeyManagerConfig::lockout(self.home.keys_dir()))
    }
}

impl Default for TestHome {
    fn default() -> Self {
        Self::new()
    }
}
