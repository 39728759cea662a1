//! The assembled engine: configuration, keys, stores and shutdown.

use std::sync::Arc;

use warden_config::Config;
use warden_crypto::KeySource;
use warden_lockout::LockoutError;
use warden_runtime::SecurityState;
use warden_test::prelude::*;

#[test]
fn test_user_config_and_env_keys_drive_the_engine() {
    let home = TestHome::new();
    std::fs::write(
        home.home().config_path(),
        "[lockout]\nmax_attempts = 2\nsweep_interval_secs = 0\n",
    )
    .unwrap();
    let mut env = env_with_keys(3, 4);
    env.insert("WARDEN_CHAIN_STRICT".to_owned(), "false".to_owned());

    let resolved = Config::load_with_env(home.home(), &env).unwrap();
    assert_eq!(resolved.loaded_files.len(), 1);
    assert_eq!(resolved.env_overrides, vec!["WARDEN_CHAIN_STRICT"]);
    assert!(!resolved.config.chain.strict);

    let state = SecurityState::open_with_env(&resolved.config, home.home(), &env).unwrap();
    assert_eq!(state.audit_keys().source(), Some(KeySource::Environment));
    assert_eq!(state.lockout_keys().source(), Some(KeySource::Environment));
    assert_ne!(state.audit_keys().fingerprint(), state.lockout_keys().fingerprint());

    state.lockout().record_attempt("heidi", false).unwrap();
    state.lockout().record_attempt("heidi", false).unwrap();
    assert!(matches!(
        state.lockout().record_attempt("heidi", true),
        Err(LockoutError::Locked { .. })
    ));

    let status = state.status();
    assert!(status.healthy());
    assert_eq!(status.lockout.currently_locked, 1);
    assert_eq!(status.lockout.max_attempts, 2);
    assert!(state.chain().verify_chain().unwrap().valid);

    // No key files are created for externally provisioned keys.
    assert!(!home.home().keys_dir().join(".audit_hmac_key").exists());
}

#[test]
fn test_tampered_lockout_state_surfaces_in_status_and_audit_log() {
    let home = TestHome::new();
    let config = Config::default();
    let env = env_with_keys(5, 6);
    {
        let state = SecurityState::open_with_env(&config, home.home(), &env).unwrap();
        state.lockout().record_attempt("ivan", false).unwrap();
    }

    let state_file = home.home().lockout_dir().join(warden_lockout::STATE_FILE);
    let mut doc: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&state_file).unwrap()).unwrap();
    doc["payload"]["attempts"] = serde_json::json!({});
    std::fs::write(&state_file, serde_json::to_vec(&doc).unwrap()).unwrap();

    let state = SecurityState::open_with_env(&config, home.home(), &env).unwrap();
    let status = state.status();
    assert!(!status.healthy());
    assert!(status.lockout.paranoid);
    assert!(state.lockout().is_locked("ivan"));
    assert!(state.lockout().is_locked("someone-new"));

    let log = std::fs::read_to_string(home.home().audit_dir().join("audit.log")).unwrap();
    assert!(log.contains("LOCKOUT_STATE_TAMPERED"));
    assert!(log.contains("lockout_violation=signature mismatch"));
}

#[tokio::test]
async fn test_shutdown_is_recorded_and_chain_survives() {
    let home = TestHome::new();
    let env = env_with_keys(9, 10);
    let state = SecurityState::open_with_env(&Config::default(), home.home(), &env).unwrap();
    assert!(state.sweeper_running());
    let session = state.session_id().to_owned();
    let audit_keys = Arc::clone(state.audit_keys());
    state.shutdown().await.unwrap();
    assert!(!audit_keys.is_loaded());

    let restarted = SecurityState::open_with_env(&Config::default(), home.home(), &env).unwrap();
    assert_ne!(restarted.session_id(), session);
    // startup, shutdown, startup
    assert_eq!(restarted.chain().len(), 3);
    assert!(restarted.chain().verify_chain().unwrap().valid);

    let log = std::fs::read_to_string(home.home().audit_dir().join("audit.log")).unwrap();
    assert_eq!(log.matches("STARTUP").count(), 2);
    assert_eq!(log.matches("SHUTDOWN").count(), 1);
    restarted.shutdown().await.unwrap();
}
