//! The assembled security-state engine.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;
use warden_audit::{AuditLogger, AuditSink, CapacityStatus, ChainProtector};
use warden_config::{Config, WardenHome};
use warden_crypto::KeyManager;
use warden_lockout::{LockoutStats, LockoutStore, LockoutSweeper};
use warden_storage::IntegrityViolation;

use crate::convert;
use crate::error::RuntimeResult;

/// Point-in-time health of every component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityStatus {
    /// Session id of this process.
    pub session_id: String,
    /// The audit logger is halted and refuses events.
    pub audit_halted: bool,
    /// The audit circuit breaker is open.
    pub audit_circuit_open: bool,
    /// Most recent audit failure.
    pub audit_last_failure: Option<String>,
    /// Entries in the audit chain.
    pub chain_length: usize,
    /// Violation that put the chain in paranoid mode.
    pub chain_violation: Option<IntegrityViolation>,
    /// Lockout store figures.
    pub lockout: LockoutStats,
    /// Audit storage usage, if it could be measured.
    pub capacity: Option<CapacityStatus>,
}

impl SecurityStatus {
    /// Whether nothing needs operator attention.
    #[must_use]
    pub fn healthy(&self) -> bool {
        !self.audit_halted
            && !self.audit_circuit_open
            && self.chain_violation.is_none()
            && !self.lockout.paranoid
    }
}

/// Key managers, the audit chain, the audit logger and the lockout store,
/// wired together for one process.
pub struct SecurityState {
    session_id: String,
    home: WardenHome,
    audit_keys: Arc<KeyManager>,
    lockout_keys: Arc<KeyManager>,
    chain: Arc<ChainProtector>,
    audit: Arc<AuditLogger>,
    lockout: Arc<LockoutStore>,
    sweeper: Option<LockoutSweeper>,
}

impl SecurityState {
    /// Build the engine from `config` using the process environment.
    ///
    /// # Errors
    ///
    /// See [`open_with_env`](Self::open_with_env).
    pub fn open(config: &Config, home: &WardenHome) -> RuntimeResult<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::open_with_env(config, home, &env)
    }

    /// Build the engine with an explicit environment map.
    ///
    /// Creates the state directories, loads both keys, opens the audit
    /// chain, the audit logger and the lockout store, routes lockout events
    /// into the audit log and records a `STARTUP` event. The lockout
    /// sweeper is started when a Tokio runtime is available and the sweep
    /// interval is non-zero.
    ///
    /// A store that fails verification does not abort startup: it comes up
    /// in paranoid mode so an operator can inspect and clear it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created, a configured
    /// key is invalid, or a store cannot be opened.
    pub fn open_with_env(
        config: &Config,
        home: &WardenHome,
        env: &HashMap<String, String>,
    ) -> RuntimeResult<Self> {
        home.ensure()?;

        let (audit_cfg, lockout_cfg) = convert::key_manager_configs(&config.keys, &home.keys_dir());
        let audit_keys = Arc::new(KeyManager::new(audit_cfg));
        audit_keys.load_with_env(env)?;
        let lockout_keys = Arc::new(KeyManager::new(lockout_cfg));
        lockout_keys.load_with_env(env)?;

        let chain = Arc::new(ChainProtector::open(
            &home.audit_dir(),
            Arc::clone(&audit_keys),
            convert::chain_config(&config.chain),
        )?);
        let audit = Arc::new(
            AuditLogger::open(
                home.audit_dir().join(&config.audit.log_file),
                convert::audit_logger_config(&config.audit),
            )?
            .with_chain(Arc::clone(&chain)),
        );
        let sink: Arc<dyn AuditSink> = audit.clone();
        let lockout = Arc::new(
            LockoutStore::open(
                &home.lockout_dir(),
                Arc::clone(&lockout_keys),
                convert::lockout_policy(&config.lockout),
            )?
            .with_audit_sink(sink),
        );

        let sweep_every = Duration::from_secs(config.lockout.sweep_interval_secs);
        let sweeper = if sweep_every.is_zero() {
            None
        } else if tokio::runtime::Handle::try_current().is_ok() {
            Some(LockoutSweeper::spawn(Arc::clone(&lockout), sweep_every))
        } else {
            warn!("no async runtime available; lockout sweeper not started");
            None
        };

        let session_id = Uuid::new_v4().to_string();
        let state = Self {
            session_id,
            home: home.clone(),
            audit_keys,
            lockout_keys,
            chain,
            audit,
            lockout,
            sweeper,
        };
        state.log_startup();
        Ok(state)
    }

    fn log_startup(&self) {
        let mut metadata = BTreeMap::new();
        if let Some(fp) = self.audit_keys.fingerprint() {
            metadata.insert("audit_key".to_owned(), fp.to_string());
        }
        if let Some(fp) = self.lockout_keys.fingerprint() {
            metadata.insert("lockout_key".to_owned(), fp.to_string());
        }
        metadata.insert("chain_length".to_owned(), self.chain.len().to_string());
        if let Some(v) = self.chain.violation() {
            metadata.insert("chain_violation".to_owned(), v.to_string());
        }
        if let Some(v) = self.lockout.violation() {
            metadata.insert("lockout_violation".to_owned(), v.to_string());
        }

        match self.audit.log_startup(&self.session_id, metadata) {
            Ok(()) => info!(session_id = %self.session_id, root = %self.home.root().display(), "security state ready"),
            Err(e) => error!(
                session_id = %self.session_id,
                error = %e,
                "startup could not be audited; audit logging is halted until reset"
            ),
        }
    }

    /// Session id of this process.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// State directory.
    #[must_use]
    pub fn home(&self) -> &WardenHome {
        &self.home
    }

    /// The audit logger.
    #[must_use]
    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    /// The audit chain.
    #[must_use]
    pub fn chain(&self) -> &Arc<ChainProtector> {
        &self.chain
    }

    /// The lockout store.
    #[must_use]
    pub fn lockout(&self) -> &Arc<LockoutStore> {
        &self.lockout
    }

    /// Key manager of the audit chain.
    #[must_use]
    pub fn audit_keys(&self) -> &Arc<KeyManager> {
        &self.audit_keys
    }

    /// Key manager of the lockout store.
    #[must_use]
    pub fn lockout_keys(&self) -> &Arc<KeyManager> {
        &self.lockout_keys
    }

    /// Whether the lockout sweeper is running.
    #[must_use]
    pub fn sweeper_running(&self) -> bool {
        self.sweeper.as_ref().is_some_and(LockoutSweeper::is_running)
    }

    /// Snapshot of every component's health.
    #[must_use]
    pub fn status(&self) -> SecurityStatus {
        let capacity = self.audit.check_capacity().unwrap_or_else(|e| {
            warn!(error = %e, "audit capacity could not be measured");
            None
        });
        SecurityStatus {
            session_id: self.session_id.clone(),
            audit_halted: self.audit.has_failed(),
            audit_circuit_open: self.audit.is_circuit_open(),
            audit_last_failure: self.audit.last_failure(),
            chain_length: self.chain.len(),
            chain_violation: self.chain.violation(),
            lockout: self.lockout.stats(),
            capacity,
        }
    }

    /// Stop the sweeper, record `SHUTDOWN`, flush the log and zeroize both
    /// keys.
    ///
    /// The keys are zeroized even if the shutdown event cannot be recorded.
    ///
    /// # Errors
    ///
    /// Returns the audit error if the shutdown event could not be written.
    pub async fn shutdown(mut self) -> RuntimeResult<()> {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.join().await;
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("chain_length".to_owned(), self.chain.len().to_string());
        let logged = self
            .audit
            .log_shutdown(&self.session_id, metadata)
            .and_then(|()| self.audit.flush());

        self.audit_keys.close();
        self.lockout_keys.close();
        info!(session_id = %self.session_id, "security state closed");
        Ok(logged?)
    }
}

impl std::fmt::Debug for SecurityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityState")
            .field("session_id", &self.session_id)
            .field("home", &self.home)
            .field("sweeper", &self.sweeper)
            .finish_non_exhaustive()
    }
}
