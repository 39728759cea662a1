//! The lockout store.
//!
//! Each call re-verifies the persisted state before it makes a decision.
//! A state file that is missing, altered, corrupt or rolled back puts the
//! store into paranoid mode, in which every identifier (including ones
//! never seen before) is treated as locked until an operator clears it.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use warden_audit::{AuditEvent, AuditSink};
use warden_crypto::{CryptoResult, KeyManager, Resign, RotationReport, SigningKey};
use warden_storage::{FileBackend, IntegrityStore, IntegrityViolation, StateBackend};

use crate::error::{LockoutError, LockoutResult};
use crate::record::{
    AttemptRecord, AttemptSnapshot, CleanupSummary, LockedIdentifier, LockoutState, LockoutStats,
    identifier_key, mask_key,
};

/// File name of the persisted lockout state.
pub const STATE_FILE: &str = "lockout_state.json";

/// Lockout event names.
pub mod events {
    /// An attempt was recorded.
    pub const AUTH_ATTEMPT: &str = "AUTH_ATTEMPT";
    /// An identifier reached the attempt limit.
    pub const AUTH_LOCKOUT: &str = "AUTH_LOCKOUT";
    /// An attempt was refused because the identifier is locked.
    pub const AUTH_ATTEMPT_BLOCKED: &str = "AUTH_ATTEMPT_BLOCKED";
    /// An attempt was refused by the instant-lockout policy.
    pub const AUTH_BLOCKED_INSTANT: &str = "AUTH_BLOCKED_INSTANT";
    /// An attempt was refused because the store is paranoid.
    pub const AUTH_BLOCKED_PARANOID: &str = "AUTH_BLOCKED_PARANOID";
    /// A lock was released.
    pub const AUTH_UNLOCK: &str = "AUTH_UNLOCK";
    /// An identifier's record was removed.
    pub const AUTH_RESET: &str = "AUTH_RESET";
    /// An operator cleared paranoid mode.
    pub const PARANOID_MODE_CLEARED: &str = "PARANOID_MODE_CLEARED";
    /// The lockout key was rotated.
    pub const LOCKOUT_KEY_ROTATED: &str = "LOCKOUT_KEY_ROTATED";
    /// Prefix of the integrity events (`LOCKOUT_STATE_TAMPERED`, ...).
    pub const LOCKOUT_STATE_PREFIX: &str = "LOCKOUT_STATE_";
}

/// Brute-force policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Failures that trigger a lock. `0` locks everything.
    pub max_attempts: u32,
    /// How long a lock lasts.
    pub lockout_duration: Duration,
    /// Whether the policy is enforced at all.
    pub enabled: bool,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            lockout_duration: Duration::from_secs(15 * 60),
            enabled: true,
        }
    }
}

impl LockoutPolicy {
    fn lock_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.lockout_duration)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Whether the persisted state could be trusted on this call.
enum Trust {
    Verified,
    Paranoid(Option<IntegrityViolation>),
}

struct Inner {
    records: LockoutState,
    store: IntegrityStore<LockoutState>,
    policy: LockoutPolicy,
}

impl Inner {
    /// Re-verify the persisted state; queue an event on a fresh violation.
    fn verify(&mut self, pending: &mut Vec<AuditEvent>) -> Trust {
        if self.store.is_paranoid() {
            return Trust::Paranoid(self.store.violation());
        }
        match self.store.verify() {
            Ok(()) => Trust::Verified,
            Err(e) => match e.violation() {
                Some(violation) => {
                    pending.push(violation_event(violation, &self.store.describe()));
                    Trust::Paranoid(Some(violation))
                },
                None => {
                    warn!(error = %e, "lockout state could not be verified, denying");
                    Trust::Paranoid(None)
                },
            },
        }
    }

    /// Persist the records. On failure `undo` restores the previous
    /// in-memory state, so memory never holds a decision that is not on disk.
    fn commit(&mut self, undo: impl FnOnce(&mut LockoutState)) -> LockoutResult<()> {
        match self.store.save(&self.records) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(error = %e, "failed to persist lockout state, change rolled back");
                undo(&mut self.records);
                Err(e.into())
            },
        }
    }
}

/// Put one record back the way it was before a failed commit.
fn restore_record(records: &mut LockoutState, key: String, previous: Option<AttemptRecord>) {
    match previous {
        Some(record) => {
            records.attempts.insert(key, record);
        },
        None => {
            records.attempts.remove(&key);
        },
    }
}

fn violation_event(violation: IntegrityViolation, store: &str) -> AuditEvent {
    AuditEvent::new(format!(
        "{}{}",
        events::LOCKOUT_STATE_PREFIX,
        violation.event_suffix()
    ))
    .with_session("system")
    .failed()
    .with_metadata("store", store)
    .with_metadata("detail", violation)
}

fn lockout_event(event_type: &str, masked: &str) -> AuditEvent {
    AuditEvent::new(event_type).with_session(masked)
}

/// Integrity-protected per-identifier attempt tracking.
pub struct LockoutStore {
    inner: Mutex<Inner>,
    keys: Arc<KeyManager>,
    sink: Option<Arc<dyn AuditSink>>,
}

impl LockoutStore {
    /// Open the lockout state in `dir`, creating a signed empty state if
    /// none exists yet.
    ///
    /// A state file that fails verification does not prevent construction:
    /// the store starts in paranoid mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not loaded or the initial state
    /// cannot be written.
    pub fn open(dir: &Path, keys: Arc<KeyManager>, policy: LockoutPolicy) -> LockoutResult<Self> {
        Self::with_backend(
            Arc::new(FileBackend::new(dir.join(STATE_FILE))),
            keys,
            policy,
        )
    }

    /// Open the lockout state over an arbitrary backend.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open).
    pub fn with_backend(
        backend: Arc<dyn StateBackend>,
        keys: Arc<KeyManager>,
        policy: LockoutPolicy,
    ) -> LockoutResult<Self> {
        let mut store: IntegrityStore<LockoutState> = IntegrityStore::new(backend, Arc::clone(&keys));
        let records = match store.load() {
            Ok(Some(state)) => {
                info!(
                    store = %store.describe(),
                    tracked = state.attempts.len(),
                    "lockout state loaded"
                );
                state
            },
            Ok(None) => {
                let state = LockoutState::default();
                store.save(&state)?;
                state
            },
            Err(e) if e.violation().is_some() => {
                error!(
                    store = %store.describe(),
                    error = %e,
                    "lockout state failed verification at startup; all identifiers are locked"
                );
                LockoutState::default()
            },
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            inner: Mutex::new(Inner {
                records,
                store,
                policy,
            }),
            keys,
            sink: None,
        })
    }

    /// Record lockout events through `sink`.
    ///
    /// If the store came up paranoid, the violation is reported now.
    #[must_use]
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        let pending = {
            let inner = self.lock();
            inner
                .store
                .violation()
                .map(|v| violation_event(v, &inner.store.describe()))
        };
        self.emit(pending.into_iter().collect());
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| {
            warn!("lockout store lock was poisoned, recovering");
            e.into_inner()
        })
    }

    /// Hand queued events to the audit sink. Runs after the store lock is
    /// released; sink failures never change a lockout decision.
    fn emit(&self, events: Vec<AuditEvent>) {
        let Some(sink) = &self.sink else {
            return;
        };
        for event in events {
            let event_type = event.event_type.clone();
            if let Err(e) = sink.log(event) {
                warn!(event_type, error = %e, "failed to record lockout audit event");
            }
        }
    }

    /// Run `f` under the store lock, then emit whatever events it queued.
    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner, &mut Vec<AuditEvent>) -> R) -> R {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.lock();
            f(&mut inner, &mut events)
        };
        self.emit(events);
        result
    }

    /// Record an authentication attempt.
    ///
    /// A success resets the running count (lifetime lockouts are kept). A
    /// failure increments it and locks the identifier once the count
    /// reaches `max_attempts`; the attempt that triggers the lock itself
    /// returns `Ok`.
    ///
    /// # Errors
    ///
    /// - [`LockoutError::Locked`] if the identifier is locked (the count is
    ///   not incremented) or the policy allows zero attempts.
    /// - [`LockoutError::Paranoid`] if the state cannot be trusted.
    /// - [`LockoutError::Storage`] if the new state cannot be persisted;
    ///   callers must deny.
    pub fn record_attempt(&self, identifier: &str, success: bool) -> LockoutResult<()> {
        self.with_inner(|inner, pending| {
            if !inner.policy.enabled {
                return Ok(());
            }
            let key = identifier_key(identifier);
            let masked = mask_key(&key);

            if let Trust::Paranoid(violation) = inner.verify(pending) {
                pending.push(
                    lockout_event(events::AUTH_BLOCKED_PARANOID, &masked)
                        .failed()
                        .with_metadata("reason", "lockout state integrity not established"),
                );
                return Err(LockoutError::Paranoid { violation });
            }

            let policy = inner.policy;
            if policy.max_attempts == 0 {
                pending.push(
                    lockout_event(events::AUTH_BLOCKED_INSTANT, &masked)
                        .failed()
                        .with_metadata("reason", "instant lockout policy"),
                );
                return Err(LockoutError::Locked {
                    identifier: masked,
                    until: None,
                });
            }

            let now = Utc::now();
            let previous = inner.records.attempts.get(&key).cloned();
            let queued = pending.len();
            let record = inner
                .records
                .attempts
                .entry(key.clone())
                .or_insert_with(|| AttemptRecord::new(now));

            if record.is_lock_active(now) {
                pending.push(
                    lockout_event(events::AUTH_ATTEMPT_BLOCKED, &masked)
                        .failed()
                        .with_metadata("time_remaining_secs", record.time_remaining(now).as_secs()),
                );
                return Err(LockoutError::Locked {
                    identifier: masked,
                    until: record.locked_until,
                });
            }
            if record.is_expired(now) {
                record.release();
            }

            record.last_attempt_at = now;
            if success {
                record.count = 0;
                record.first_attempt_at = None;
                pending.push(
                    lockout_event(events::AUTH_ATTEMPT, &masked).with_metadata("success", true),
                );
            } else {
                record.first_attempt_at.get_or_insert(now);
                record.count = record.count.saturating_add(1);
                pending.push(
                    lockout_event(events::AUTH_ATTEMPT, &masked)
                        .failed()
                        .with_metadata(
                            "attempt_count",
                            format!("{}/{}", record.count, policy.max_attempts),
                        ),
                );

                if record.count >= policy.max_attempts {
                    let until = policy.lock_until(now);
                    record.locked = true;
                    record.locked_until = Some(until);
                    record.lockout_count = record.lockout_count.saturating_add(1);
                    warn!(identifier = %masked, until = %until, "identifier locked out");
                    pending.push(
                        lockout_event(events::AUTH_LOCKOUT, &masked)
                            .failed()
                            .with_metadata("until", until.to_rfc3339())
                            .with_metadata("lockout_number", record.lockout_count),
                    );
                }
            }

            inner
                .commit(|records| restore_record(records, key, previous))
                .inspect_err(|_| pending.truncate(queued))
        })
    }

    /// Whether `identifier` is locked right now.
    ///
    /// Returns `true` for every identifier while the store is paranoid or
    /// the policy allows zero attempts.
    #[must_use]
    pub fn is_locked(&self, identifier: &str) -> bool {
        self.with_inner(|inner, pending| {
            if !inner.policy.enabled {
                return false;
            }
            if let Trust::Paranoid(_) = inner.verify(pending) {
                return true;
            }
            if inner.policy.max_attempts == 0 {
                return true;
            }
            inner
                .records
                .attempts
                .get(&identifier_key(identifier))
                .is_some_and(|r| r.is_lock_active(Utc::now()))
        })
    }

    /// Operator unlock of one identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LockoutError::NotFound`] or [`LockoutError::NotLocked`] if
    /// there is nothing to unlock, [`LockoutError::Paranoid`] if the state
    /// cannot be trusted, or a storage error.
    pub fn unlock(&self, identifier: &str) -> LockoutResult<()> {
        self.with_inner(|inner, pending| {
            if let Trust::Paranoid(violation) = inner.verify(pending) {
                return Err(LockoutError::Paranoid { violation });
            }
            let key = identifier_key(identifier);
            let masked = mask_key(&key);
            let Some(record) = inner.records.attempts.get_mut(&key) else {
                return Err(LockoutError::NotFound { identifier: masked });
            };
            if !record.locked {
                return Err(LockoutError::NotLocked { identifier: masked });
            }
            let previous = record.clone();
            record.release();
            inner.commit(|records| restore_record(records, key, Some(previous)))?;
            info!(identifier = %masked, "identifier unlocked by operator");
            pending.push(lockout_event(events::AUTH_UNLOCK, &masked).with_metadata("method", "manual"));
            Ok(())
        })
    }

    /// Remove every trace of `identifier`. Returns whether a record existed.
    ///
    /// # Errors
    ///
    /// Returns [`LockoutError::Paranoid`] if the state cannot be trusted, or
    /// a storage error.
    pub fn reset(&self, identifier: &str) -> LockoutResult<bool> {
        self.with_inner(|inner, pending| {
            if let Trust::Paranoid(violation) = inner.verify(pending) {
                return Err(LockoutError::Paranoid { violation });
            }
            let key = identifier_key(identifier);
            let Some(previous) = inner.records.attempts.remove(&key) else {
                return Ok(false);
            };
            let masked = mask_key(&key);
            inner.commit(|records| restore_record(records, key, Some(previous)))?;
            pending.push(lockout_event(events::AUTH_RESET, &masked));
            Ok(true)
        })
    }

    /// Snapshot of one identifier's record.
    #[must_use]
    pub fn status(&self, identifier: &str) -> Option<AttemptSnapshot> {
        self.with_inner(|inner, pending| {
            if let Trust::Paranoid(violation) = inner.verify(pending) {
                warn!(?violation, "lockout status read from state that could not be verified");
            }
            let key = identifier_key(identifier);
            inner
                .records
                .attempts
                .get(&key)
                .map(|record| AttemptSnapshot::capture(&key, record, Utc::now()))
        })
    }

    /// Every identifier locked right now.
    #[must_use]
    pub fn list_locked(&self) -> Vec<LockedIdentifier> {
        let inner = self.lock();
        let now = Utc::now();
        let duration = chrono::Duration::from_std(inner.policy.lockout_duration)
            .unwrap_or(chrono::Duration::zero());
        inner
            .records
            .attempts
            .iter()
            .filter(|(_, record)| record.is_lock_active(now))
            .filter_map(|(key, record)| {
                let until = record.locked_until?;
                Some(LockedIdentifier {
                    identifier: mask_key(key),
                    locked_at: until.checked_sub_signed(duration).unwrap_or(until),
                    locked_until: until,
                    time_remaining: record.time_remaining(now),
                    lockout_count: record.lockout_count,
                    failed_count: record.count,
                })
            })
            .collect()
    }

    /// Aggregate figures.
    #[must_use]
    pub fn stats(&self) -> LockoutStats {
        let inner = self.lock();
        let now = Utc::now();
        let attempts = &inner.records.attempts;
        LockoutStats {
            total_tracked: attempts.len(),
            currently_locked: attempts.values().filter(|r| r.is_lock_active(now)).count(),
            total_lockouts: attempts
                .values()
                .map(|r| u64::from(r.lockout_count))
                .fold(0u64, u64::saturating_add),
            max_attempts: inner.policy.max_attempts,
            lockout_duration: inner.policy.lockout_duration,
            enabled: inner.policy.enabled,
            paranoid: inner.store.is_paranoid(),
        }
    }

    /// Release expired locks and drop idle records that carry no failure
    /// history.
    ///
    /// A record is idle once its last attempt is more than twice the
    /// lockout duration ago. Records with failures or past lockouts are
    /// kept. Nothing changes while the store is paranoid.
    pub fn cleanup(&self) -> CleanupSummary {
        self.with_inner(|inner, pending| {
            if let Trust::Paranoid(_) = inner.verify(pending) {
                return CleanupSummary::default();
            }
            let now = Utc::now();
            let idle_after = chrono::Duration::from_std(inner.policy.lockout_duration)
                .ok()
                .and_then(|d| d.checked_mul(2))
                .unwrap_or(chrono::Duration::MAX);

            let previous = inner.records.clone();
            let queued = pending.len();
            let mut summary = CleanupSummary::default();
            inner.records.attempts.retain(|key, record| {
                if record.is_expired(now) {
                    record.release();
                    summary.released = summary.released.saturating_add(1);
                    pending.push(
                        lockout_event(events::AUTH_UNLOCK, &mask_key(key))
                            .with_metadata("method", "auto_expire"),
                    );
                    return true;
                }
                let idle = now.signed_duration_since(record.last_attempt_at) > idle_after;
                let historyless = !record.locked && record.count == 0 && record.lockout_count == 0;
                if idle && historyless {
                    summary.removed = summary.removed.saturating_add(1);
                    return false;
                }
                true
            });

            if !summary.is_empty()
                && let Err(e) = inner.commit(|records| *records = previous)
            {
                warn!(error = %e, "lockout cleanup could not be persisted");
                pending.truncate(queued);
                return CleanupSummary::default();
            }
            summary
        })
    }

    /// Whether the store is in paranoid mode.
    #[must_use]
    pub fn is_paranoid(&self) -> bool {
        self.lock().store.is_paranoid()
    }

    /// The violation that made the store paranoid.
    #[must_use]
    pub fn violation(&self) -> Option<IntegrityViolation> {
        self.lock().store.violation()
    }

    /// Operator recovery from paranoid mode.
    ///
    /// The in-memory records become authoritative and are persisted under
    /// the active key. Does nothing if the store is not paranoid.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the state cannot be written.
    pub fn clear_paranoid_mode(&self, reason: &str) -> LockoutResult<()> {
        let reason = if reason.trim().is_empty() {
            "explicit operator action"
        } else {
            reason
        };
        self.with_inner(|inner, pending| {
            let Some(violation) = inner.store.violation() else {
                return Ok(());
            };
            inner.store.clear_paranoid();
            if let Err(e) = inner.commit(|_| {}) {
                inner.store.mark_violation(violation);
                return Err(e);
            }
            warn!(%violation, reason, "lockout paranoid mode cleared by operator");
            pending.push(
                lockout_event(events::PARANOID_MODE_CLEARED, "system")
                    .with_metadata("reason", reason)
                    .with_metadata("violation", violation),
            );
            Ok(())
        })
    }

    /// Rotate the lockout key and re-sign the state under it.
    ///
    /// # Errors
    ///
    /// Returns [`LockoutError::Paranoid`] if the state cannot be trusted,
    /// or the key manager's error; the old key stays active on failure.
    pub fn rotate_key(&self) -> LockoutResult<RotationReport> {
        self.with_inner(|inner, pending| {
            if let Trust::Paranoid(violation) = inner.verify(pending) {
                return Err(LockoutError::Paranoid { violation });
            }
            let Inner { records, store, .. } = inner;
            let mut resigner = StateResigner { records, store };
            let report = self.keys.rotate(Some(&mut resigner))?;
            pending.push(
                lockout_event(events::LOCKOUT_KEY_ROTATED, "system")
                    .with_metadata("old_fingerprint", report.old_fingerprint)
                    .with_metadata("new_fingerprint", report.new_fingerprint),
            );
            Ok(report)
        })
    }

    /// Current policy.
    #[must_use]
    pub fn policy(&self) -> LockoutPolicy {
        self.lock().policy
    }

    /// Replace the policy; existing records are kept.
    pub fn set_policy(&self, policy: LockoutPolicy) {
        self.lock().policy = policy;
    }
}

impl std::fmt::Debug for LockoutStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("LockoutStore")
            .field("store", &inner.store)
            .field("policy", &inner.policy)
            .field("tracked", &inner.records.attempts.len())
            .finish_non_exhaustive()
    }
}

struct StateResigner<'a> {
    records: &'a LockoutState,
    store: &'a mut IntegrityStore<LockoutState>,
}

impl Resign for StateResigner<'_> {
    fn resign(&mut self, _old_key: &SigningKey, new_key: &SigningKey) -> CryptoResult<usize> {
        self.store
            .save_with_key(self.records, new_key)
            .map_err(|e| warden_crypto::CryptoError::ResignFailed(e.to_string()))?;
        Ok(self.records.attempts.len())
    }
}
