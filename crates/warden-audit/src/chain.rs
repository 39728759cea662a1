//! HMAC-linked audit chain.
//!
//! Every logged event gets a [`ChainEntry`] whose `chain_hash` is
//! `HMAC(key, event_digest || previous_hash)`. The whole chain is persisted
//! through an [`IntegrityStore`], so both the individual links and the file
//! as a whole are authenticated.
//!
//! In strict mode (the default) an entry that cannot be persisted within
//! the retry budget is removed again before the error is returned: a
//! successful [`ChainProtector::sign_log_entry`] always means the entry
//! survives a restart.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use warden_crypto::{
    ContentHash, CryptoError, CryptoResult, KeyManager, MacTag, Resign, RotationReport, SigningKey,
};
use warden_storage::{
    FileBackend, IntegrityStore, IntegrityViolation, StateBackend, StorageError,
};

use crate::error::{AuditError, AuditResult};
use crate::event::{AuditEvent, event_types};
use crate::sink::AuditSink;
use crate::verify::{ChainVerification, TamperReport, verify_links};
use crate::witness::Witness;

/// File name of the persisted chain inside the audit directory.
pub const CHAIN_FILE: &str = "audit_chain.json";

/// File name of the witness inside the audit directory.
pub const WITNESS_FILE: &str = "audit_witness.txt";

/// One link in the audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    /// Position in the chain, starting at 0.
    pub index: u64,
    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,
    /// SHA-256 of the logged event.
    pub event_digest: ContentHash,
    /// `chain_hash` of the previous entry; zero for the first entry.
    pub previous_hash: MacTag,
    /// `HMAC(key, event_digest || previous_hash)`.
    pub chain_hash: MacTag,
}

pub(crate) fn link_hash(key: &SigningKey, digest: &ContentHash, previous: &MacTag) -> MacTag {
    key.sign_parts(&[digest.as_bytes(), previous.as_bytes()])
}

/// Persistence behavior of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    /// Roll back entries that cannot be persisted (durability over availability).
    pub strict: bool,
    /// Save attempts per append.
    pub max_retries: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub base_delay: Duration,
    /// Keep an append-only witness file next to the chain.
    pub witness: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            strict: true,
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            witness: true,
        }
    }
}

impl ChainConfig {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Outcome of [`ChainProtector::rotate_key`].
#[derive(Debug, Clone)]
pub struct ChainRotation {
    /// The key manager's report.
    pub rotation: RotationReport,
    /// Audit events recorded about the rotation.
    pub events_logged: usize,
    /// Audit events that could not be recorded.
    pub log_failures: Vec<String>,
}

struct ChainInner {
    entries: Vec<ChainEntry>,
    store: IntegrityStore<Vec<ChainEntry>>,
    config: ChainConfig,
}

/// Tamper-evident chain of audit event digests.
pub struct ChainProtector {
    inner: Mutex<ChainInner>,
    keys: Arc<KeyManager>,
    witness: Option<Witness>,
    chain_path: Option<PathBuf>,
}

impl ChainProtector {
    /// Open the chain stored in `dir`, creating an empty signed chain if
    /// none exists yet.
    ///
    /// A chain that fails verification does not prevent construction: the
    /// protector starts in paranoid mode and refuses to sign until an
    /// operator calls [`clear_paranoid`](Self::clear_paranoid).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the key is not
    /// loaded, or the initial chain cannot be written.
    pub fn open(dir: &Path, keys: Arc<KeyManager>, config: ChainConfig) -> AuditResult<Self> {
        std::fs::create_dir_all(dir).map_err(|e| AuditError::Io(e.to_string()))?;
        let chain_path = dir.join(CHAIN_FILE);
        let witness = config.witness.then(|| Witness::new(dir.join(WITNESS_FILE)));
        Self::build(
            Arc::new(FileBackend::new(&chain_path)),
            keys,
            config,
            witness,
            Some(chain_path),
        )
    }

    /// Open a chain over an arbitrary backend, without a witness file.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open).
    pub fn with_backend(
        backend: Arc<dyn StateBackend>,
        keys: Arc<KeyManager>,
        config: ChainConfig,
    ) -> AuditResult<Self> {
        Self::build(backend, keys, config, None, None)
    }

    fn build(
        backend: Arc<dyn StateBackend>,
        keys: Arc<KeyManager>,
        config: ChainConfig,
        witness: Option<Witness>,
        chain_path: Option<PathBuf>,
    ) -> AuditResult<Self> {
        let mut store = IntegrityStore::new(backend, Arc::clone(&keys));
        let entries = match store.load() {
            Ok(Some(entries)) => entries,
            Ok(None) => {
                store.save(&Vec::new())?;
                info!(store = %store.describe(), "initialized empty audit chain");
                Vec::new()
            },
            Err(e) if e.violation().is_some() => {
                error!(
                    store = %store.describe(),
                    error = %e,
                    "audit chain failed verification at startup; signing disabled"
                );
                Vec::new()
            },
            Err(e) => return Err(e.into()),
        };

        // A correctly signed envelope around a broken chain was re-sealed
        // by someone holding the key.
        if !entries.is_empty() {
            let check = keys.with_key(|key| verify_links(&entries, key))?;
            if let Some(issue) = check.first_issue() {
                error!(
                    issues = check.issues.len(),
                    first = %issue,
                    "loaded audit chain has broken links; signing disabled"
                );
                store.mark_violation(IntegrityViolation::Tampered);
            }
        }

        Ok(Self {
            inner: Mutex::new(ChainInner {
                entries,
                store,
                config,
            }),
            keys,
            witness,
            chain_path,
        })
    }

    fn lock(&self) -> MutexGuard<'_, ChainInner> {
        self.inner.lock().unwrap_or_else(|e| {
            warn!("audit chain lock was poisoned, recovering");
            e.into_inner()
        })
    }

    /// Append a signed entry for `event` and persist the chain.
    ///
    /// Blocks until the chain is on disk or every retry has failed.
    ///
    /// # Errors
    ///
    /// - [`AuditError::ChainCompromised`] if the persisted chain no longer
    ///   verifies (the protector becomes paranoid).
    /// - [`AuditError::SaveFailed`] in strict mode when all retries fail;
    ///   the entry is not kept.
    pub fn sign_log_entry(&self, event: &AuditEvent) -> AuditResult<ChainEntry> {
        let digest = event.digest()?;
        let mut inner = self.lock();
        inner.store.verify()?;

        let ChainInner {
            entries,
            store,
            config,
        } = &mut *inner;

        let previous = entries.last();
        let previous_hash = previous.map_or_else(MacTag::zero, |p| p.chain_hash);
        let now = Utc::now();
        let timestamp = previous.map_or(now, |p| now.max(p.timestamp));
        let chain_hash = self
            .keys
            .with_key(|key| link_hash(key, &digest, &previous_hash))?;
        let entry = ChainEntry {
            index: entries.len() as u64,
            timestamp,
            event_digest: digest,
            previous_hash,
            chain_hash,
        };
        entries.push(entry.clone());

        if let Err((attempts, reason)) = persist_with_retry(store, entries, config) {
            if config.strict {
                entries.pop();
                error!(
                    index = entry.index,
                    attempts,
                    %reason,
                    "audit chain entry rolled back after save failures"
                );
                return Err(AuditError::SaveFailed { attempts, reason });
            }
            warn!(
                index = entry.index,
                attempts,
                %reason,
                "audit chain entry kept in memory only"
            );
            return Ok(entry);
        }

        if let Some(witness) = &self.witness
            && let Err(e) = witness.append(&entry)
        {
            warn!(index = entry.index, error = %e, "failed to append audit witness");
        }
        Ok(entry)
    }

    /// Verify the in-memory chain under the active key.
    ///
    /// # Errors
    ///
    /// Returns an error if no key is loaded.
    pub fn verify_chain(&self) -> AuditResult<ChainVerification> {
        let inner = self.lock();
        Ok(self.keys.with_key(|key| verify_links(&inner.entries, key))?)
    }

    /// Verify an arbitrary list of entries under the active key.
    ///
    /// # Errors
    ///
    /// Returns an error if no key is loaded.
    pub fn verify_entries(&self, entries: &[ChainEntry]) -> AuditResult<ChainVerification> {
        Ok(self.keys.with_key(|key| verify_links(entries, key))?)
    }

    /// Compare the witness file with the in-memory chain.
    ///
    /// Returns one message per disagreement; empty when they agree or the
    /// witness is disabled.
    #[must_use]
    pub fn verify_witness(&self) -> Vec<String> {
        let Some(witness) = &self.witness else {
            return Vec::new();
        };
        let inner = self.lock();
        witness.verify(&inner.entries)
    }

    /// Look for every kind of tampering evidence: the persisted envelope,
    /// chain linkage, the witness file, file permissions and timestamps.
    ///
    /// # Errors
    ///
    /// Returns an error if no key is loaded.
    pub fn detect_tampering(&self) -> AuditResult<TamperReport> {
        let mut inner = self.lock();
        let mut report = TamperReport {
            chain_length: inner.entries.len(),
            ..TamperReport::default()
        };

        if let Err(e) = inner.store.verify() {
            report.integrity = e.violation();
            if report.integrity.is_none() {
                return Err(e.into());
            }
        }

        let check = self.keys.with_key(|key| verify_links(&inner.entries, key))?;
        report.chain_issues = check.issues;

        if let Some(witness) = &self.witness {
            report.witness_issues = witness.verify(&inner.entries);
        }

        for path in self.protected_paths() {
            if let Some(issue) = permission_issue(&path) {
                report.permission_issues.push(issue);
            }
        }

        let horizon = Utc::now()
            .checked_add_signed(chrono::Duration::minutes(5))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        for entry in inner.entries.iter().filter(|e| e.timestamp > horizon) {
            report.timestamp_anomalies.push(format!(
                "entry {} is dated in the future ({})",
                entry.index,
                entry.timestamp.to_rfc3339()
            ));
        }

        Ok(report.finish())
    }

    fn protected_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.chain_path.iter().cloned().collect();
        if let Some(witness) = &self.witness {
            paths.push(witness.path().to_path_buf());
        }
        paths
    }

    /// Rotate the chain key, re-signing every entry under the new key.
    ///
    /// The existing chain must verify under the old key; a broken chain is
    /// never laundered into a valid one. After the chain lock is released,
    /// one `AUDIT_ENTRY_RESIGNED` event per entry and one
    /// `AUDIT_KEY_ROTATED` summary are logged through `sink`.
    ///
    /// # Errors
    ///
    /// - [`AuditError::ResignRequired`] if `resign` is false and the chain
    ///   is not empty.
    /// - [`AuditError::ChainCompromised`] if the chain is paranoid.
    /// - A crypto error if the key cannot be rotated or re-signing fails;
    ///   the old key and chain stay in force.
    pub fn rotate_key(
        &self,
        resign: bool,
        sink: Option<&dyn AuditSink>,
    ) -> AuditResult<ChainRotation> {
        let (rotation, resigned) = {
            let mut inner = self.lock();
            inner.store.verify()?;
            if !resign && !inner.entries.is_empty() {
                return Err(AuditError::ResignRequired {
                    entries: inner.entries.len(),
                });
            }

            let ChainInner { entries, store, .. } = &mut *inner;
            let mut resigner = ChainResigner {
                entries,
                store,
                resigned: Vec::new(),
            };
            let rotation = self.keys.rotate(Some(&mut resigner))?;
            let resigned = resigner.resigned;

            if let Some(witness) = &self.witness
                && let Err(e) = witness.rewrite(&inner.entries)
            {
                warn!(error = %e, "failed to rewrite audit witness after re-signing");
            }
            (rotation, resigned)
        };

        let mut events_logged = 0usize;
        let mut log_failures = Vec::new();
        if let Some(sink) = sink {
            let events = resigned
                .iter()
                .map(|r| {
                    AuditEvent::new(event_types::AUDIT_ENTRY_RESIGNED)
                        .with_metadata("entry_index", r.index)
                        .with_metadata("old_hash", r.old_hash.short_hex())
                        .with_metadata("new_hash", r.new_hash.short_hex())
                })
                .chain(std::iter::once(
                    AuditEvent::new(event_types::AUDIT_KEY_ROTATED)
                        .with_metadata("old_fingerprint", rotation.old_fingerprint)
                        .with_metadata("new_fingerprint", rotation.new_fingerprint)
                        .with_metadata("entries_resigned", rotation.entries_resigned),
                ));
            for event in events {
                match sink.log(event) {
                    Ok(()) => events_logged = events_logged.saturating_add(1),
                    Err(e) => log_failures.push(e.to_string()),
                }
            }
        }
        if !log_failures.is_empty() {
            warn!(
                failures = log_failures.len(),
                "key rotation succeeded but some rotation events were not logged"
            );
        }

        Ok(ChainRotation {
            rotation,
            events_logged,
            log_failures,
        })
    }

    /// Leave paranoid mode and make the in-memory chain authoritative.
    ///
    /// The persisted chain is overwritten with the in-memory chain, signed
    /// under the active key. An `AUDIT_CHAIN_PARANOID_CLEARED` event is
    /// logged through `sink` once the chain lock is released; a sink
    /// failure is traced but does not undo the recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain cannot be written.
    pub fn clear_paranoid(&self, reason: &str, sink: Option<&dyn AuditSink>) -> AuditResult<()> {
        let (previous, length) = {
            let mut inner = self.lock();
            let previous = inner.store.violation();
            inner.store.clear_paranoid();
            let ChainInner { entries, store, .. } = &mut *inner;
            store.save(entries)?;
            if let Some(witness) = &self.witness
                && let Err(e) = witness.rewrite(entries)
            {
                warn!(error = %e, "failed to rewrite audit witness");
            }
            (previous, entries.len())
        };
        warn!(
            violation = ?previous,
            reason,
            entries = length,
            "audit chain paranoid mode cleared by operator"
        );

        if let Some(sink) = sink {
            let mut event = AuditEvent::new(event_types::AUDIT_CHAIN_PARANOID_CLEARED)
                .with_session("system")
                .with_metadata("reason", reason)
                .with_metadata("entries", length);
            if let Some(violation) = previous {
                event = event.with_metadata("violation", violation);
            }
            if let Err(e) = sink.log(event) {
                warn!(error = %e, "failed to record audit chain recovery");
            }
        }
        Ok(())
    }

    /// Whether the chain refuses to sign because of an integrity violation.
    #[must_use]
    pub fn is_paranoid(&self) -> bool {
        self.lock().store.is_paranoid()
    }

    /// The violation that made the chain paranoid.
    #[must_use]
    pub fn violation(&self) -> Option<IntegrityViolation> {
        self.lock().store.violation()
    }

    /// Snapshot of the chain.
    #[must_use]
    pub fn entries(&self) -> Vec<ChainEntry> {
        self.lock().entries.clone()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the chain has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// `chain_hash` of the last entry.
    #[must_use]
    pub fn head_hash(&self) -> Option<MacTag> {
        self.lock().entries.last().map(|e| e.chain_hash)
    }

    /// Current persistence settings.
    #[must_use]
    pub fn config(&self) -> ChainConfig {
        self.lock().config.clone()
    }

    /// Switch between strict and non-strict persistence.
    pub fn set_strict(&self, strict: bool) {
        self.lock().config.strict = strict;
    }

    /// Change the retry budget.
    pub fn set_retry(&self, max_retries: u32, base_delay: Duration) {
        let mut inner = self.lock();
        inner.config.max_retries = max_retries;
        inner.config.base_delay = base_delay;
    }

    /// The key manager signing this chain.
    #[must_use]
    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }
}

impl std::fmt::Debug for ChainProtector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainProtector")
            .field("chain_path", &self.chain_path)
            .field("witness", &self.witness.as_ref().map(Witness::path))
            .finish_non_exhaustive()
    }
}

/// Save `entries`, retrying with exponential backoff.
///
/// Returns the number of attempts made and the last error on failure.
#[allow(clippy::ptr_arg)]
fn persist_with_retry(
    store: &mut IntegrityStore<Vec<ChainEntry>>,
    entries: &Vec<ChainEntry>,
    config: &ChainConfig,
) -> Result<(), (u32, String)> {
    let attempts = config.max_retries.max(1);
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match store.save(entries) {
            Ok(()) => return Ok(()),
            Err(e @ StorageError::Paranoid { .. }) => return Err((attempt, e.to_string())),
            Err(e) => {
                warn!(attempt, max = attempts, error = %e, "audit chain save failed");
                last_error = e.to_string();
                if attempt < attempts {
                    std::thread::sleep(config.backoff(attempt));
                }
            },
        }
    }
    Err((attempts, last_error))
}

struct ResignedEntry {
    index: u64,
    old_hash: MacTag,
    new_hash: MacTag,
}

/// Re-signs the chain while the key manager swaps keys.
struct ChainResigner<'a> {
    entries: &'a mut Vec<ChainEntry>,
    store: &'a mut IntegrityStore<Vec<ChainEntry>>,
    resigned: Vec<ResignedEntry>,
}

impl Resign for ChainResigner<'_> {
    fn resign(&mut self, old_key: &SigningKey, new_key: &SigningKey) -> CryptoResult<usize> {
        let check = verify_links(self.entries, old_key);
        if let Some(issue) = check.first_issue() {
            return Err(CryptoError::ResignFailed(format!(
                "chain does not verify under the current key: {issue}"
            )));
        }

        let mut resigned_chain = self.entries.clone();
        let mut resigned = Vec::with_capacity(resigned_chain.len());
        let mut previous = MacTag::zero();
        for entry in &mut resigned_chain {
            let old_hash = entry.chain_hash;
            entry.previous_hash = previous;
            entry.chain_hash = link_hash(new_key, &entry.event_digest, &previous);
            previous = entry.chain_hash;
            resigned.push(ResignedEntry {
                index: entry.index,
                old_hash,
                new_hash: entry.chain_hash,
            });
        }

        self.store
            .save_with_key(&resigned_chain, new_key)
            .map_err(|e| CryptoError::ResignFailed(e.to_string()))?;

        let count = resigned_chain.len();
        *self.entries = resigned_chain;
        self.resigned = resigned;
        Ok(count)
    }
}

#[cfg(unix)]
fn permission_issue(path: &Path) -> Option<String> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path).ok()?.permissions().mode();
    (mode & 0o077 != 0).then(|| {
        format!(
            "{} is accessible by group or others (mode {:o})",
            path.display(),
            mode & 0o777
        )
    })
}

#[cfg(not(unix))]
fn permission_issue(_path: &Path) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::ChainIssue;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use warden_crypto::KeyManagerConfig;
    use warden_storage::{MemoryBackend, SignedEnvelope};

    fn keys(dir: &Path) -> Arc<KeyManager> {
        let km = KeyManager::new(KeyManagerConfig::audit(dir));
        km.load_with_env(&HashMap::new()).unwrap();
        Arc::new(km)
    }

    fn fast_config() -> ChainConfig {
        ChainConfig {
            base_delay: Duration::from_millis(1),
            ..ChainConfig::default()
        }
    }

    fn event(n: usize) -> AuditEvent {
        AuditEvent::new(event_types::QUERY).with_query(format!("query {n}"))
    }

    fn memory_chain(dir: &Path) -> (ChainProtector, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let chain =
            ChainProtector::with_backend(backend.clone(), keys(dir), fast_config()).unwrap();
        (chain, backend)
    }

    #[derive(Default)]
    struct RecordingSink {
        events: StdMutex<Vec<AuditEvent>>,
    }

    impl AuditSink for RecordingSink {
        fn log(&self, event: AuditEvent) -> AuditResult<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    #[test]
    fn test_entries_link_to_predecessor() {
        let dir = tempfile::tempdir().unwrap();
        let (chain, _) = memory_chain(dir.path());
        for n in 0..5 {
            chain.sign_log_entry(&event(n)).unwrap();
        }

        let entries = chain.entries();
        assert_eq!(entries.len(), 5);
        assert!(entries[0].previous_hash.is_zero());
        for i in 1..entries.len() {
            assert_eq!(entries[i].previous_hash, entries[i - 1].chain_hash);
            assert_eq!(entries[i].index, i as u64);
        }
        assert_eq!(chain.head_hash(), Some(entries[4].chain_hash));
        assert!(chain.verify_chain().unwrap().valid);
    }

    #[test]
    fn test_swapped_entries_fail_verification() {
        let dir = tempfile::tempdir().unwrap();
        let (chain, _) = memory_chain(dir.path());
        for n in 0..3 {
            chain.sign_log_entry(&event(n)).unwrap();
        }

        let mut entries = chain.entries();
        assert!(chain.verify_entries(&entries).unwrap().valid);
        entries.swap(1, 2);
        let check = chain.verify_entries(&entries).unwrap();
        assert!(!check.valid);
        assert!(check.issues.contains(&ChainIssue::IndexMismatch {
            position: 1,
            found: 2
        }));
    }

    #[test]
    fn test_strict_mode_rolls_back_failed_append() {
        let dir = tempfile::tempdir().unwrap();
        let (chain, backend) = memory_chain(dir.path());
        chain.sign_log_entry(&event(0)).unwrap();
        let writes_before = backend.write_count();

        backend.set_fail_writes(true);
        let err = chain.sign_log_entry(&event(1)).unwrap_err();
        assert!(matches!(err, AuditError::SaveFailed { attempts: 3, .. }));
        assert_eq!(chain.len(), 1);
        assert_eq!(backend.write_count(), writes_before);

        backend.set_fail_writes(false);
        let entry = chain.sign_log_entry(&event(2)).unwrap();
        assert_eq!(entry.index, 1);
    }

    #[test]
    fn test_retry_recovers_from_transient_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (chain, backend) = memory_chain(dir.path());
        backend.fail_next_writes(2);

        chain.sign_log_entry(&event(0)).unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_non_strict_mode_keeps_entry_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let (chain, backend) = memory_chain(dir.path());
        chain.set_strict(false);
        chain.set_retry(2, Duration::from_millis(1));

        backend.set_fail_writes(true);
        chain.sign_log_entry(&event(0)).unwrap();
        assert_eq!(chain.len(), 1);

        backend.set_fail_writes(false);
        chain.sign_log_entry(&event(1)).unwrap();
        assert!(chain.verify_chain().unwrap().valid);
    }

    #[test]
    fn test_tampered_chain_is_paranoid() {
        let dir = tempfile::tempdir().unwrap();
        let (chain, backend) = memory_chain(dir.path());
        chain.sign_log_entry(&event(0)).unwrap();

        backend.tamper(|bytes| {
            let last = bytes.len() - 3;
            bytes[last] ^= 0x01;
        });

        let err = chain.sign_log_entry(&event(1)).unwrap_err();
        assert!(matches!(err, AuditError::ChainCompromised { .. }));
        assert!(chain.is_paranoid());

        chain.clear_paranoid("restored from backup", None).unwrap();
        assert!(!chain.is_paranoid());
        chain.sign_log_entry(&event(2)).unwrap();
    }

    #[test]
    fn test_resealed_broken_chain_opens_paranoid() {
        let dir = tempfile::tempdir().unwrap();
        let (chain, backend) = memory_chain(dir.path());
        for n in 0..3 {
            chain.sign_log_entry(&event(n)).unwrap();
        }
        let mut entries = chain.entries();
        drop(chain);

        entries.remove(1);
        let key_manager = keys(dir.path());
        let resealed = key_manager
            .with_key(|key| SignedEnvelope::seal(9, &entries, key))
            .unwrap()
            .unwrap();
        backend.replace(Some(resealed.to_bytes().unwrap()));

        let reopened =
            ChainProtector::with_backend(backend.clone(), key_manager, fast_config()).unwrap();
        assert_eq!(reopened.violation(), Some(IntegrityViolation::Tampered));
        assert_eq!(reopened.len(), 2);
        assert!(matches!(
            reopened.sign_log_entry(&event(3)),
            Err(AuditError::ChainCompromised {
                violation: IntegrityViolation::Tampered
            })
        ));
        // The evidence is not overwritten.
        assert_eq!(backend.snapshot().unwrap(), resealed.to_bytes().unwrap());
    }

    #[test]
    fn test_reopen_restores_chain() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ChainProtector::open(dir.path(), keys(dir.path()), fast_config()).unwrap();
        for n in 0..3 {
            chain.sign_log_entry(&event(n)).unwrap();
        }
        let head = chain.head_hash();
        drop(chain);

        let reopened =
            ChainProtector::open(dir.path(), keys(dir.path()), fast_config()).unwrap();
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.head_hash(), head);
        assert!(!reopened.is_paranoid());
        assert!(reopened.detect_tampering().unwrap().clean);
    }

    #[test]
    fn test_deleted_chain_detected_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ChainProtector::open(dir.path(), keys(dir.path()), fast_config()).unwrap();
        chain.sign_log_entry(&event(0)).unwrap();
        drop(chain);

        std::fs::remove_file(dir.path().join(CHAIN_FILE)).unwrap();
        let reopened =
            ChainProtector::open(dir.path(), keys(dir.path()), fast_config()).unwrap();
        assert_eq!(reopened.violation(), Some(IntegrityViolation::Missing));
        assert!(reopened.sign_log_entry(&event(1)).is_err());
    }

    #[test]
    fn test_witness_detects_truncated_chain() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ChainProtector::open(dir.path(), keys(dir.path()), fast_config()).unwrap();
        for n in 0..3 {
            chain.sign_log_entry(&event(n)).unwrap();
        }

        let witness = std::fs::read_to_string(dir.path().join(WITNESS_FILE)).unwrap();
        assert_eq!(witness.lines().count(), 3);
        assert!(chain.verify_witness().is_empty());

        let truncated = chain.entries()[..2].to_vec();
        let issues = Witness::new(dir.path().join(WITNESS_FILE)).verify(&truncated);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("beyond chain length"));
    }

    #[test]
    fn test_rotate_requires_resign_for_non_empty_chain() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ChainProtector::open(dir.path(), keys(dir.path()), fast_config()).unwrap();
        chain.sign_log_entry(&event(0)).unwrap();

        let err = chain.rotate_key(false, None).unwrap_err();
        assert!(matches!(err, AuditError::ResignRequired { entries: 1 }));
    }

    #[test]
    fn test_rotate_resigns_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ChainProtector::open(dir.path(), keys(dir.path()), fast_config()).unwrap();
        for n in 0..3 {
            chain.sign_log_entry(&event(n)).unwrap();
        }
        let before = chain.entries();
        let key_path = chain.keys().key_path().unwrap();
        let old_key = SigningKey::from_bytes(
            &std::fs::read(&key_path).unwrap(),
            warden_crypto::KeySource::File,
        )
        .unwrap();
        assert!(verify_links(&before, &old_key).valid);

        let sink = RecordingSink::default();
        let result = chain.rotate_key(true, Some(&sink)).unwrap();
        assert_eq!(result.rotation.entries_resigned, 3);
        assert_eq!(result.events_logged, 4);
        assert!(result.log_failures.is_empty());

        let after = chain.entries();
        assert!(chain.verify_chain().unwrap().valid);
        for (old, new) in before.iter().zip(&after) {
            assert_eq!(old.event_digest, new.event_digest);
            assert_ne!(old.chain_hash, new.chain_hash);
        }

        // No re-signed entry verifies under the retired key.
        let under_old = verify_links(&after, &old_key);
        assert!(!under_old.valid);
        for entry in &after {
            assert!(
                under_old
                    .issues
                    .contains(&ChainIssue::InvalidHash { index: entry.index }),
                "entry {} still verifies under the old key",
                entry.index
            );
        }

        let events = sink.events.lock().unwrap();
        let resigned = events
            .iter()
            .filter(|e| e.event_type == event_types::AUDIT_ENTRY_RESIGNED)
            .count();
        assert_eq!(resigned, 3);
        assert_eq!(
            events.last().unwrap().event_type,
            event_types::AUDIT_KEY_ROTATED
        );

        assert!(chain.detect_tampering().unwrap().clean);

        // The rotated key and chain are what a restart sees.
        drop(chain);
        let reopened =
            ChainProtector::open(dir.path(), keys(dir.path()), fast_config()).unwrap();
        assert!(reopened.verify_chain().unwrap().valid);
        assert_eq!(reopened.len(), 3);
    }

    #[test]
    fn test_backoff_doubles() {
        let config = ChainConfig::default();
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
    }
}
