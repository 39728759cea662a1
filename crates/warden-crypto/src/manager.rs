//! Signing-key lifecycle: resolve, validate, rotate, zeroize.
//!
//! Each integrity-protected store owns one [`KeyManager`] with its own
//! environment variables and key file, so the lockout store and the audit
//! chain never share key material.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::key::{KEY_LENGTH, KeyFingerprint, KeySource, SigningKey};
use crate::mac::MacTag;

/// Where a [`KeyManager`] looks for its key.
#[derive(Debug, Clone)]
pub struct KeyManagerConfig {
    /// Short name used in logs and errors (`audit`, `lockout`).
    pub namespace: String,
    /// Directory holding the default key file and its metadata.
    pub key_dir: PathBuf,
    /// File name of the default key file inside `key_dir`.
    pub key_file_name: String,
    /// Environment variable holding a 64-character hex key.
    pub env_key_var: String,
    /// Environment variable holding a path to a raw 32-byte key file.
    pub env_key_file_var: String,
}

impl KeyManagerConfig {
    /// Configuration for the audit chain key.
    #[must_use]
    pub fn audit(key_dir: impl Into<PathBuf>) -> Self {
        Self {
            namespace: "audit".to_owned(),
            key_dir: key_dir.into(),
            key_file_name: ".audit_hmac_key".to_owned(),
            env_key_var: "WARDEN_AUDIT_HMAC_KEY".to_owned(),
            env_key_file_var: "WARDEN_AUDIT_HMAC_KEY_FILE".to_owned(),
        }
    }

    /// Configuration for the lockout store key.
    #[must_use]
    pub fn lockout(key_dir: impl Into<PathBuf>) -> Self {
        Self {
            namespace: "lockout".to_owned(),
            key_dir: key_dir.into(),
            key_file_name: ".lockout_hmac_key".to_owned(),
            env_key_var: "WARDEN_LOCKOUT_HMAC_KEY".to_owned(),
            env_key_file_var: "WARDEN_LOCKOUT_HMAC_KEY_FILE".to_owned(),
        }
    }

    /// Override the environment variable names.
    #[must_use]
    pub fn with_env_vars(mut self, key_var: impl Into<String>, file_var: impl Into<String>) -> Self {
        self.env_key_var = key_var.into();
        self.env_key_file_var = file_var.into();
        self
    }

    /// Path of the default key file.
    #[must_use]
    pub fn default_key_path(&self) -> PathBuf {
        self.key_dir.join(&self.key_file_name)
    }

    /// Path of the key metadata sidecar.
    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.key_dir
            .join(format!(".{}_key_metadata.json", self.namespace))
    }
}

/// Outcome of a successful [`KeyManager::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedKey {
    /// Where the key came from.
    pub source: KeySource,
    /// Fingerprint of the active key.
    pub fingerprint: KeyFingerprint,
    /// Key file path, if the key lives in a file.
    pub path: Option<PathBuf>,
}

/// Non-secret description of the active key, persisted beside the key file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    /// Fingerprint of the key.
    pub fingerprint: KeyFingerprint,
    /// Where the key came from when it was first used.
    pub source: KeySource,
    /// When the key was created.
    pub created_at: DateTime<Utc>,
    /// When the key replaced its predecessor.
    pub rotated_at: Option<DateTime<Utc>>,
    /// Key file path, if any.
    pub key_path: Option<PathBuf>,
}

/// Result of a key rotation.
#[derive(Debug, Clone)]
pub struct RotationReport {
    /// Fingerprint of the retired key.
    pub old_fingerprint: KeyFingerprint,
    /// Fingerprint of the new active key.
    pub new_fingerprint: KeyFingerprint,
    /// When the rotation happened.
    pub rotated_at: DateTime<Utc>,
    /// Items the resigner re-signed.
    pub entries_resigned: usize,
    /// Where the old key file was moved.
    pub backup_path: PathBuf,
}

/// Re-signs a store's content when its key rotates.
///
/// Called by [`KeyManager::rotate`] while the manager's state is locked, so
/// implementations must use the keys they are given and never call back into
/// the manager.
pub trait Resign {
    /// Re-sign everything under `new_key`, returning how many items changed.
    ///
    /// `old_key` remains valid for the duration of the call so content can be
    /// verified before it is re-signed.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::ResignFailed`] if the content cannot be verified
    /// under `old_key` or the re-signed content cannot be persisted. The
    /// rotation is then abandoned and the old key stays active.
    fn resign(&mut self, old_key: &SigningKey, new_key: &SigningKey) -> CryptoResult<usize>;
}

#[derive(Default)]
struct KeyState {
    current: Option<SigningKey>,
    path: Option<PathBuf>,
}

/// Owns one store's signing key.
///
/// Thread-safe: signing and verification take a read lock, loading,
/// rotation and close take the write lock.
pub struct KeyManager {
    config: KeyManagerConfig,
    state: RwLock<KeyState>,
}

impl KeyManager {
    /// Create a manager with no key loaded.
    #[must_use]
    pub fn new(config: KeyManagerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(KeyState::default()),
        }
    }

    /// The manager's configuration.
    #[must_use]
    pub fn config(&self) -> &KeyManagerConfig {
        &self.config
    }

    /// Namespace used in logs and errors.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    fn read_state(&self) -> RwLockReadGuard<'_, KeyState> {
        self.state.read().unwrap_or_else(|e| {
            warn!(namespace = %self.config.namespace, "key manager lock poisoned, recovering");
            e.into_inner()
        })
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, KeyState> {
        self.state.write().unwrap_or_else(|e| {
            warn!(namespace = %self.config.namespace, "key manager lock poisoned, recovering");
            PoisonError::into_inner(e)
        })
    }

    fn not_loaded(&self) -> CryptoError {
        CryptoError::KeyNotLoaded {
            namespace: self.config.namespace.clone(),
        }
    }

    /// Resolve the key using the process environment.
    ///
    /// # Errors
    ///
    /// See [`load_with_env`](Self::load_with_env).
    pub fn load(&self) -> CryptoResult<LoadedKey> {
        let env: HashMap<String, String> = std::env::vars().collect();
        self.load_with_env(&env)
    }

    /// Resolve the key from an explicit environment map.
    ///
    /// Sources are tried in order and never fall through once one is present:
    /// 1. `env_key_var` (hex)
    /// 2. `env_key_file_var` (path to a raw key file)
    /// 3. the default key file
    /// 4. a freshly generated key, written to the default key file
    ///
    /// # Errors
    ///
    /// Returns an error if a configured source is invalid: malformed hex,
    /// wrong length, missing or symlinked file, or a key file readable by
    /// group or others. A failed load never replaces the active key.
    pub fn load_with_env(&self, env: &HashMap<String, String>) -> CryptoResult<LoadedKey> {
        let (mut key, path) = self.resolve(env)?;

        if let Some(meta) = self.read_metadata()
            && meta.fingerprint == key.fingerprint()
        {
            key.set_timestamps(meta.created_at, meta.rotated_at);
        }

        let loaded = LoadedKey {
            source: key.source(),
            fingerprint: key.fingerprint(),
            path: path.clone(),
        };

        if loaded.source == KeySource::Generated {
            self.write_metadata(&key, path.as_deref());
        }

        info!(
            namespace = %self.config.namespace,
            fingerprint = %loaded.fingerprint,
            source = %loaded.source,
            "signing key loaded"
        );

        let mut state = self.write_state();
        state.current = Some(key);
        state.path = path;
        Ok(loaded)
    }

    fn resolve(
        &self,
        env: &HashMap<String, String>,
    ) -> CryptoResult<(SigningKey, Option<PathBuf>)> {
        let var = &self.config.env_key_var;
        if let Some(hex_key) = env.get(var).filter(|v| !v.trim().is_empty()) {
            let key = SigningKey::from_hex(hex_key.trim(), KeySource::Environment).map_err(|e| {
                CryptoError::InvalidEnvKey {
                    var: var.clone(),
                    reason: e.to_string(),
                }
            })?;
            return Ok((key, None));
        }

        if let Some(file) = env
            .get(&self.config.env_key_file_var)
            .filter(|v| !v.trim().is_empty())
        {
            let path = PathBuf::from(file.trim());
            let key = read_key_file(&path)?;
            return Ok((key, Some(path)));
        }

        let path = self.config.default_key_path();
        match read_key_file(&path) {
            Ok(key) => Ok((key, Some(path))),
            Err(CryptoError::KeyFileMissing { .. }) => {
                let key = generate_key_file(&path)?;
                Ok((key, Some(path)))
            },
            Err(e) => Err(e),
        }
    }

    /// Whether a key is currently loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.read_state().current.is_some()
    }

    /// Fingerprint of the active key.
    #[must_use]
    pub fn fingerprint(&self) -> Option<KeyFingerprint> {
        self.read_state().current.as_ref().map(SigningKey::fingerprint)
    }

    /// Source of the active key.
    #[must_use]
    pub fn source(&self) -> Option<KeySource> {
        self.read_state().current.as_ref().map(SigningKey::source)
    }

    /// Path of the active key file, if the key lives in a file.
    #[must_use]
    pub fn key_path(&self) -> Option<PathBuf> {
        self.read_state().path.clone()
    }

    /// Whether the active key proves this store has run before.
    ///
    /// Only the default key file counts: it is created by the store itself
    /// and immediately followed by a signed initial state. Externally
    /// provisioned keys (environment hex or an explicit key file) carry no
    /// such evidence.
    #[must_use]
    pub fn implies_prior_use(&self) -> bool {
        let state = self.read_state();
        matches!(state.current.as_ref().map(SigningKey::source), Some(KeySource::File))
            && state.path.as_deref() == Some(self.config.default_key_path().as_path())
    }

    /// Description of the active key.
    #[must_use]
    pub fn metadata(&self) -> Option<KeyMetadata> {
        let state = self.read_state();
        state.current.as_ref().map(|key| KeyMetadata {
            fingerprint: key.fingerprint(),
            source: key.source(),
            created_at: key.created_at(),
            rotated_at: key.rotated_at(),
            key_path: state.path.clone(),
        })
    }

    /// Run `f` with the active key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyNotLoaded`] if no key is loaded.
    pub fn with_key<R>(&self, f: impl FnOnce(&SigningKey) -> R) -> CryptoResult<R> {
        let state = self.read_state();
        let key = state.current.as_ref().ok_or_else(|| self.not_loaded())?;
        Ok(f(key))
    }

    /// Sign `data` with the active key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyNotLoaded`] if no key is loaded.
    pub fn sign(&self, data: &[u8]) -> CryptoResult<MacTag> {
        self.with_key(|key| key.sign(data))
    }

    /// Verify `tag` over `data` with the active key, in constant time.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyNotLoaded`] if no key is loaded.
    pub fn verify(&self, data: &[u8], tag: &MacTag) -> CryptoResult<bool> {
        self.with_key(|key| key.verify(data, tag))
    }

    /// Replace the active key with a fresh one.
    ///
    /// The old key file is renamed to `<name>.<timestamp>.bak` and the new
    /// key is written with mode 0600. If a `resigner` is given it re-signs
    /// the store under the new key before the rotation counts as done; if
    /// it fails, the backup is restored and the old key stays active. The
    /// old key is zeroized when this returns.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RotationUnsupported`] for environment-sourced
    /// keys, an IO error if the key files cannot be moved or written, or the
    /// resigner's error.
    pub fn rotate(&self, resigner: Option<&mut dyn Resign>) -> CryptoResult<RotationReport> {
        let mut state = self.write_state();
        let Some(old) = state.current.as_ref() else {
            return Err(self.not_loaded());
        };
        if old.source() == KeySource::Environment {
            return Err(CryptoError::RotationUnsupported {
                key_source: KeySource::Environment,
            });
        }
        let path = state.path.clone().ok_or_else(|| self.not_loaded())?;

        let rotated_at = Utc::now();
        let mut new_key = SigningKey::generate();
        new_key.set_source(KeySource::File);
        new_key.set_timestamps(rotated_at, Some(rotated_at));

        let backup_path = backup_path_for(&path, rotated_at);
        std::fs::rename(&path, &backup_path).map_err(|e| {
            CryptoError::IoError(format!(
                "failed to back up key file {}: {e}",
                path.display()
            ))
        })?;

        if let Err(e) = write_new_key_file(&path, &new_key) {
            restore_backup(&path, &backup_path);
            return Err(e);
        }

        let entries_resigned = match resigner {
            Some(resigner) => match resigner.resign(old, &new_key) {
                Ok(count) => count,
                Err(e) => {
                    warn!(
                        namespace = %self.config.namespace,
                        error = %e,
                        "re-signing failed, restoring previous key"
                    );
                    restore_backup(&path, &backup_path);
                    return Err(e);
                },
            },
            None => 0,
        };

        let old_fingerprint = old.fingerprint();
        let new_fingerprint = new_key.fingerprint();
        self.write_metadata(&new_key, Some(&path));
        // Dropping the old key zeroizes it.
        state.current = Some(new_key);

        info!(
            namespace = %self.config.namespace,
            old_fingerprint = %old_fingerprint,
            new_fingerprint = %new_fingerprint,
            entries_resigned,
            backup = %backup_path.display(),
            "signing key rotated"
        );

        Ok(RotationReport {
            old_fingerprint,
            new_fingerprint,
            rotated_at,
            entries_resigned,
            backup_path,
        })
    }

    /// Zeroize and drop the active key.
    ///
    /// Signing fails with [`CryptoError::KeyNotLoaded`] afterwards.
    pub fn close(&self) {
        let mut state = self.write_state();
        if let Some(key) = state.current.take() {
            debug!(
                namespace = %self.config.namespace,
                fingerprint = %key.fingerprint(),
                "signing key zeroized"
            );
        }
        state.path = None;
    }

    fn read_metadata(&self) -> Option<KeyMetadata> {
        let raw = std::fs::read(self.config.metadata_path()).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    fn write_metadata(&self, key: &SigningKey, key_path: Option<&Path>) {
        let meta = KeyMetadata {
            fingerprint: key.fingerprint(),
            source: key.source(),
            created_at: key.created_at(),
            rotated_at: key.rotated_at(),
            key_path: key_path.map(Path::to_path_buf),
        };
        let result = serde_json::to_vec_pretty(&meta)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                std::fs::write(self.config.metadata_path(), json).map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            warn!(namespace = %self.config.namespace, error = %e, "failed to write key metadata");
        }
    }
}

impl Drop for KeyManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("namespace", &self.config.namespace)
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Read and validate a raw key file.
fn read_key_file(path: &Path) -> CryptoResult<SigningKey> {
    let display = path.display().to_string();
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CryptoError::KeyFileMissing { path: display });
        },
        Err(e) => return Err(CryptoError::IoError(format!("{display}: {e}"))),
    };

    if meta.file_type().is_symlink() {
        return Err(CryptoError::SymlinkRefused { path: display });
    }
    if !meta.is_file() {
        return Err(CryptoError::InvalidKeyFile {
            path: display,
            reason: "not a regular file".to_owned(),
        });
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = meta.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            return Err(CryptoError::InsecurePermissions {
                path: display,
                mode,
            });
        }
    }

    if meta.len() != KEY_LENGTH as u64 {
        return Err(CryptoError::InvalidKeyFile {
            path: display,
            reason: format!("expected {KEY_LENGTH} bytes, found {}", meta.len()),
        });
    }

    let bytes = Zeroizing::new(
        std::fs::read(path).map_err(|e| CryptoError::IoError(format!("{display}: {e}")))?,
    );
    SigningKey::from_bytes(&bytes, KeySource::File).map_err(|e| CryptoError::InvalidKeyFile {
        path: display,
        reason: e.to_string(),
    })
}

/// Generate a key and create the default key file for it.
///
/// If another process creates the file first, that file is read instead.
fn generate_key_file(path: &Path) -> CryptoResult<SigningKey> {
    let key = SigningKey::generate();
    match write_new_key_file(path, &key) {
        Ok(()) => {
            info!(path = %path.display(), fingerprint = %key.fingerprint(), "generated new signing key");
            Ok(key)
        },
        Err(CryptoError::IoError(_)) if path.exists() => read_key_file(path),
        Err(e) => Err(e),
    }
}

/// Write a key to a file that must not already exist, owner-only.
fn write_new_key_file(path: &Path, key: &SigningKey) -> CryptoResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CryptoError::IoError(e.to_string()))?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .map_err(|e| CryptoError::IoError(format!("{}: {e}", path.display())))?;
    file.write_all(key.secret_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| CryptoError::IoError(format!("{}: {e}", path.display())))?;

    if let Some(parent) = path.parent()
        && let Ok(dir) = std::fs::File::open(parent)
    {
        if let Err(e) = dir.sync_all() {
            warn!(dir = %parent.display(), error = %e, "failed to sync key directory");
        }
    }
    Ok(())
}

fn backup_path_for(path: &Path, at: DateTime<Utc>) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "key".into(), |n| n.to_string_lossy().into_owned());
    let stamp = at.format("%Y%m%d%H%M%S");
    let mut candidate = path.with_file_name(format!("{name}.{stamp}.bak"));
    let mut n: u32 = 1;
    while candidate.exists() {
        candidate = path.with_file_name(format!("{name}.{stamp}.{n}.bak"));
        n = n.saturating_add(1);
    }
    candidate
}

fn restore_backup(path: &Path, backup: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove new key file before restoring backup");
    }
    if let Err(e) = std::fs::rename(backup, path) {
        warn!(
            path = %path.display(),
            backup = %backup.display(),
            error = %e,
            "failed to restore key file from backup"
        );
    }
}
