//! The generic integrity-protected store.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{error, info, warn};
use warden_crypto::{KeyManager, KeySource, MacTag, SigningKey};

use crate::backend::StateBackend;
use crate::envelope::SignedEnvelope;
use crate::error::{IntegrityViolation, StorageError, StorageResult};

/// A payload of type `T` persisted as a [`SignedEnvelope`].
///
/// The store is not internally synchronized; owners keep it behind the same
/// lock that guards their in-memory state so verification, mutation and
/// persistence happen as one step.
pub struct IntegrityStore<T> {
    backend: Arc<dyn StateBackend>,
    keys: Arc<KeyManager>,
    version: u64,
    last_signature: Option<MacTag>,
    violation: Option<IntegrityViolation>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> IntegrityStore<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Create a store over `backend`, signed by `keys`.
    ///
    /// Nothing is read until [`load`](Self::load).
    #[must_use]
    pub fn new(backend: Arc<dyn StateBackend>, keys: Arc<KeyManager>) -> Self {
        Self {
            backend,
            keys,
            version: 0,
            last_signature: None,
            violation: None,
            _payload: PhantomData,
        }
    }

    /// Location of the persisted state.
    #[must_use]
    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// The key manager signing this store.
    #[must_use]
    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Version of the last envelope read or written.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether the store is in paranoid mode.
    #[must_use]
    pub fn is_paranoid(&self) -> bool {
        self.violation.is_some()
    }

    /// The violation that put the store into paranoid mode.
    #[must_use]
    pub fn violation(&self) -> Option<IntegrityViolation> {
        self.violation
    }

    /// Leave paranoid mode. The persisted file is not touched; owners
    /// normally follow this with a [`save`](Self::save) of trusted state.
    pub fn clear_paranoid(&mut self) {
        if let Some(previous) = self.violation.take() {
            info!(store = %self.describe(), violation = %previous, "paranoid mode cleared");
        }
        // Whatever is on disk now is not something this process vouches for.
        self.last_signature = None;
    }

    fn paranoid_error(&self) -> Option<StorageError> {
        self.violation.map(|violation| StorageError::Paranoid {
            store: self.describe(),
            violation,
        })
    }

    /// Enter paranoid mode for a violation the owner found in a payload
    /// that passed signature verification (e.g. inconsistent content).
    pub fn mark_violation(&mut self, violation: IntegrityViolation) {
        if self.violation.is_none() {
            error!(
                store = %self.describe(),
                violation = %violation,
                "integrity violation detected, entering paranoid mode"
            );
            self.violation = Some(violation);
        }
    }

    fn enter_paranoid(&mut self, violation: IntegrityViolation) -> StorageError {
        self.mark_violation(violation);
        StorageError::Integrity {
            store: self.describe(),
            violation,
        }
    }

    /// Read and decode the envelope, or classify why it is untrustworthy.
    fn read_envelope(&self) -> StorageResult<Result<Option<SignedEnvelope>, IntegrityViolation>> {
        let Some(bytes) = self.backend.read()? else {
            return Ok(Ok(None));
        };
        let Ok(envelope) = SignedEnvelope::from_bytes(&bytes) else {
            return Ok(Err(IntegrityViolation::Corrupt));
        };
        let valid = self.keys.with_key(|key| envelope.verify(key))?;
        if !valid {
            return Ok(Err(IntegrityViolation::Tampered));
        }
        Ok(Ok(Some(envelope)))
    }

    /// Load and verify the persisted payload.
    ///
    /// Returns `Ok(None)` when no state exists yet and the store's key does
    /// not prove prior use. A missing file under a key that does is a
    /// deletion.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Integrity`] (and enters paranoid mode) on a
    /// missing, tampered or corrupt file; [`StorageError::Paranoid`] if the
    /// store is already paranoid; IO and key errors otherwise.
    pub fn load(&mut self) -> StorageResult<Option<T>> {
        if let Some(e) = self.paranoid_error() {
            return Err(e);
        }

        let envelope = match self.read_envelope()? {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                if self.keys.implies_prior_use() {
                    return Err(self.enter_paranoid(IntegrityViolation::Missing));
                }
                if self.keys.source() == Some(KeySource::Environment) {
                    warn!(
                        store = %self.describe(),
                        "no persisted state; key is externally provisioned, starting fresh"
                    );
                }
                return Ok(None);
            },
            Err(violation) => return Err(self.enter_paranoid(violation)),
        };

        let payload = match envelope.open::<T>() {
            Ok(payload) => payload,
            Err(_) => return Err(self.enter_paranoid(IntegrityViolation::Corrupt)),
        };
        self.version = envelope.version;
        self.last_signature = Some(envelope.signature);
        Ok(Some(payload))
    }

    /// Re-read the persisted state and check it is exactly what this
    /// process last loaded or saved.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Integrity`] (and enters paranoid mode) if the
    /// file was deleted, altered, corrupted or replaced by an older signed
    /// copy; [`StorageError::Paranoid`] if the store is already paranoid.
    pub fn verify(&mut self) -> StorageResult<()> {
        if let Some(e) = self.paranoid_error() {
            return Err(e);
        }

        match self.read_envelope()? {
            Ok(Some(envelope)) => match &self.last_signature {
                Some(expected) if *expected != envelope.signature => {
                    Err(self.enter_paranoid(IntegrityViolation::RolledBack))
                },
                _ => Ok(()),
            },
            Ok(None) if self.last_signature.is_some() || self.keys.implies_prior_use() => {
                Err(self.enter_paranoid(IntegrityViolation::Missing))
            },
            Ok(None) => Ok(()),
            Err(violation) => Err(self.enter_paranoid(violation)),
        }
    }

    /// Sign `payload` with the active key and persist it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Paranoid`] if the store is paranoid (the
    /// evidence on disk is never overwritten), or an IO, serialization or
    /// key error. On error the previous state remains on disk.
    pub fn save(&mut self, payload: &T) -> StorageResult<()> {
        if let Some(e) = self.paranoid_error() {
            return Err(e);
        }
        let version = self.version.saturating_add(1);
        let envelope = self
            .keys
            .with_key(|key| SignedEnvelope::seal(version, payload, key))??;
        self.persist(&envelope)
    }

    /// Sign `payload` with an explicit key and persist it.
    ///
    /// Used while a key rotation re-signs the store, when the new key is
    /// not yet active in the manager.
    ///
    /// # Errors
    ///
    /// Same as [`save`](Self::save).
    pub fn save_with_key(&mut self, payload: &T, key: &SigningKey) -> StorageResult<()> {
        if let Some(e) = self.paranoid_error() {
            return Err(e);
        }
        let version = self.version.saturating_add(1);
        let envelope = SignedEnvelope::seal(version, payload, key)?;
        self.persist(&envelope)
    }

    fn persist(&mut self, envelope: &SignedEnvelope) -> StorageResult<()> {
        self.backend.write_atomic(&envelope.to_bytes()?)?;
        self.version = envelope.version;
        self.last_signature = Some(envelope.signature);
        Ok(())
    }
}

impl<T> std::fmt::Debug for IntegrityStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityStore")
            .field("backend", &self.backend.describe())
            .field("version", &self.version)
            .field("violation", &self.violation)
            .finish_non_exhaustive()
    }
}
