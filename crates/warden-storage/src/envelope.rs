//! The on-disk signed envelope.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_crypto::{MacTag, SigningKey};

use crate::error::{StorageError, StorageResult};

/// `{version, updated_at, payload, signature}` as written to disk.
///
/// The signature is `HMAC-SHA256(key, canonical_bytes)` where the canonical
/// bytes are the JSON encoding of the envelope without its signature field.
/// The payload is held as a JSON value, whose object keys serialize in
/// sorted order, so re-encoding a decoded envelope reproduces the signed
/// bytes exactly regardless of how the payload type orders its maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEnvelope {
    /// Monotonic write counter.
    pub version: u64,
    /// When the envelope was sealed.
    pub updated_at: DateTime<Utc>,
    /// The signed payload.
    pub payload: Value,
    /// HMAC over the other three fields.
    pub signature: MacTag,
}

#[derive(Serialize)]
struct Unsigned<'a> {
    version: u64,
    updated_at: &'a DateTime<Utc>,
    payload: &'a Value,
}

impl SignedEnvelope {
    /// Serialize `payload` and sign it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if the payload cannot be
    /// encoded as JSON.
    pub fn seal<T: Serialize>(version: u64, payload: &T, key: &SigningKey) -> StorageResult<Self> {
        let payload =
            serde_json::to_value(payload).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let mut envelope = Self {
            version,
            updated_at: Utc::now(),
            payload,
            signature: MacTag::zero(),
        };
        envelope.signature = key.sign(&envelope.canonical_bytes()?);
        Ok(envelope)
    }

    /// The bytes covered by the signature.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if encoding fails.
    pub fn canonical_bytes(&self) -> StorageResult<Vec<u8>> {
        serde_json::to_vec(&Unsigned {
            version: self.version,
            updated_at: &self.updated_at,
            payload: &self.payload,
        })
        .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Check the signature in constant time.
    #[must_use]
    pub fn verify(&self, key: &SigningKey) -> bool {
        self.canonical_bytes()
            .is_ok_and(|bytes| key.verify(&bytes, &self.signature))
    }

    /// Decode the payload.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if the payload does not match `T`.
    pub fn open<T: DeserializeOwned>(&self) -> StorageResult<T> {
        T::deserialize(&self.payload).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Encode for writing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> StorageResult<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Decode bytes read from disk.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] for anything that is not a
    /// complete envelope (truncated, wrong shape, bad signature encoding).
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use warden_crypto::KeySource;

    fn key() -> SigningKey {
        SigningKey::from_bytes(&[3u8; 32], KeySource::File).unwrap()
    }

    #[test]
    fn test_seal_and_verify_after_reload() {
        let mut payload = HashMap::new();
        for i in 0..20 {
            payload.insert(format!("id-{i}"), i);
        }
        let envelope = SignedEnvelope::seal(4, &payload, &key()).unwrap();
        let reloaded = SignedEnvelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();

        assert!(reloaded.verify(&key()));
        assert_eq!(reloaded.version, 4);
        let decoded: HashMap<String, i32> = reloaded.open().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_any_field_change_breaks_signature() {
        let envelope = SignedEnvelope::seal(1, &vec![1, 2, 3], &key()).unwrap();

        let mut payload_changed = envelope.clone();
        payload_changed.payload = serde_json::json!([1, 2, 4]);
        assert!(!payload_changed.verify(&key()));

        let mut version_changed = envelope.clone();
        version_changed.version = 2;
        assert!(!version_changed.verify(&key()));

        let other = SigningKey::from_bytes(&[4u8; 32], KeySource::File).unwrap();
        assert!(!envelope.verify(&other));
    }

    #[test]
    fn test_truncated_bytes_rejected() {
        let bytes = SignedEnvelope::seal(1, &"x", &key()).unwrap().to_bytes().unwrap();
        assert!(SignedEnvelope::from_bytes(&bytes[..bytes.len() / 2]).is_err());
        assert!(SignedEnvelope::from_bytes(b"").is_err());
    }
}
