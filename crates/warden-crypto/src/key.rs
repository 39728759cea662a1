//! 256-bit HMAC signing keys with secure memory handling.

use std::fmt;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CryptoError, CryptoResult};
use crate::hash::ContentHash;
use crate::mac::MacTag;

type HmacSha256 = Hmac<Sha256>;

/// Required signing key length in bytes.
pub const KEY_LENGTH: usize = 32;

/// Where a signing key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// Hex string in an environment variable.
    Environment,
    /// Raw 32-byte key file.
    File,
    /// Generated by this process because no key existed.
    Generated,
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Environment => write!(f, "environment"),
            Self::File => write!(f, "file"),
            Self::Generated => write!(f, "generated"),
        }
    }
}

/// Short key identifier: the first 4 bytes of SHA-256 over the key.
///
/// Safe to log. It identifies a key without revealing it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyFingerprint([u8; 4]);

impl KeyFingerprint {
    /// Fingerprint raw key bytes.
    #[must_use]
    pub fn of(key: &[u8]) -> Self {
        let digest = ContentHash::hash(key);
        let mut fp = [0u8; 4];
        fp.copy_from_slice(&digest.as_bytes()[..4]);
        Self(fp)
    }

    /// Encode as an 8-character hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyFingerprint({})", self.to_hex())
    }
}

impl fmt::Display for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for KeyFingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for KeyFingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        <[u8; 4]>::try_from(bytes.as_slice())
            .map(Self)
            .map_err(|_| serde::de::Error::custom("fingerprint must be 4 bytes"))
    }
}

/// A 256-bit HMAC-SHA256 signing key.
///
/// The key bytes are zeroized on drop. The key is deliberately not `Clone`:
/// the [`KeyManager`](crate::KeyManager) owns the only live copy.
#[derive(ZeroizeOnDrop)]
pub struct SigningKey {
    bytes: [u8; KEY_LENGTH],
    #[zeroize(skip)]
    source: KeySource,
    #[zeroize(skip)]
    fingerprint: KeyFingerprint,
    #[zeroize(skip)]
    created_at: DateTime<Utc>,
    #[zeroize(skip)]
    rotated_at: Option<DateTime<Utc>>,
}

impl SigningKey {
    /// Generate a new random key from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        let key = Self::from_array(bytes, KeySource::Generated);
        bytes.zeroize();
        key
    }

    /// Create from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] unless `bytes` is exactly
    /// 32 bytes. Shorter or longer input is never padded or truncated.
    pub fn from_bytes(bytes: &[u8], source: KeySource) -> CryptoResult<Self> {
        let mut array = <[u8; KEY_LENGTH]>::try_from(bytes).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: KEY_LENGTH,
                actual: bytes.len(),
            }
        })?;
        let key = Self::from_array(array, source);
        array.zeroize();
        Ok(key)
    }

    /// Decode a 64-character hex string.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidHexEncoding`] for non-hex input or
    /// [`CryptoError::InvalidKeyLength`] if it decodes to anything but 32 bytes.
    pub fn from_hex(hex_key: &str, source: KeySource) -> CryptoResult<Self> {
        let decoded =
            Zeroizing::new(hex::decode(hex_key).map_err(|_| CryptoError::InvalidHexEncoding)?);
        Self::from_bytes(&decoded, source)
    }

    fn from_array(bytes: [u8; KEY_LENGTH], source: KeySource) -> Self {
        Self {
            fingerprint: KeyFingerprint::of(&bytes),
            bytes,
            source,
            created_at: Utc::now(),
            rotated_at: None,
        }
    }

    /// Where the key came from.
    #[must_use]
    pub fn source(&self) -> KeySource {
        self.source
    }

    /// The key's fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> KeyFingerprint {
        self.fingerprint
    }

    /// When this key was created (or first seen by this process).
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When this key replaced its predecessor, if it came from a rotation.
    #[must_use]
    pub fn rotated_at(&self) -> Option<DateTime<Utc>> {
        self.rotated_at
    }

    pub(crate) fn set_source(&mut self, source: KeySource) {
        self.source = source;
    }

    pub(crate) fn set_timestamps(
        &mut self,
        created_at: DateTime<Utc>,
        rotated_at: Option<DateTime<Utc>>,
    ) {
        self.created_at = created_at;
        self.rotated_at = rotated_at;
    }

    /// Raw key bytes, for writing the key file.
    pub(crate) fn secret_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.bytes
    }

    fn keyed(&self) -> HmacSha256 {
        // HMAC accepts keys of any length.
        HmacSha256::new_from_slice(&self.bytes)
            .unwrap_or_else(|_| unreachable!("HMAC-SHA256 accepts any key length"))
    }

    /// Compute `HMAC-SHA256(key, data)`.
    #[must_use]
    pub fn sign(&self, data: &[u8]) -> MacTag {
        self.sign_parts(&[data])
    }

    /// Compute the HMAC over several chunks, concatenated.
    #[must_use]
    pub fn sign_parts(&self, parts: &[&[u8]]) -> MacTag {
        let mut mac = self.keyed();
        for part in parts {
            mac.update(part);
        }
        MacTag::from_bytes(mac.finalize().into_bytes().into())
    }

    /// Verify a tag over `data` in constant time.
    #[must_use]
    pub fn verify(&self, data: &[u8], tag: &MacTag) -> bool {
        self.verify_parts(&[data], tag)
    }

    /// Verify a tag over several concatenated chunks in constant time.
    #[must_use]
    pub fn verify_parts(&self, parts: &[&[u8]], tag: &MacTag) -> bool {
        let mut mac = self.keyed();
        for part in parts {
            mac.update(part);
        }
        mac.verify_slice(tag.as_bytes()).is_ok()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("fingerprint", &self.fingerprint.to_hex())
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_key() -> SigningKey {
        SigningKey::from_bytes(&[0x42; 32], KeySource::File).unwrap()
    }

    #[test]
    fn test_sign_verify() {
        let key = fixed_key();
        let tag = key.sign(b"payload");
        assert!(key.verify(b"payload", &tag));
        assert!(!key.verify(b"payload!", &tag));
    }

    #[test]
    fn test_single_bit_flips_fail() {
        let key = fixed_key();
        let data = b"lockout state".to_vec();
        let tag = key.sign(&data);

        for i in 0..data.len() {
            let mut flipped = data.clone();
            flipped[i] ^= 0x01;
            assert!(!key.verify(&flipped, &tag), "data bit flip at byte {i}");
        }

        for i in 0..32 {
            let mut bytes = *tag.as_bytes();
            bytes[i] ^= 0x80;
            assert!(
                !key.verify(&data, &MacTag::from_bytes(bytes)),
                "tag bit flip at byte {i}"
            );
        }
    }

    #[test]
    fn test_sign_parts_matches_concatenation() {
        let key = fixed_key();
        assert_eq!(key.sign_parts(&[b"ab", b"cd"]), key.sign(b"abcd"));
        assert!(key.verify_parts(&[b"a", b"bcd"], &key.sign(b"abcd")));
    }

    #[test]
    fn test_different_keys_disagree() {
        let a = fixed_key();
        let b = SigningKey::generate();
        let tag = a.sign(b"data");
        assert!(!b.verify(b"data", &tag));
    }

    #[test]
    fn test_rejects_wrong_lengths() {
        for len in [0, 16, 31, 33, 64] {
            let result = SigningKey::from_bytes(&vec![1u8; len], KeySource::File);
            assert!(matches!(
                result,
                Err(CryptoError::InvalidKeyLength { expected: 32, actual }) if actual == len
            ));
        }
    }

    #[test]
    fn test_from_hex() {
        let key = SigningKey::from_hex(&"42".repeat(32), KeySource::Environment).unwrap();
        assert_eq!(key.fingerprint(), fixed_key().fingerprint());
        assert_eq!(key.source(), KeySource::Environment);

        assert!(matches!(
            SigningKey::from_hex("xyz", KeySource::Environment),
            Err(CryptoError::InvalidHexEncoding)
        ));
        assert!(matches!(
            SigningKey::from_hex(&"42".repeat(16), KeySource::Environment),
            Err(CryptoError::InvalidKeyLength { actual: 16, .. })
        ));
    }

    #[test]
    fn test_fingerprint_is_sha256_prefix() {
        let key = fixed_key();
        let digest = ContentHash::hash(&[0x42; 32]);
        assert_eq!(key.fingerprint().to_hex(), digest.to_hex()[..8]);
    }

    #[test]
    fn test_debug_hides_key_bytes() {
        let key = fixed_key();
        let debug = format!("{key:?}");
        assert!(debug.contains(&key.fingerprint().to_hex()));
        assert!(!debug.contains(&"42".repeat(4)));
    }

    #[test]
    fn test_generated_keys_differ() {
        let a = SigningKey::generate();
        let b = SigningKey::generate();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.source(), KeySource::Generated);
    }
}
