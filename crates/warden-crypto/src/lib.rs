//! Warden Crypto - HMAC signing keys and their lifecycle.
//!
//! This crate provides:
//! - 256-bit HMAC-SHA256 signing keys with secure memory handling
//! - Constant-time MAC tags for envelopes and chain entries
//! - SHA-256 content hashing for event digests and fingerprints
//! - A [`KeyManager`] that resolves, validates, rotates and zeroizes keys
//!
//! # Key Resolution
//!
//! Keys come from exactly one source, in order: a hex environment variable,
//! an environment variable naming a key file, the store's default key file,
//! or (only when none of those exist) a freshly generated key. A configured
//! source that turns out to be invalid is always a hard error.
//!
//! # Example
//!
//! ```
//! use warden_crypto::{ContentHash, KeySource, SigningKey};
//!
//! let key = SigningKey::generate();
//! assert_eq!(key.source(), KeySource::Generated);
//!
//! let tag = key.sign(b"important data");
//! assert!(key.verify(b"important data", &tag));
//! assert!(!key.verify(b"tampered data", &tag));
//!
//! let digest = ContentHash::hash(b"important data");
//! println!("digest: {}", digest.to_hex());
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod hash;
mod key;
mod mac;
mod manager;

pub use error::{CryptoError, CryptoResult};
pub use hash::ContentHash;
pub use key::{KEY_LENGTH, KeyFingerprint, KeySource, SigningKey};
pub use mac::MacTag;
pub use manager::{
    KeyManager, KeyManagerConfig, KeyMetadata, LoadedKey, Resign, RotationReport,
};
