//! Prelude module - commonly used types for convenient import.
//!
//! Use `use warden_crypto::prelude::*;` to import all essential types.
//!
//! # Example
//!
//! ```rust
//! use warden_crypto::prelude::*;
//!
//! let key = SigningKey::generate();
//! let tag = key.sign(b"hello");
//! assert!(key.verify(b"hello", &tag));
//! ```

// Errors
pub use crate::{CryptoError, CryptoResult};

// Keys
pub use crate::{KeyFingerprint, KeySource, SigningKey};

// Key lifecycle
pub use crate::{KeyManager, KeyManagerConfig, Resign, RotationReport};

// Tags and hashing
pub use crate::{ContentHash, MacTag};
