//! Warden Storage - integrity-protected persistent state.
//!
//! Every store persists a [`SignedEnvelope`]: the payload plus an
//! HMAC-SHA256 signature under the store's own key. Writes are atomic
//! (temp file, fsync, rename, directory fsync). Every later access re-reads
//! and re-verifies the file, so tampering introduced while the process is
//! running is caught on the next call.
//!
//! # Paranoid Mode
//!
//! A store whose file is missing when its key proves prior use, whose
//! signature does not match, whose payload cannot be decoded, or whose
//! content was replaced by an older signed copy enters **paranoid mode**.
//! Paranoid mode is sticky: it is never cleared by a later successful read
//! or write, only by an explicit [`IntegrityStore::clear_paranoid`].
//!
//! # Backends
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`FileBackend`] | Production: one JSON file, owner-only permissions |
//! | [`MemoryBackend`] | Tests and ephemeral stores, with fault injection |

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod backend;
mod envelope;
mod error;
mod store;

pub use backend::{FileBackend, MemoryBackend, StateBackend};
pub use envelope::SignedEnvelope;
pub use error::{IntegrityViolation, StorageError, StorageResult};
pub use store::IntegrityStore;
