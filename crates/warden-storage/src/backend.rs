//! Where a store's envelope bytes live.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Storage backend for a single signed envelope.
///
/// Implementations must be thread-safe. `write_atomic` must never leave a
/// partially written state observable to `read`.
pub trait StateBackend: Send + Sync {
    /// Read the stored bytes, or `None` if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the state exists but cannot be read.
    fn read(&self) -> StorageResult<Option<Vec<u8>>>;

    /// Replace the stored bytes atomically and durably.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the bytes cannot be persisted; the
    /// previous state is then left in place.
    fn write_atomic(&self, bytes: &[u8]) -> StorageResult<()>;

    /// Human-readable location, used in logs and errors.
    fn describe(&self) -> String;
}

/// A single JSON file written by temp-file-and-rename.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Back a store with the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The state file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map_or_else(|| "state".into(), |n| n.to_string_lossy().into_owned());
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        self.path
            .with_file_name(format!(".{name}.{}.{nanos}.tmp", std::process::id()))
    }

    fn io_err(&self, what: &str, e: &std::io::Error) -> StorageError {
        StorageError::Io(format!("{what} {}: {e}", self.path.display()))
    }
}

impl StateBackend for FileBackend {
    fn read(&self) -> StorageResult<Option<Vec<u8>>> {
        match std::fs::symlink_metadata(&self.path) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(StorageError::Io(format!(
                    "refusing to read {}: path is a symlink",
                    self.path.display()
                )));
            },
            Ok(_) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err("failed to stat", &e)),
        }

        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_err("failed to read", &e)),
        }
    }

    fn write_atomic(&self, bytes: &[u8]) -> StorageResult<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        std::fs::create_dir_all(&parent).map_err(|e| self.io_err("failed to create parent of", &e))?;

        let tmp = self.temp_path();
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let result = options
            .open(&tmp)
            .and_then(|mut file| {
                file.write_all(bytes)?;
                file.sync_all()
            })
            .and_then(|()| std::fs::rename(&tmp, &self.path));

        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp);
            return Err(self.io_err("failed to write", &e));
        }

        // Persist the rename itself.
        if let Ok(dir) = std::fs::File::open(&parent) {
            let _ = dir.sync_all();
        }
        debug!(path = %self.path.display(), bytes = bytes.len(), "state written");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-process backend with fault injection.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: Mutex<Option<Vec<u8>>>,
    fail_all_writes: AtomicBool,
    fail_next_writes: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> std::sync::MutexGuard<'_, Option<Vec<u8>>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every write fail until turned off again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_all_writes.store(fail, Ordering::SeqCst);
    }

    /// Make the next `n` writes fail.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_next_writes.store(n, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Current stored bytes.
    #[must_use]
    pub fn snapshot(&self) -> Option<Vec<u8>> {
        self.data().clone()
    }

    /// Overwrite the stored bytes behind the store's back.
    pub fn replace(&self, bytes: Option<Vec<u8>>) {
        *self.data() = bytes;
    }

    /// Mutate the stored bytes in place.
    pub fn tamper(&self, f: impl FnOnce(&mut Vec<u8>)) {
        if let Some(bytes) = self.data().as_mut() {
            f(bytes);
        }
    }
}

impl StateBackend for MemoryBackend {
    fn read(&self) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.snapshot())
    }

    fn write_atomic(&self, bytes: &[u8]) -> StorageResult<()> {
        let injected = self.fail_all_writes.load(Ordering::SeqCst)
            || self
                .fail_next_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if injected {
            return Err(StorageError::Io("injected write failure".to_owned()));
        }
        *self.data() = Some(bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("nested").join("state.json"));
        assert!(backend.read().unwrap().is_none());

        backend.write_atomic(b"first").unwrap();
        backend.write_atomic(b"second").unwrap();
        assert_eq!(backend.read().unwrap().unwrap(), b"second");

        // No temp files left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_backend_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("state.json"));
        backend.write_atomic(b"{}").unwrap();
        let mode = std::fs::metadata(backend.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_backend_refuses_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.json");
        std::fs::write(&real, b"{}").unwrap();
        let link = dir.path().join("link.json");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        assert!(FileBackend::new(link).read().is_err());
    }

    #[test]
    fn test_file_backend_write_failure_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let backend = FileBackend::new(&path);
        backend.write_atomic(b"good").unwrap();

        // A directory in place of the parent makes the temp file impossible.
        let blocked = FileBackend::new(path.join("child.json"));
        assert!(blocked.write_atomic(b"bad").is_err());
        assert_eq!(backend.read().unwrap().unwrap(), b"good");
    }

    #[test]
    fn test_memory_backend_fault_injection() {
        let backend = MemoryBackend::new();
        backend.fail_next_writes(2);
        assert!(backend.write_atomic(b"a").is_err());
        assert!(backend.write_atomic(b"b").is_err());
        backend.write_atomic(b"c").unwrap();
        assert_eq!(backend.write_count(), 1);

        backend.set_fail_writes(true);
        assert!(backend.write_atomic(b"d").is_err());
        assert_eq!(backend.snapshot().unwrap(), b"c");
    }
}
