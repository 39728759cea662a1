//! Where audit lines go.
//!
//! [`LogSink`] is the byte-level destination the logger writes through;
//! [`AuditSink`] is the event-level interface collaborators depend on.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::AuditResult;
use crate::event::AuditEvent;

/// The single call every collaborator uses to record an event.
///
/// An `Err` is actionable: a caller gating a sensitive action on the audit
/// record must not proceed.
pub trait AuditSink: Send + Sync {
    /// Record `event`.
    ///
    /// # Errors
    ///
    /// Returns an error if the event was not durably recorded.
    fn log(&self, event: AuditEvent) -> AuditResult<()>;
}

/// A line-oriented, append-only destination.
pub trait LogSink: Send {
    /// Append one line; the sink adds the newline.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Flush appended lines to stable storage.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn sync(&mut self) -> io::Result<()>;

    /// Current size of the active file in bytes.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn size(&self) -> io::Result<u64>;

    /// Move the active file to an archive and start a fresh one.
    ///
    /// Returns the archive path.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; the sink stays usable on the old file.
    fn rotate(&mut self) -> io::Result<PathBuf>;

    /// Directory whose usage counts against the capacity budget, if any.
    fn directory(&self) -> Option<PathBuf> {
        None
    }
}

/// Append-only audit log file.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
    size: u64,
}

impl FileSink {
    /// Open (or create) the log at `path` with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory or file cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        let size = file.metadata()?.len();
        debug!(path = %path.display(), size, "audit log opened");
        Ok(Self {
            path,
            file: Some(file),
            size,
        })
    }

    /// Path of the active file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("audit log file is not open"))
    }
}

impl LogSink for FileSink {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut buf = String::with_capacity(line.len().saturating_add(1));
        buf.push_str(line);
        buf.push('\n');
        self.file()?.write_all(buf.as_bytes())?;
        self.size = self.size.saturating_add(buf.len() as u64);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file()?.sync_data()
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.size)
    }

    fn rotate(&mut self) -> io::Result<PathBuf> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }

        let archive = archive_path(&self.path, Utc::now());
        if let Err(e) = std::fs::rename(&self.path, &archive) {
            warn!(path = %self.path.display(), error = %e, "audit log rotation failed, continuing on current file");
            self.file = Some(open_append(&self.path)?);
            return Err(e);
        }

        let file = open_append(&self.path)?;
        self.size = file.metadata()?.len();
        self.file = Some(file);
        Ok(archive)
    }

    fn directory(&self) -> Option<PathBuf> {
        self.path.parent().map(Path::to_path_buf)
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// `<stem>_<YYYYmmdd_HHMMSS>[_n].<ext>` next to `path`, skipping names
/// already taken.
fn archive_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let stem = path
        .file_stem()
        .map_or_else(|| "audit".to_string(), |s| s.to_string_lossy().into_owned());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stamp = now.format("%Y%m%d_%H%M%S");
    let dir = path.parent().unwrap_or_else(|| Path::new(""));

    let mut candidate = dir.join(format!("{stem}_{stamp}{ext}"));
    let mut n: u32 = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}_{stamp}_{n}{ext}"));
        n = n.saturating_add(1);
    }
    candidate
}
