//! Scriptable sinks for failure-path tests.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use warden_audit::{AuditError, AuditEvent, AuditResult, AuditSink, LogSink};

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// In-memory [`LogSink`] whose failures are controlled by the test.
///
/// Clones share state, so a test keeps one handle while the logger owns
/// another.
#[derive(Clone, Default)]
pub struct ScriptedSink {
    lines: Arc<Mutex<Vec<String>>>,
    fail_writes: Arc<AtomicBool>,
    fail_next: Arc<AtomicUsize>,
    write_calls: Arc<AtomicUsize>,
}

impl ScriptedSink {
    /// A sink that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every write until switched off.
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Fail the next `n` writes.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Lines written so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        locked(&self.lines).clone()
    }

    /// Write attempts, including failed ones.
    #[must_use]
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        if self.fail_writes.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl LogSink for ScriptedSink {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail() {
            return Err(io::Error::other("scripted write failure"));
        }
        locked(&self.lines).push(line.to_owned());
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn size(&self) -> io::Result<u64> {
        let bytes = locked(&self.lines)
            .iter()
            .map(|l| l.len().saturating_add(1))
            .fold(0usize, usize::saturating_add);
        Ok(u64::try_from(bytes).unwrap_or(u64::MAX))
    }

    fn rotate(&mut self) -> io::Result<PathBuf> {
        locked(&self.lines).clear();
        Ok(PathBuf::from("scripted-archive.log"))
    }
}

/// [`AuditSink`] that keeps every event in memory.
#[derive(Clone, Default)]
pub struct RecordingAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingAuditSink {
    /// An accepting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every event until switched off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        locked(&self.events).clone()
    }

    /// Recorded event types, in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        locked(&self.events)
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }
}

impl AuditSink for RecordingAuditSink {
    fn log(&self, event: AuditEvent) -> AuditResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditError::Write("recording sink set to fail".to_owned()));
        }
        locked(&self.events).push(event);
        Ok(())
    }
}
