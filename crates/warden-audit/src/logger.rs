//! The audit logger and its failure response.
//!
//! Every [`AuditLogger::log`] call runs the same pipeline under one lock:
//!
//! 1. refuse immediately if the system has halted or the breaker is open
//! 2. redact the event
//! 3. check storage capacity (interval-gated)
//! 4. rotate the file if the next line would exceed the size limit
//! 5. write and sync the line
//! 6. append the event digest to the chain, if one is attached
//!
//! Any failure in steps 3-6 counts toward the circuit breaker and, with
//! `halt_on_failure`, halts the system until an operator calls
//! [`AuditLogger::reset_failure_state`]. The failure callback runs after
//! the lock is released but before `log` returns.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;

use tracing::{error, info, warn};

use crate::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use crate::capacity::{CapacityLevel, CapacityPolicy, CapacityStatus};
use crate::chain::ChainProtector;
use crate::error::{AuditError, AuditResult};
use crate::event::{AuditEvent, event_types};
use crate::redact::{RedactionSet, Redactor};
use crate::sink::{AuditSink, FileSink, LogSink};

/// Default size at which the active log is rotated.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10_485_760;

/// Called synchronously with every failure that counted against the logger.
pub type FailureCallback = Arc<dyn Fn(&AuditError) + Send + Sync>;

/// Logger settings.
#[derive(Debug, Clone)]
pub struct AuditLoggerConfig {
    /// When false, `log` accepts and discards every event.
    pub enabled: bool,
    /// Rotate once the active file would exceed this many bytes.
    pub max_file_size: u64,
    /// Halt on the first failure until an operator resets the logger.
    pub halt_on_failure: bool,
    /// Circuit breaker thresholds.
    pub breaker: BreakerConfig,
    /// Storage capacity thresholds.
    pub capacity: CapacityPolicy,
}

impl Default for AuditLoggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            halt_on_failure: true,
            breaker: BreakerConfig::default(),
            capacity: CapacityPolicy::default(),
        }
    }
}

struct LoggerState {
    sink: Box<dyn LogSink>,
    config: AuditLoggerConfig,
    breaker: CircuitBreaker,
    audit_failed: bool,
    last_failure: Option<String>,
    last_capacity_check: Option<Instant>,
}

impl LoggerState {
    /// Count a failure; returns the same error for the caller.
    fn record_failure(&mut self, err: AuditError) -> AuditError {
        let opened = self.breaker.record_failure(Instant::now());
        let failures = self.breaker.consecutive_failures();
        self.last_failure = Some(err.to_string());
        warn!(failures, error = %err, "audit failure");

        if opened {
            error!(
                failures,
                "audit circuit breaker opened; events are rejected until the cool-down elapses"
            );
        }
        if self.config.halt_on_failure && !self.audit_failed {
            self.audit_failed = true;
            error!(error = %err, "audit system halted; sensitive operations are blocked");
        }
        err
    }
}

enum Refusal {
    /// Rejected without I/O; not counted as a new failure.
    Rejected(AuditError),
    /// Counted failure; the callback runs.
    Failed(AuditError),
}

/// Fail-secure audit logger.
pub struct AuditLogger {
    state: Mutex<LoggerState>,
    redaction: RwLock<RedactionSet>,
    chain: Option<Arc<ChainProtector>>,
    on_failure: RwLock<Option<FailureCallback>>,
}

impl AuditLogger {
    /// Open a logger writing to the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Io`] if the file cannot be opened.
    pub fn open(path: impl Into<PathBuf>, config: AuditLoggerConfig) -> AuditResult<Self> {
        let sink = FileSink::open(path).map_err(|e| AuditError::Io(e.to_string()))?;
        Ok(Self::with_sink(Box::new(sink), config))
    }

    /// Create a logger over any [`LogSink`].
    #[must_use]
    pub fn with_sink(sink: Box<dyn LogSink>, config: AuditLoggerConfig) -> Self {
        let breaker = CircuitBreaker::new(config.breaker);
        Self {
            state: Mutex::new(LoggerState {
                sink,
                config,
                breaker,
                audit_failed: false,
                last_failure: None,
                last_capacity_check: None,
            }),
            redaction: RwLock::new(RedactionSet::with_defaults()),
            chain: None,
            on_failure: RwLock::new(None),
        }
    }

    /// Attach a chain; every logged event is then also signed into it.
    #[must_use]
    pub fn with_chain(mut self, chain: Arc<ChainProtector>) -> Self {
        self.chain = Some(chain);
        self
    }

    /// The attached chain, if any.
    #[must_use]
    pub fn chain(&self) -> Option<&Arc<ChainProtector>> {
        self.chain.as_ref()
    }

    /// Register the failure callback, replacing any previous one.
    pub fn set_failure_callback(&self, callback: FailureCallback) {
        *self
            .on_failure
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(callback);
    }

    /// Add a redactor that runs after the built-in ones.
    pub fn add_redactor(&self, redactor: Box<dyn Redactor>) {
        self.redaction
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(redactor);
    }

    fn lock(&self) -> MutexGuard<'_, LoggerState> {
        self.state.lock().unwrap_or_else(|e| {
            warn!("audit logger lock was poisoned, recovering");
            e.into_inner()
        })
    }

    /// Record `event`.
    ///
    /// # Errors
    ///
    /// - [`AuditError::SystemFailed`] once the logger has halted.
    /// - [`AuditError::CircuitBreakerOpen`] while the breaker is open; no
    ///   I/O is attempted.
    /// - The write, sync, rotation, capacity or chain error that made this
    ///   call fail.
    pub fn log(&self, event: AuditEvent) -> AuditResult<()> {
        let mut counted = Vec::new();
        let outcome = {
            let mut state = self.lock();
            self.log_locked(&mut state, event, &mut counted)
        };

        let result = match outcome {
            Ok(()) => Ok(()),
            Err(Refusal::Rejected(err)) => return Err(err),
            Err(Refusal::Failed(err)) => Err(err),
        };
        self.notify_failures(&counted, result.as_ref().err());
        result
    }

    /// Run the failure callback for every failure a call counted.
    fn notify_failures(&self, counted: &[AuditError], fatal: Option<&AuditError>) {
        if counted.is_empty() && fatal.is_none() {
            return;
        }
        let callback = self
            .on_failure
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            for err in counted.iter().chain(fatal) {
                callback(err);
            }
        }
    }

    /// Failures that do not stop the write (capacity and rotation without
    /// `halt_on_failure`) are pushed to `counted`; the call still writes,
    /// but its success no longer resets the failure counter.
    fn log_locked(
        &self,
        state: &mut LoggerState,
        event: AuditEvent,
        counted: &mut Vec<AuditError>,
    ) -> Result<(), Refusal> {
        if !state.config.enabled {
            return Ok(());
        }
        if state.audit_failed {
            return Err(Refusal::Rejected(AuditError::SystemFailed {
                last_failure: state
                    .last_failure
                    .clone()
                    .unwrap_or_else(|| "unknown failure".to_string()),
            }));
        }
        let now = Instant::now();
        if let Err(retry_in) = state.breaker.admit(now) {
            return Err(Refusal::Rejected(AuditError::CircuitBreakerOpen { retry_in }));
        }
        if state.breaker.state() == BreakerState::HalfOpen {
            info!("audit circuit breaker half-open, probing");
        }

        let event = self
            .redaction
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .apply(event);

        if let Some(err) = Self::capacity_gate(state, now) {
            let err = state.record_failure(err);
            if state.config.halt_on_failure {
                return Err(Refusal::Failed(err));
            }
            counted.push(err);
        }

        let line = event.to_log_line();
        if let Err(err) = Self::rotate_if_needed(state, line.len()) {
            let err = state.record_failure(err);
            if state.config.halt_on_failure {
                return Err(Refusal::Failed(err));
            }
            counted.push(err);
        }

        if let Err(e) = state.sink.write_line(&line) {
            return Err(Refusal::Failed(
                state.record_failure(AuditError::Write(e.to_string())),
            ));
        }
        if let Err(e) = state.sink.sync() {
            return Err(Refusal::Failed(
                state.record_failure(AuditError::Sync(e.to_string())),
            ));
        }

        if let Some(chain) = &self.chain
            && let Err(err) = chain.sign_log_entry(&event)
        {
            return Err(Refusal::Failed(state.record_failure(err)));
        }

        if counted.is_empty() && state.breaker.record_success() {
            info!("audit circuit breaker closed after successful trial");
        }
        Ok(())
    }

    /// Measure capacity if the check interval has elapsed.
    ///
    /// Returns an error for a critical level; warnings are only traced.
    fn capacity_gate(state: &mut LoggerState, now: Instant) -> Option<AuditError> {
        let due = state.last_capacity_check.is_none_or(|last| {
            now.saturating_duration_since(last) >= state.config.capacity.check_interval
        });
        if !due {
            return None;
        }
        state.last_capacity_check = Some(now);

        let dir = state.sink.directory()?;
        let status = match state.config.capacity.measure(&dir) {
            Ok(status) => status,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "audit capacity check failed");
                return None;
            },
        };
        match status.level {
            CapacityLevel::Normal => None,
            CapacityLevel::Warning => {
                warn!(
                    used_bytes = status.used_bytes,
                    budget_bytes = status.budget_bytes,
                    used_pct = status.used_pct,
                    "audit storage approaching capacity"
                );
                None
            },
            CapacityLevel::Critical => Some(AuditError::CapacityCritical {
                used_bytes: status.used_bytes,
                budget_bytes: status.budget_bytes,
            }),
        }
    }

    fn rotate_if_needed(state: &mut LoggerState, line_len: usize) -> AuditResult<()> {
        let size = state
            .sink
            .size()
            .map_err(|e| AuditError::Rotation(e.to_string()))?;
        let next = size.saturating_add(line_len as u64).saturating_add(1);
        if size == 0 || next <= state.config.max_file_size {
            return Ok(());
        }
        let archive = state
            .sink
            .rotate()
            .map_err(|e| AuditError::Rotation(e.to_string()))?;
        info!(archive = %archive.display(), "audit log rotated");
        Ok(())
    }

    /// Measure audit storage now, ignoring the check interval.
    ///
    /// Returns `None` for sinks without a directory.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Io`] if the directory cannot be measured.
    pub fn check_capacity(&self) -> AuditResult<Option<CapacityStatus>> {
        let mut state = self.lock();
        let Some(dir) = state.sink.directory() else {
            return Ok(None);
        };
        let status = state
            .config
            .capacity
            .measure(&dir)
            .map_err(|e| AuditError::Io(e.to_string()))?;
        state.last_capacity_check = Some(Instant::now());
        Ok(Some(status))
    }

    /// Whether the logger has halted.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.lock().audit_failed
    }

    /// Consecutive failures since the last successful write.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().breaker.consecutive_failures()
    }

    /// Whether the breaker is currently rejecting events.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        self.lock().breaker.is_open()
    }

    /// Description of the most recent failure.
    #[must_use]
    pub fn last_failure(&self) -> Option<String> {
        self.lock().last_failure.clone()
    }

    /// Operator recovery: clear the halt, the breaker and the failure
    /// counter, then record the reset itself.
    ///
    /// # Errors
    ///
    /// Returns the error from logging the reset event.
    pub fn reset_failure_state(&self, reason: &str) -> AuditResult<()> {
        let previous = {
            let mut state = self.lock();
            let previous = state.last_failure.take();
            state.audit_failed = false;
            state.breaker.reset();
            previous
        };
        warn!(reason, previous_failure = ?previous, "audit failure state reset by operator");

        let mut event =
            AuditEvent::new(event_types::AUDIT_FAILURE_RESET).with_metadata("reason", reason);
        if let Some(previous) = previous {
            event = event.with_metadata("previous_failure", previous);
        }
        self.log(event)
    }

    /// Log a generic successful event.
    ///
    /// # Errors
    ///
    /// Same as [`log`](Self::log).
    pub fn log_event(
        &self,
        session_id: &str,
        event_type: &str,
        metadata: BTreeMap<String, String>,
    ) -> AuditResult<()> {
        let mut event = AuditEvent::new(event_type).with_session(session_id);
        event.metadata = metadata;
        self.log(event)
    }

    /// Log a model query.
    ///
    /// # Errors
    ///
    /// Same as [`log`](Self::log).
    pub fn log_query(
        &self,
        session_id: &str,
        tier: &str,
        query: &str,
        tokens: u64,
        cost: f64,
        error: Option<&str>,
    ) -> AuditResult<()> {
        let mut event = AuditEvent::new(event_types::QUERY)
            .with_session(session_id)
            .with_tier(tier)
            .with_query(query)
            .with_usage(tokens, cost);
        if let Some(error) = error {
            event = event.with_error(error);
        }
        self.log(event)
    }

    /// Log application startup.
    ///
    /// # Errors
    ///
    /// Same as [`log`](Self::log).
    pub fn log_startup(
        &self,
        session_id: &str,
        metadata: BTreeMap<String, String>,
    ) -> AuditResult<()> {
        self.log_event(session_id, event_types::STARTUP, metadata)
    }

    /// Log application shutdown.
    ///
    /// # Errors
    ///
    /// Same as [`log`](Self::log).
    pub fn log_shutdown(
        &self,
        session_id: &str,
        metadata: BTreeMap<String, String>,
    ) -> AuditResult<()> {
        self.log_event(session_id, event_types::SHUTDOWN, metadata)
    }

    /// Log the start of a user session.
    ///
    /// # Errors
    ///
    /// Same as [`log`](Self::log).
    pub fn log_session_start(&self, session_id: &str, user: &str) -> AuditResult<()> {
        self.log(
            AuditEvent::new(event_types::SESSION_START)
                .with_session(session_id)
                .with_metadata("user", user),
        )
    }

    /// Log the end of a user session.
    ///
    /// # Errors
    ///
    /// Same as [`log`](Self::log).
    pub fn log_session_end(&self, session_id: &str, reason: &str) -> AuditResult<()> {
        self.log(
            AuditEvent::new(event_types::SESSION_END)
                .with_session(session_id)
                .with_metadata("reason", reason),
        )
    }

    /// Sync the active file to disk.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Sync`] if the flush fails.
    pub fn flush(&self) -> AuditResult<()> {
        self.lock()
            .sink
            .sync()
            .map_err(|e| AuditError::Sync(e.to_string()))
    }
}

impl AuditSink for AuditLogger {
    fn log(&self, event: AuditEvent) -> AuditResult<()> {
        AuditLogger::log(self, event)
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("chained", &self.chain.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// In-memory sink with failure injection and an I/O counter.
    #[derive(Clone, Default)]
    struct TestSink {
        lines: Arc<Mutex<Vec<String>>>,
        fail: Arc<AtomicBool>,
        io_calls: Arc<AtomicUsize>,
    }

    impl LogSink for TestSink {
        fn write_line(&mut self, line: &str) -> io::Result<()> {
            self.io_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(io::Error::other("disk on fire"));
            }
            self.lines.lock().unwrap().push(line.to_string());
            Ok(())
        }

        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn size(&self) -> io::Result<u64> {
            Ok(0)
        }

        fn rotate(&mut self) -> io::Result<PathBuf> {
            Ok(PathBuf::from("unused"))
        }
    }

    /// A sink that always looks full and can never rotate.
    #[derive(Clone, Default)]
    struct StuckRotationSink {
        lines: Arc<Mutex<Vec<String>>>,
    }

    impl LogSink for StuckRotationSink {
        fn write_line(&mut self, line: &str) -> io::Result<()> {
            self.lines.lock().unwrap().push(line.to_string());
            Ok(())
        }

        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn size(&self) -> io::Result<u64> {
            Ok(1_000_000)
        }

        fn rotate(&mut self) -> io::Result<PathBuf> {
            Err(io::Error::other("archive directory is read-only"))
        }
    }

    fn config(halt_on_failure: bool, threshold: u32, cooldown: Duration) -> AuditLoggerConfig {
        AuditLoggerConfig {
            halt_on_failure,
            breaker: BreakerConfig {
                threshold,
                cooldown,
            },
            ..AuditLoggerConfig::default()
        }
    }

    fn logger(cfg: AuditLoggerConfig) -> (AuditLogger, TestSink) {
        let sink = TestSink::default();
        (AuditLogger::with_sink(Box::new(sink.clone()), cfg), sink)
    }

    #[test]
    fn test_logs_redacted_line() {
        let (logger, sink) = logger(AuditLoggerConfig::default());
        logger
            .log_query(
                "s1",
                "cloud",
                "my key is sk-abcdefghijklmnopqrstuvwx",
                10,
                0.25,
                None,
            )
            .unwrap();

        let lines = sink.lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\"my key is [OPENAI_KEY_REDACTED]\""));
        assert!(!lines[0].contains("sk-abc"));
    }

    #[test]
    fn test_halt_on_failure_blocks_until_reset() {
        let (logger, sink) = logger(config(true, 5, Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        logger.set_failure_callback(Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        sink.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            logger.log(AuditEvent::new("X")),
            Err(AuditError::Write(_))
        ));
        assert!(logger.has_failed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        sink.fail.store(false, Ordering::SeqCst);
        let io_before = sink.io_calls.load(Ordering::SeqCst);
        assert!(matches!(
            logger.log(AuditEvent::new("X")),
            Err(AuditError::SystemFailed { .. })
        ));
        assert_eq!(sink.io_calls.load(Ordering::SeqCst), io_before);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        logger.reset_failure_state("disk replaced").unwrap();
        assert!(!logger.has_failed());
        logger.log(AuditEvent::new("X")).unwrap();
        let lines = sink.lines.lock().unwrap();
        assert!(lines[0].contains("AUDIT_FAILURE_RESET"));
    }

    #[test]
    fn test_breaker_opens_after_threshold_without_io() {
        let (logger, sink) = logger(config(false, 3, Duration::from_secs(60)));
        sink.fail.store(true, Ordering::SeqCst);

        for _ in 0..3 {
            assert!(matches!(
                logger.log(AuditEvent::new("X")),
                Err(AuditError::Write(_))
            ));
        }
        assert!(logger.is_circuit_open());
        assert_eq!(logger.consecutive_failures(), 3);
        assert!(!logger.has_failed());

        let io_before = sink.io_calls.load(Ordering::SeqCst);
        assert!(matches!(
            logger.log(AuditEvent::new("X")),
            Err(AuditError::CircuitBreakerOpen { .. })
        ));
        assert_eq!(sink.io_calls.load(Ordering::SeqCst), io_before);
    }

    #[test]
    fn test_breaker_allows_one_trial_after_cooldown() {
        let (logger, sink) = logger(config(false, 1, Duration::from_millis(30)));
        sink.fail.store(true, Ordering::SeqCst);
        assert!(logger.log(AuditEvent::new("X")).is_err());
        assert!(logger.is_circuit_open());

        std::thread::sleep(Duration::from_millis(50));
        let io_before = sink.io_calls.load(Ordering::SeqCst);
        // Trial fails: exactly one write attempted, breaker re-opens.
        assert!(matches!(
            logger.log(AuditEvent::new("X")),
            Err(AuditError::Write(_))
        ));
        assert_eq!(sink.io_calls.load(Ordering::SeqCst), io_before + 1);
        assert!(matches!(
            logger.log(AuditEvent::new("X")),
            Err(AuditError::CircuitBreakerOpen { .. })
        ));

        std::thread::sleep(Duration::from_millis(50));
        sink.fail.store(false, Ordering::SeqCst);
        logger.log(AuditEvent::new("X")).unwrap();
        assert!(!logger.is_circuit_open());
        assert_eq!(logger.consecutive_failures(), 0);
    }

    #[test]
    fn test_rotation_failures_count_without_halt() {
        let sink = StuckRotationSink::default();
        let cfg = AuditLoggerConfig {
            max_file_size: 100,
            ..config(false, 3, Duration::from_secs(3600))
        };
        let logger = AuditLogger::with_sink(Box::new(sink.clone()), cfg);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        logger.set_failure_callback(Arc::new(move |err: &AuditError| {
            assert!(matches!(err, AuditError::Rotation(_)));
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        // The lines still land on the current file.
        logger.log(AuditEvent::new("X")).unwrap();
        logger.log(AuditEvent::new("X")).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(logger.consecutive_failures(), 2);
        assert!(!logger.is_circuit_open());

        logger.log(AuditEvent::new("X")).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(logger.consecutive_failures(), 3);
        assert!(logger.is_circuit_open());
        assert!(logger.last_failure().unwrap().contains("read-only"));

        assert!(matches!(
            logger.log(AuditEvent::new("X")),
            Err(AuditError::CircuitBreakerOpen { .. })
        ));
        assert_eq!(sink.lines.lock().unwrap().len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!logger.has_failed());
    }

    #[test]
    fn test_disabled_logger_discards() {
        let cfg = AuditLoggerConfig {
            enabled: false,
            ..AuditLoggerConfig::default()
        };
        let (logger, sink) = logger(cfg);
        logger.log(AuditEvent::new("X")).unwrap();
        assert_eq!(sink.io_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rotation_on_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let cfg = AuditLoggerConfig {
            max_file_size: 120,
            ..AuditLoggerConfig::default()
        };
        let logger = AuditLogger::open(&path, cfg).unwrap();
        for n in 0..4 {
            logger
                .log(AuditEvent::new("QUERY").with_query(format!("query number {n}")))
                .unwrap();
        }

        let archives = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("audit_"))
            .count();
        assert!(archives >= 1);
        assert!(std::fs::metadata(&path).unwrap().len() <= 120);
    }

    #[test]
    fn test_capacity_critical_halts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.log"), vec![b'x'; 1000]).unwrap();
        let cfg = AuditLoggerConfig {
            capacity: CapacityPolicy {
                budget_bytes: 1000,
                ..CapacityPolicy::default()
            },
            ..AuditLoggerConfig::default()
        };
        let logger = AuditLogger::open(dir.path().join("audit.log"), cfg).unwrap();

        assert!(matches!(
            logger.log(AuditEvent::new("X")),
            Err(AuditError::CapacityCritical { .. })
        ));
        assert!(logger.has_failed());

        let status = logger.check_capacity().unwrap().unwrap();
        assert_eq!(status.level, CapacityLevel::Critical);
    }
}
