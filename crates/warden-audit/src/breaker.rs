//! Circuit breaker for the audit write path.

use std::time::{Duration, Instant};

/// Breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub threshold: u32,
    /// How long the breaker stays open before a trial is allowed.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Writes flow normally.
    Closed,
    /// Writes are rejected without I/O until the cool-down elapses.
    Open {
        /// When the breaker opened.
        since: Instant,
    },
    /// One trial write is in flight.
    HalfOpen,
}

#[derive(Debug)]
pub(crate) struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    consecutive_failures: u32,
}

impl CircuitBreaker {
    pub(crate) fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            consecutive_failures: 0,
        }
    }

    pub(crate) fn state(&self) -> BreakerState {
        self.state
    }

    pub(crate) fn is_open(&self) -> bool {
        matches!(self.state, BreakerState::Open { .. })
    }

    pub(crate) fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Admit a write, or return the time left before a trial is allowed.
    ///
    /// The first call after the cool-down moves the breaker to half-open;
    /// its outcome decides whether the breaker closes or re-opens.
    pub(crate) fn admit(&mut self, now: Instant) -> Result<(), Duration> {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open { since } => {
                let elapsed = now.saturating_duration_since(since);
                if elapsed >= self.config.cooldown {
                    self.state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(self.config.cooldown.saturating_sub(elapsed))
                }
            },
        }
    }

    /// Record a successful write. Returns `true` if this closed the breaker.
    pub(crate) fn record_success(&mut self) -> bool {
        self.consecutive_failures = 0;
        let was_half_open = self.state == BreakerState::HalfOpen;
        self.state = BreakerState::Closed;
        was_half_open
    }

    /// Record a failed write. Returns `true` if this opened the breaker.
    pub(crate) fn record_failure(&mut self, now: Instant) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.state {
            BreakerState::HalfOpen => {
                self.state = BreakerState::Open { since: now };
                true
            },
            BreakerState::Closed if self.consecutive_failures >= self.config.threshold => {
                self.state = BreakerState::Open { since: now };
                true
            },
            _ => false,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.state = BreakerState::Closed;
    }
}
