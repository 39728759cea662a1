//! Attempt records and the snapshots handed to callers.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_crypto::ContentHash;

/// Persisted attempt state for one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Consecutive failed attempts.
    pub count: u32,
    /// First failure of the current series.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_attempt_at: Option<DateTime<Utc>>,
    /// Most recent attempt of any kind.
    pub last_attempt_at: DateTime<Utc>,
    /// Whether a lock was imposed (it may have expired since).
    pub locked: bool,
    /// When the lock expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
    /// How many times this identifier has been locked, ever.
    #[serde(default)]
    pub lockout_count: u32,
}

impl AttemptRecord {
    pub(crate) fn new(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            first_attempt_at: None,
            last_attempt_at: now,
            locked: false,
            locked_until: None,
            lockout_count: 0,
        }
    }

    /// Whether a lock is in force at `now`.
    #[must_use]
    pub fn is_lock_active(&self, now: DateTime<Utc>) -> bool {
        self.locked && self.locked_until.is_some_and(|until| now < until)
    }

    /// Whether a lock was imposed and has since run out.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.locked && !self.is_lock_active(now)
    }

    /// Time left on the lock (zero if none).
    #[must_use]
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        match self.locked_until {
            Some(until) if self.locked => until.signed_duration_since(now).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }

    pub(crate) fn release(&mut self) {
        self.locked = false;
        self.locked_until = None;
        self.count = 0;
    }
}

/// The signed payload of the lockout store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutState {
    /// Records keyed by the SHA-256 hex of the identifier.
    pub attempts: BTreeMap<String, AttemptRecord>,
}

/// Storage key for an identifier: the full SHA-256 hex digest.
#[must_use]
pub fn identifier_key(identifier: &str) -> String {
    ContentHash::hash(identifier.as_bytes()).to_hex()
}

/// Masked identifier for logs and listings: `hash:` plus 12 hex characters.
#[must_use]
pub fn mask_identifier(identifier: &str) -> String {
    mask_key(&identifier_key(identifier))
}

pub(crate) fn mask_key(key: &str) -> String {
    format!("hash:{}", key.get(..12).unwrap_or(key))
}

/// Independent copy of one identifier's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptSnapshot {
    /// Masked identifier.
    pub identifier: String,
    /// Consecutive failed attempts.
    pub count: u32,
    /// First failure of the current series.
    pub first_attempt_at: Option<DateTime<Utc>>,
    /// Most recent attempt.
    pub last_attempt_at: DateTime<Utc>,
    /// Whether a lock is in force right now.
    pub locked: bool,
    /// When the lock expires.
    pub locked_until: Option<DateTime<Utc>>,
    /// Time left on the lock.
    pub time_remaining: Duration,
    /// Lifetime number of lockouts.
    pub lockout_count: u32,
}

impl AttemptSnapshot {
    pub(crate) fn capture(key: &str, record: &AttemptRecord, now: DateTime<Utc>) -> Self {
        Self {
            identifier: mask_key(key),
            count: record.count,
            first_attempt_at: record.first_attempt_at,
            last_attempt_at: record.last_attempt_at,
            locked: record.is_lock_active(now),
            locked_until: record.locked_until,
            time_remaining: record.time_remaining(now),
            lockout_count: record.lockout_count,
        }
    }
}

/// A currently locked identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedIdentifier {
    /// Masked identifier.
    pub identifier: String,
    /// When the lock was imposed.
    pub locked_at: DateTime<Utc>,
    /// When the lock expires.
    pub locked_until: DateTime<Utc>,
    /// Time left on the lock.
    pub time_remaining: Duration,
    /// Lifetime number of lockouts.
    pub lockout_count: u32,
    /// Failed attempts in the series that caused the lock.
    pub failed_count: u32,
}

/// Aggregate figures for the whole store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutStats {
    /// Identifiers with a record.
    pub total_tracked: usize,
    /// Identifiers locked right now.
    pub currently_locked: usize,
    /// Sum of lifetime lockouts.
    pub total_lockouts: u64,
    /// Policy: failures before lockout.
    pub max_attempts: u32,
    /// Policy: lock duration.
    pub lockout_duration: Duration,
    /// Policy: whether enforcement is on.
    pub enabled: bool,
    /// Whether the store is in paranoid mode.
    pub paranoid: bool,
}

/// What a [`cleanup`](crate::LockoutStore::cleanup) pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    /// Expired locks released.
    pub released: usize,
    /// Idle records without any failure history removed.
    pub removed: usize,
}

impl CleanupSummary {
    /// Whether anything changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.released == 0 && self.removed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_is_stable_and_short() {
        let masked = mask_identifier("alice");
        assert!(masked.starts_with("hash:"));
        assert_eq!(masked.len(), 17);
        assert_eq!(masked, mask_identifier("alice"));
        assert_ne!(masked, mask_identifier("bob"));
        assert!(identifier_key("alice").starts_with(&masked[5..]));
    }

    #[test]
    fn test_lock_expiry() {
        let now = Utc::now();
        let mut record = AttemptRecord::new(now);
        assert!(!record.is_lock_active(now));

        record.locked = true;
        record.locked_until = Some(now + chrono::Duration::seconds(60));
        assert!(record.is_lock_active(now));
        assert!(!record.is_expired(now));
        assert!(record.time_remaining(now) > Duration::from_secs(59));

        let later = now + chrono::Duration::seconds(61);
        assert!(record.is_expired(later));
        assert_eq!(record.time_remaining(later), Duration::ZERO);
    }
}
