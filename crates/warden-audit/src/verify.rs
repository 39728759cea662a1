//! Chain verification results.

use std::fmt;

use serde::{Deserialize, Serialize};
use warden_crypto::{MacTag, SigningKey};
use warden_storage::IntegrityViolation;

use crate::chain::{ChainEntry, link_hash};

/// One problem found while walking the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainIssue {
    /// An entry's recorded index does not match its position.
    IndexMismatch {
        /// Position in the list.
        position: u64,
        /// Index recorded in the entry.
        found: u64,
    },
    /// An entry is timestamped before its predecessor.
    TimestampRegression {
        /// The later entry.
        index: u64,
    },
    /// `previous_hash` does not match the predecessor's `chain_hash`.
    BrokenLink {
        /// The entry whose link is broken.
        index: u64,
    },
    /// `chain_hash` does not verify under the key.
    InvalidHash {
        /// The entry with the bad hash.
        index: u64,
    },
}

impl fmt::Display for ChainIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IndexMismatch { position, found } => {
                write!(f, "entry at position {position} records index {found}")
            },
            Self::TimestampRegression { index } => {
                write!(f, "entry {index} is older than its predecessor")
            },
            Self::BrokenLink { index } => {
                write!(f, "entry {index} does not link to its predecessor")
            },
            Self::InvalidHash { index } => write!(f, "entry {index} has an invalid chain hash"),
        }
    }
}

/// Result of verifying a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    /// Whether the chain is intact.
    pub valid: bool,
    /// Number of entries checked.
    pub length: usize,
    /// Problems found, in chain order.
    pub issues: Vec<ChainIssue>,
}

impl ChainVerification {
    /// The first problem, if any.
    #[must_use]
    pub fn first_issue(&self) -> Option<&ChainIssue> {
        self.issues.first()
    }
}

/// Walk `entries` and check ordering, linkage and every `chain_hash`.
pub(crate) fn verify_links(entries: &[ChainEntry], key: &SigningKey) -> ChainVerification {
    let mut issues = Vec::new();
    let mut previous: Option<&ChainEntry> = None;

    for (position, entry) in (0u64..).zip(entries) {
        if entry.index != position {
            issues.push(ChainIssue::IndexMismatch {
                position,
                found: entry.index,
            });
        }

        let expected_previous = previous.map_or_else(MacTag::zero, |p| p.chain_hash);
        if entry.previous_hash != expected_previous {
            issues.push(ChainIssue::BrokenLink { index: position });
        }
        if let Some(p) = previous
            && entry.timestamp < p.timestamp
        {
            issues.push(ChainIssue::TimestampRegression { index: position });
        }

        let expected = link_hash(key, &entry.event_digest, &entry.previous_hash);
        if expected != entry.chain_hash {
            issues.push(ChainIssue::InvalidHash { index: position });
        }
        previous = Some(entry);
    }

    ChainVerification {
        valid: issues.is_empty(),
        length: entries.len(),
        issues,
    }
}

/// Everything [`detect_tampering`](crate::ChainProtector::detect_tampering)
/// found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TamperReport {
    /// Whether no evidence of tampering was found.
    pub clean: bool,
    /// Entries in the in-memory chain.
    pub chain_length: usize,
    /// Envelope-level violation of the persisted chain, if any.
    pub integrity: Option<IntegrityViolation>,
    /// Linkage and hash problems.
    pub chain_issues: Vec<ChainIssue>,
    /// Disagreements with the witness file.
    pub witness_issues: Vec<String>,
    /// Files readable or writable by group or others.
    pub permission_issues: Vec<String>,
    /// Entries dated in the future.
    pub timestamp_anomalies: Vec<String>,
}

impl TamperReport {
    pub(crate) fn finish(mut self) -> Self {
        self.clean = self.integrity.is_none()
            && self.chain_issues.is_empty()
            && self.witness_issues.is_empty()
            && self.permission_issues.is_empty()
            && self.timestamp_anomalies.is_empty();
        self
    }
}
