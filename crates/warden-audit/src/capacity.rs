//! Audit storage capacity monitoring.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// Thresholds for audit storage usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityPolicy {
    /// Storage budget for the audit directory in bytes.
    pub budget_bytes: u64,
    /// Usage percentage that raises a warning.
    pub warning_pct: u8,
    /// Usage percentage that counts as an audit failure.
    pub critical_pct: u8,
    /// Minimum time between two measurements.
    pub check_interval: Duration,
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self {
            budget_bytes: 10_737_418_240,
            warning_pct: 80,
            critical_pct: 90,
            check_interval: Duration::from_secs(300),
        }
    }
}

/// Severity of the current usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityLevel {
    /// Below the warning threshold.
    Normal,
    /// At or above the warning threshold.
    Warning,
    /// At or above the critical threshold.
    Critical,
}

/// One capacity measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityStatus {
    /// Bytes used by regular files under the audit directory.
    pub used_bytes: u64,
    /// The configured budget.
    pub budget_bytes: u64,
    /// Usage as a whole percentage of the budget (may exceed 100).
    pub used_pct: u64,
    /// Severity.
    pub level: CapacityLevel,
}

impl CapacityPolicy {
    /// Classify `used_bytes` against this policy.
    #[must_use]
    pub fn classify(&self, used_bytes: u64) -> CapacityStatus {
        let used_pct = used_bytes
            .saturating_mul(100)
            .checked_div(self.budget_bytes)
            .unwrap_or(u64::MAX);
        let level = if used_pct >= u64::from(self.critical_pct) {
            CapacityLevel::Critical
        } else if used_pct >= u64::from(self.warning_pct) {
            CapacityLevel::Warning
        } else {
            CapacityLevel::Normal
        };
        CapacityStatus {
            used_bytes,
            budget_bytes: self.budget_bytes,
            used_pct,
            level,
        }
    }

    /// Measure `dir` and classify the result.
    ///
    /// # Errors
    ///
    /// Returns the first walk error (e.g. the directory is unreadable).
    pub fn measure(&self, dir: &Path) -> std::io::Result<CapacityStatus> {
        Ok(self.classify(directory_usage(dir)?))
    }
}

/// Total size of the regular files under `dir`.
fn directory_usage(dir: &Path) -> std::io::Result<u64> {
    let mut total: u64 = 0;
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.file_type().is_file() {
            let len = entry.metadata().map_err(std::io::Error::other)?.len();
            total = total.saturating_add(len);
        }
    }
    Ok(total)
}
