//! Audit event types.
//!
//! An [`AuditEvent`] is what collaborators hand to the logger. It is
//! immutable once logged: the logger redacts a copy, writes it as one
//! pipe-delimited line, and the chain protector signs its digest.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_crypto::ContentHash;

use crate::error::{AuditError, AuditResult};

/// Well-known event type names.
pub mod event_types {
    /// A model query.
    pub const QUERY: &str = "QUERY";
    /// Application startup.
    pub const STARTUP: &str = "STARTUP";
    /// Application shutdown.
    pub const SHUTDOWN: &str = "SHUTDOWN";
    /// A user session began.
    pub const SESSION_START: &str = "SESSION_START";
    /// A user session ended.
    pub const SESSION_END: &str = "SESSION_END";
    /// The audit chain key was rotated.
    pub const AUDIT_KEY_ROTATED: &str = "AUDIT_KEY_ROTATED";
    /// One chain entry was re-signed during rotation.
    pub const AUDIT_ENTRY_RESIGNED: &str = "AUDIT_ENTRY_RESIGNED";
    /// An operator reset the audit failure state.
    pub const AUDIT_FAILURE_RESET: &str = "AUDIT_FAILURE_RESET";
    /// An operator cleared paranoid mode on the audit chain.
    pub const AUDIT_CHAIN_PARANOID_CLEARED: &str = "AUDIT_CHAIN_PARANOID_CLEARED";
}

/// A security-relevant event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Event type, e.g. `QUERY` or `AUTH_LOCKOUT`.
    pub event_type: String,
    /// Session the event belongs to (may be empty).
    #[serde(default)]
    pub session_id: String,
    /// Routing or classification tier (may be empty).
    #[serde(default)]
    pub tier: String,
    /// User query text.
    #[serde(default)]
    pub query: String,
    /// Tokens consumed.
    #[serde(default)]
    pub tokens: u64,
    /// Cost in cents.
    #[serde(default)]
    pub cost: f64,
    /// Whether the action succeeded.
    pub success: bool,
    /// Error message for failed actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Additional key/value context.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl AuditEvent {
    /// A successful event of `event_type`, timestamped now.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: event_type.into(),
            session_id: String::new(),
            tier: String::new(),
            query: String::new(),
            tokens: 0,
            cost: 0.0,
            success: true,
            error: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Set the session.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Set the tier.
    #[must_use]
    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = tier.into();
        self
    }

    /// Set the query text.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Set token usage and cost.
    #[must_use]
    pub fn with_usage(mut self, tokens: u64, cost: f64) -> Self {
        self.tokens = tokens;
        self.cost = cost;
        self
    }

    /// Mark the event as failed without an error message.
    #[must_use]
    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }

    /// Mark the event as failed with an error message.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    /// Add a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }

    /// Override the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Status column: `SUCCESS`, `FAILURE` or `ERROR: <message>`.
    #[must_use]
    pub fn status(&self) -> String {
        match (&self.error, self.success) {
            (_, true) => "SUCCESS".to_string(),
            (Some(error), false) if !error.is_empty() => format!("ERROR: {error}"),
            _ => "FAILURE".to_string(),
        }
    }

    /// Format as one pipe-delimited log line (no trailing newline).
    ///
    /// `timestamp | type | session | tier | "query" | tokens | cost | status`,
    /// followed by ` | k=v, k=v` when metadata is present. Free-text
    /// fields are escaped so one event always yields one physical line.
    #[must_use]
    pub fn to_log_line(&self) -> String {
        let query = if self.query.is_empty() {
            String::new()
        } else {
            format!("\"{}\"", escape_field(&self.query))
        };
        let tokens = if self.tokens > 0 {
            self.tokens.to_string()
        } else {
            String::new()
        };
        let cost = if self.cost > 0.0 {
            format!("{:.2}", self.cost)
        } else {
            String::new()
        };

        let mut line = format!(
            "{} | {} | {} | {} | {} | {} | {} | {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            escape_field(&self.event_type),
            escape_field(dash_if_empty(&self.session_id)),
            escape_field(dash_if_empty(&self.tier)),
            query,
            tokens,
            cost,
            escape_field(&self.status()),
        );

        if !self.metadata.is_empty() {
            line.push_str(" | ");
            for (i, (key, value)) in self.metadata.iter().enumerate() {
                if i > 0 {
                    line.push_str(", ");
                }
                let _ = write!(line, "{}={}", escape_field(key), escape_field(value));
            }
        }
        line
    }

    /// SHA-256 over the event's canonical JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Serialization`] if the event cannot be encoded.
    pub fn digest(&self) -> AuditResult<ContentHash> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| AuditError::Serialization(e.to_string()))?;
        Ok(ContentHash::hash(&bytes))
    }
}

fn dash_if_empty(s: &str) -> &str {
    if s.is_empty() { "-" } else { s }
}

/// Escape backslashes, the `|` separator and control characters.
fn escape_field(s: &str) -> Cow<'_, str> {
    if !s.chars().any(|c| c == '\\' || c == '|' || c.is_control()) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len().saturating_add(8));
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\|"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:04x}}}", u32::from(c));
            },
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn test_query_line_format() {
        let event = AuditEvent::new(event_types::QUERY)
            .with_timestamp(fixed_time())
            .with_session("sess-1")
            .with_tier("cloud")
            .with_query("what is rust")
            .with_usage(42, 1.5);

        assert_eq!(
            event.to_log_line(),
            "2026-03-14 09:26:53 | QUERY | sess-1 | cloud | \"what is rust\" | 42 | 1.50 | SUCCESS"
        );
    }

    #[test]
    fn test_empty_fields_and_failure_status() {
        let event = AuditEvent::new("AUTH_ATTEMPT")
            .with_timestamp(fixed_time())
            .failed();
        assert_eq!(
            event.to_log_line(),
            "2026-03-14 09:26:53 | AUTH_ATTEMPT | - | - |  |  |  | FAILURE"
        );

        let event = event.with_error("bad password");
        assert!(event.to_log_line().ends_with("| ERROR: bad password"));
    }

    #[test]
    fn test_metadata_is_appended_sorted() {
        let event = AuditEvent::new(event_types::STARTUP)
            .with_timestamp(fixed_time())
            .with_metadata("version", "0.1.1")
            .with_metadata("mode", "tui");

        assert!(
            event
                .to_log_line()
                .ends_with("| SUCCESS | mode=tui, version=0.1.1")
        );
    }

    #[test]
    fn test_embedded_newlines_cannot_forge_records() {
        let forged = "2026-01-01 00:00:00 | AUTH_UNLOCK | admin | - |  |  |  | SUCCESS";
        let event = AuditEvent::new("AUTH_ATTEMPT")
            .with_timestamp(fixed_time())
            .with_session("s\r\nx")
            .with_tier("a|b")
            .with_query("q\u{7}")
            .with_error(format!("boom\n{forged}"))
            .with_metadata("note\n", "x\ty\\z");

        let line = event.to_log_line();
        assert_eq!(line.lines().count(), 1);
        assert!(!line.chars().any(char::is_control));
        assert!(line.contains("| s\\r\\nx | a\\|b | \"q\\u{0007}\" |"));
        assert!(line.contains("ERROR: boom\\n2026-01-01 00:00:00 \\| AUTH_UNLOCK \\| admin"));
        assert!(line.ends_with("| note\\n=x\\ty\\\\z"));
        // Eight base columns plus metadata, whatever the field contents.
        assert_eq!(line.split(" | ").count(), 9);
    }

    #[test]
    fn test_digest_tracks_content() {
        let a = AuditEvent::new(event_types::QUERY)
            .with_timestamp(fixed_time())
            .with_query("one");
        let b = a.clone().with_query("two");

        assert_eq!(a.digest().unwrap(), a.clone().digest().unwrap());
        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
    }
}
