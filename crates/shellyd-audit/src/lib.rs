//! Append-only audit log for the shellyd daemon.
//!
//! Records flow through a single bounded queue into one writer task, one
//! JSON document per line, file mode 0600. Audit is best-effort by
//! contract: a full queue drops the record with a warning and never
//! blocks live terminal traffic.

mod rotation;
mod sink;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use rotation::{prune_archives, rotate_if_stale};
pub use sink::AuditSink;

/// Errors from the audit pipeline.
#[derive(Error, Debug)]
pub enum AuditError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using AuditError.
pub type AuditResult<T> = Result<T, AuditError>;

/// Record categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A committed input line (never truncated).
    Command,
    /// A terminal output chunk (capped at 500 characters).
    Output,
    /// Connection establish/terminate with cause.
    Connection,
}

/// One audit record, serialized as a single JSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// ISO-8601 timestamp with millisecond precision.
    pub timestamp: String,
    pub session_id: String,
    pub client_label: String,
    pub kind: AuditKind,
    pub payload: String,
}

impl AuditRecord {
    /// Build a record stamped with the current instant.
    pub fn now(session_id: &str, client_label: &str, kind: AuditKind, payload: String) -> Self {
        Self {
            timestamp: chrono::Utc::now()
                .format("%Y-%m-%dT%H:%M:%S%.3fZ")
                .to_string(),
            session_id: session_id.to_string(),
            client_label: client_label.to_string(),
            kind,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_timestamp_has_millis() {
        let record = AuditRecord::now("s1", "Phone A", AuditKind::Command, "ls".to_string());
        // e.g. 2026-08-02T10:15:00.123Z
        assert!(record.timestamp.ends_with('Z'));
        let dot = record.timestamp.rfind('.').unwrap();
        assert_eq!(record.timestamp.len() - dot, 5);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = AuditRecord::now("s1", "Phone A", AuditKind::Connection, "established".into());
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"sessionId\":\"s1\""));
        assert!(json.contains("\"clientLabel\":\"Phone A\""));
        assert!(json.contains("\"kind\":\"connection\""));
    }
}
