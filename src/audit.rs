//! Audit logging for delegated signing.
//!
//! Records connection and request lifecycle events to a local JSONL file
//! for security review. Appends are best-effort: a failing audit write
//! never fails the signing operation it describes.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    timestamp: String,
    operation: &'a str,
    details: &'a str,
}

/// Append-only audit log.
pub struct AuditLog {
    path: PathBuf,
    enabled: bool,
}

impl AuditLog {
    /// Create an audit log appending to the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            enabled: true,
        }
    }

    /// An audit log that records nothing.
    pub fn disabled() -> Self {
        Self {
            path: PathBuf::new(),
            enabled: false,
        }
    }

    /// Record one audit event.
    pub fn record(&mut self, operation: &str, details: &str) {
        if !self.enabled {
            return;
        }

        let entry = AuditEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            operation,
            details,
        };

        if let Ok(json) = serde_json::to_string(&entry) {
            if let Ok(mut file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
            {
                let _ = writeln!(file, "{json}");
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_log_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AuditLog::new(dir.path().join("signer.audit.jsonl"));

        log.record("request_sent", "id: a1, method: sign_event");
        log.record("response_received", "id: a1");

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let entry: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(entry["operation"], "request_sent");
        assert_eq!(entry["details"], "id: a1, method: sign_event");
        assert!(entry["timestamp"].is_string());
    }

    #[test]
    fn test_audit_log_disabled_records_nothing() {
        let mut log = AuditLog::disabled();
        log.record("request_sent", "id: a1");
        assert_eq!(log.path(), Path::new(""));
    }
}
