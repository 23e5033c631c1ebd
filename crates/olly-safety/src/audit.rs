// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Append-only audit trail.
//!
//! One JSON line per safety decision, written under the project's audit
//! path (default `<project>/.ollie/audit.jsonl`).  Entries are buffered and
//! flushed every [`FLUSH_EVERY`] records or on an explicit flush; every loop
//! termination path flushes.  Payloads are redacted before they enter the
//! buffer, so a crash can never spill raw secrets to disk.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::redact::{redact_text, redact_value};

const FLUSH_EVERY: usize = 10;

/// Outputs longer than this are truncated before redaction.
const OUTPUT_CAP_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Allowed,
    Denied,
    /// Executed after an operator approval
    Confirmed,
    /// The operator refused the confirmation
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub tool: String,
    pub args: Value,
    pub result: AuditResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct AuditLog {
    path: PathBuf,
    enabled: bool,
    session_id: String,
    buffer: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new(path: PathBuf, enabled: bool, session_id: impl Into<String>) -> Self {
        Self { path, enabled, session_id: session_id.into(), buffer: Vec::new() }
    }

    /// Queue one entry; payload fields are truncated and redacted here.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        tool: &str,
        args: &Value,
        result: AuditResult,
        reason: Option<String>,
        duration_ms: Option<u64>,
        output: Option<&str>,
        error: Option<&str>,
    ) {
        if !self.enabled {
            return;
        }
        self.buffer.push(AuditEntry {
            timestamp: Utc::now(),
            session_id: self.session_id.clone(),
            tool: tool.to_string(),
            args: redact_value(args),
            result,
            reason: reason.map(|r| redact_text(&r)),
            duration_ms,
            output: output.map(|o| redact_text(&truncate(o))),
            error: error.map(|e| redact_text(&truncate(e))),
        });
        if self.buffer.len() >= FLUSH_EVERY {
            self.flush();
        }
    }

    /// Write all buffered entries to disk.  I/O failure drops the batch
    /// with a warning; auditing must never take the agent down.
    pub fn flush(&mut self) {
        if !self.enabled || self.buffer.is_empty() {
            return;
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let mut lines = String::new();
        for entry in &self.buffer {
            match serde_json::to_string(entry) {
                Ok(line) => {
                    lines.push_str(&line);
                    lines.push('\n');
                }
                Err(e) => warn!("unserializable audit entry dropped: {e}"),
            }
        }
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(lines.as_bytes()));
        if let Err(e) = result {
            warn!(path = %self.path.display(), "audit flush failed: {e}");
        }
        self.buffer.clear();
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Drop for AuditLog {
    fn drop(&mut self) {
        self.flush();
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= OUTPUT_CAP_CHARS {
        return s.to_string();
    }
    s.chars().take(OUTPUT_CAP_CHARS).collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn read_lines(path: &std::path::Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn record_buffers_until_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".ollie/audit.jsonl");
        let mut log = AuditLog::new(path.clone(), true, "sess");
        log.record("read_file", &json!({"path": "x"}), AuditResult::Allowed, None, Some(3), None, None);
        assert_eq!(log.pending(), 1);
        assert!(!path.exists(), "nothing on disk before flush");
        log.flush();
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["tool"], "read_file");
        assert_eq!(lines[0]["result"], "allowed");
        assert_eq!(lines[0]["session_id"], "sess");
    }

    #[test]
    fn auto_flush_after_ten_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut log = AuditLog::new(path.clone(), true, "s");
        for i in 0..10 {
            log.record("t", &json!({"i": i}), AuditResult::Allowed, None, None, None, None);
        }
        assert_eq!(log.pending(), 0, "buffer should auto-flush at 10");
        assert_eq!(read_lines(&path).len(), 10);
    }

    #[test]
    fn entries_append_across_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut log = AuditLog::new(path.clone(), true, "s");
        log.record("a", &json!({}), AuditResult::Allowed, None, None, None, None);
        log.flush();
        log.record("b", &json!({}), AuditResult::Denied, Some("why".into()), None, None, None);
        log.flush();
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["tool"], "b");
        assert_eq!(lines[1]["reason"], "why");
    }

    #[test]
    fn args_are_redacted_before_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut log = AuditLog::new(path.clone(), true, "s");
        log.record(
            "run_command",
            &json!({"command": "deploy", "api_token": "sk-abcdefghijklmnop1234"}),
            AuditResult::Allowed,
            None,
            None,
            Some("token sk-abcdefghijklmnop1234 used"),
            None,
        );
        log.flush();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("sk-abcdefghijklmnop1234"), "secret leaked: {raw}");
        assert!(raw.contains("[REDACTED]"));
    }

    #[test]
    fn output_is_truncated_to_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut log = AuditLog::new(path.clone(), true, "s");
        let long = "x".repeat(5000);
        log.record("t", &json!({}), AuditResult::Allowed, None, None, Some(&long), None);
        log.flush();
        let lines = read_lines(&path);
        let stored = lines[0]["output"].as_str().unwrap();
        assert!(stored.len() <= OUTPUT_CAP_CHARS + 16);
    }

    #[test]
    fn disabled_log_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut log = AuditLog::new(path.clone(), false, "s");
        log.record("t", &json!({}), AuditResult::Allowed, None, None, None, None);
        log.flush();
        assert!(!path.exists());
    }

    #[test]
    fn drop_flushes_pending_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let mut log = AuditLog::new(path.clone(), true, "s");
            log.record("t", &json!({}), AuditResult::Rejected, None, None, None, None);
        }
        assert_eq!(read_lines(&path).len(), 1);
    }
}
