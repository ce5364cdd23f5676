//! Append-only JSON-lines audit log (spec §3 "Audit record", §4.3 step 7,
//! §5 "Ordering guarantees").
//!
//! Shared by the guardian (inbound accept/deny/error) and the admin
//! control plane (every mutation, success or failure). One `AuditLog`
//! instance owns exactly one file and serializes writes behind a mutex so
//! entries are appended in completion order.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// A single audit record. Extra fields (`channel`, `user_id`, `reason`,
/// …) are carried in `extra` and flattened into the JSON line so callers
/// don't need a different struct per action.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub ts: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub actor: String,
    pub action: String,
    pub status: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AuditRecord {
    pub fn new(actor: impl Into<String>, action: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            ts: Utc::now().to_rfc3339(),
            request_id: Uuid::new_v4().to_string(),
            session_id: None,
            actor: actor.into(),
            action: action.into(),
            status: status.into(),
            extra: Map::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach an arbitrary extra field, serialized with `serde_json`.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.extra.insert(key.to_string(), v);
        }
        self
    }
}

pub struct AuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl AuditLog {
    /// Open (creating if absent) the audit log at `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single JSON line, flushing immediately so a
    /// crash loses at most the in-flight record (spec §4.3 "Audit writer").
    pub fn append(&self, record: &AuditRecord) {
        let line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize audit record");
                return;
            }
        };
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{line}") {
            tracing::error!(error = %e, path = %self.path.display(), "failed to append audit record");
            return;
        }
        if let Err(e) = file.flush() {
            tracing::error!(error = %e, "failed to flush audit log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_json_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.jsonl")).unwrap();
        log.append(&AuditRecord::new("guardian", "inbound", "ok").with("channel", "api"));
        log.append(&AuditRecord::new("guardian", "inbound", "denied").with("channel", "api"));

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["status"], "ok");
        assert_eq!(first["channel"], "api");
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["status"], "denied");
    }

    #[test]
    fn request_id_defaults_to_fresh_uuid_each_time() {
        let a = AuditRecord::new("x", "y", "ok");
        let b = AuditRecord::new("x", "y", "ok");
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn session_id_omitted_when_absent() {
        let record = AuditRecord::new("x", "y", "ok");
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("session_id").is_none());
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c/audit.jsonl");
        let log = AuditLog::open(&nested).unwrap();
        log.append(&AuditRecord::new("x", "y", "ok"));
        assert!(nested.exists());
    }
}
