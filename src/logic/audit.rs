//! Audit sink
//!
//! Append-only record of every executed defense action and key
//! rotation. One text line per action:
//! `[<ISO-8601 timestamp>] <ACTION_NAME> - <details>`.
//!
//! Failures surface only here; the core has no interactive failure
//! reporting.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;

/// Append-only destination for audit records. Appends are
/// best-effort: a failing sink is logged, never propagated.
pub trait AuditSink: Send + Sync {
    fn append(&self, action: &str, details: &str);
}

/// File-backed sink.
pub struct FileAuditSink {
    file: Mutex<File>,
}

impl FileAuditSink {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(dir) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                log::warn!("Cannot create audit directory {}: {}", dir.display(), e);
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn append(&self, action: &str, details: &str) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let line = format!("[{}] {} - {}\n", timestamp, action, details);
        let mut file = self.file.lock();
        if let Err(e) = file.write_all(line.as_bytes()).and_then(|_| file.flush()) {
            log::error!("Failed to append audit record {}: {}", action, e);
        }
    }
}
