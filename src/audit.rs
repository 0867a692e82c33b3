//! Immutable unlock audit log.
//!
//! Records every state an unlock flow settles in: locked, denied, failed,
//! unsealed. The log is append-only and carries no key material or
//! plaintext. Supports pluggable sinks for forwarding records to files or
//! other stores.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::unlock::UnlockState;

/// A sink that receives audit records.
pub trait AuditSink: Send {
    /// Append a record. Called for every recorded unlock outcome.
    fn append(&mut self, record: UnlockRecord);
}

/// One unlock outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockRecord {
    pub capsule_id: String,
    /// Principal that attempted the unlock, if any.
    pub principal_uid: Option<String>,
    pub state: UnlockState,
    /// Whether the attempt used a key typed in by the viewer.
    pub key_supplied: bool,
    pub timestamp: DateTime<Utc>,
}

/// An append-only log of unlock outcomes.
/// Can forward records to additional sinks via `add_forward_sink`.
#[derive(Default, Serialize, Deserialize)]
pub struct UnlockAuditLog {
    records: Vec<UnlockRecord>,
    #[serde(skip)]
    forward_sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for UnlockAuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockAuditLog")
            .field("records", &self.records)
            .field("forward_sinks", &self.forward_sinks.len())
            .finish()
    }
}

impl UnlockAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink to receive a copy of every record.
    pub fn add_forward_sink(&mut self, sink: Box<dyn AuditSink>) {
        self.forward_sinks.push(sink);
    }

    /// Append a record and forward it to every attached sink.
    pub fn append(&mut self, record: UnlockRecord) {
        for sink in self.forward_sinks.iter_mut() {
            sink.append(record.clone());
        }
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, UnlockRecord> {
        self.records.iter()
    }

    /// Records for one capsule, oldest first.
    pub fn for_capsule<'a>(&'a self, capsule_id: &'a str) -> impl Iterator<Item = &'a UnlockRecord> + 'a {
        self.records.iter().filter(move |r| r.capsule_id == capsule_id)
    }

    /// Number of failed attempts with a viewer-supplied key for a capsule.
    pub fn failed_key_submissions(&self, capsule_id: &str) -> usize {
        self.for_capsule(capsule_id)
            .filter(|r| r.key_supplied && r.state == UnlockState::DecryptionFailed)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Built-in sink: file
// ---------------------------------------------------------------------------

/// Writes audit records as JSON lines (one per record) to a file.
/// Creates the file if it doesn't exist; appends if it does.
pub struct FileAuditSink {
    file: std::fs::File,
}

impl FileAuditSink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl AuditSink for FileAuditSink {
    fn append(&mut self, record: UnlockRecord) {
        let written = serde_json::to_string(&record)
            .map_err(std::io::Error::from)
            .and_then(|line| {
                writeln!(self.file, "{line}")?;
                self.file.flush()
            });
        if let Err(e) = written {
            warn!(capsule_id = %record.capsule_id, error = %e, "audit sink write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(state: UnlockState, key_supplied: bool) -> UnlockRecord {
        UnlockRecord {
            capsule_id: "c1".into(),
            principal_uid: None,
            state,
            key_supplied,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn counts_failed_submissions() {
        let mut log = UnlockAuditLog::new();
        log.append(record(UnlockState::MissingKey, false));
        log.append(record(UnlockState::DecryptionFailed, true));
        log.append(record(UnlockState::DecryptionFailed, true));
        log.append(record(UnlockState::DecryptionFailed, false));
        assert_eq!(log.len(), 4);
        assert_eq!(log.failed_key_submissions("c1"), 2);
        assert_eq!(log.failed_key_submissions("other"), 0);
    }

    #[test]
    fn record_serializes_state_name() {
        let line = serde_json::to_string(&record(UnlockState::AccessDenied, false)).unwrap();
        assert!(line.contains("\"state\":\"access_denied\""));
    }
}
