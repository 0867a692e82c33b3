//! Tests for the pluggable AuditSink / forward sink functionality.

use std::io::BufRead;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};

use chronovault::audit::{AuditSink, FileAuditSink, UnlockAuditLog, UnlockRecord};
use chronovault::capsule::{seal_capsule, CapsuleDraft};
use chronovault::{DocumentStore, MemoryStore, Principal, Session, UnlockFlow, UnlockState, VaultConfig, Visibility};

/// A test sink that collects records into a shared Vec.
struct SharedVecSink {
    records: Arc<Mutex<Vec<UnlockRecord>>>,
}

impl SharedVecSink {
    fn new(records: Arc<Mutex<Vec<UnlockRecord>>>) -> Self {
        Self { records }
    }
}

impl AuditSink for SharedVecSink {
    fn append(&mut self, record: UnlockRecord) {
        self.records.lock().unwrap().push(record);
    }
}

fn public_flow(open_in: Duration) -> UnlockFlow {
    let now = Utc::now();
    let draft = CapsuleDraft {
        title: "Audited capsule".into(),
        message: "every step of this unlock is recorded".into(),
        visibility: Visibility::Public,
        open_date: now + open_in,
        recipient: None,
    };
    let config = VaultConfig {
        kdf_iterations: 1_000,
        ..VaultConfig::default()
    };
    let creator = Session::restore(Principal::new("uid-a", "a@example.com"));
    let envelope = seal_capsule(&draft, &creator, now, &config).unwrap().envelope;
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    UnlockFlow::new("cap-1", envelope, store)
}

#[tokio::test]
async fn test_forward_sink_receives_records() {
    let records = Arc::new(Mutex::new(Vec::new()));
    let mut log = UnlockAuditLog::new();
    log.add_forward_sink(Box::new(SharedVecSink::new(Arc::clone(&records))));
    let log = Arc::new(Mutex::new(log));

    let open_in = Duration::hours(1);
    let mut flow = public_flow(open_in).with_audit(Arc::clone(&log));
    let viewer = Session::restore(Principal::new("uid-v", "v@example.com"));
    let now = Utc::now();

    assert_eq!(flow.advance(Some(&viewer), now).await, UnlockState::Locked);
    // Unchanged state is not recorded twice.
    assert_eq!(flow.advance(Some(&viewer), now).await, UnlockState::Locked);
    assert_eq!(
        flow.advance(Some(&viewer), now + open_in + Duration::seconds(1)).await,
        UnlockState::Unsealed
    );

    // Primary log has the records
    assert_eq!(log.lock().unwrap().len(), 2);

    // Forward sink also received them
    let collected = records.lock().unwrap();
    assert_eq!(collected.len(), 2);
    assert_eq!(collected[0].state, UnlockState::Locked);
    assert_eq!(collected[1].state, UnlockState::Unsealed);
    assert_eq!(collected[1].principal_uid.as_deref(), Some("uid-v"));
    assert!(collected.iter().all(|r| r.capsule_id == "cap-1" && !r.key_supplied));
}

#[tokio::test]
async fn test_file_sink_writes_json_lines() {
    let path = std::env::temp_dir().join(format!("chronovault-audit-{}.jsonl", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let mut log = UnlockAuditLog::new();
    log.add_forward_sink(Box::new(FileAuditSink::new(&path).unwrap()));
    let log = Arc::new(Mutex::new(log));

    let mut flow = public_flow(Duration::seconds(1)).with_audit(Arc::clone(&log));
    let state = flow
        .advance(Some(&Session::anonymous()), Utc::now() + Duration::seconds(2))
        .await;
    assert_eq!(state, UnlockState::Unsealed);

    let file = std::fs::File::open(&path).unwrap();
    let lines: Vec<String> = std::io::BufReader::new(file).lines().map(Result::unwrap).collect();
    assert_eq!(lines.len(), 1);
    let record: UnlockRecord = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(record.state, UnlockState::Unsealed);
    assert!(record.principal_uid.is_none());
    assert!(!lines[0].contains("every step of this unlock"));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_no_sinks_still_records() {
    let mut log = UnlockAuditLog::new();
    log.append(UnlockRecord {
        capsule_id: "cap-2".into(),
        principal_uid: Some("uid-a".into()),
        state: UnlockState::AccessDenied,
        key_supplied: false,
        timestamp: Utc::now(),
    });
    assert_eq!(log.len(), 1);
    assert_eq!(log.for_capsule("cap-2").count(), 1);
    assert_eq!(log.iter().next().unwrap().state, UnlockState::AccessDenied);
}
