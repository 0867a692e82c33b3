//! Minimal example: a capsule's life from sign-up to unseal.
//!
//! Run with: `cargo run --example capsule_demo`
//! Set `RUST_LOG=chronovault=debug` to see the crate's tracing output.
//!
//! - Alice signs up and seals a private-self capsule that opens in 2 seconds
//! - The viewer counts down, then unlocks it with her session
//! - A stranger is denied
//! - Every unlock outcome is persisted to a JSON-lines audit file

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use chronovault::audit::{FileAuditSink, UnlockAuditLog};
use chronovault::capsule::{create_capsule, CapsuleDraft};
use chronovault::countdown::{Countdown, SystemClock};
use chronovault::notify::{Notifier, ReceiptEmail};
use chronovault::{DocumentStore, MemoryStore, Principal, Session, UnlockFlow, VaultConfig, VaultResult, Visibility};
use tracing_subscriber::EnvFilter;

struct StdoutNotifier;

#[async_trait]
impl Notifier for StdoutNotifier {
    async fn send(&self, to: &str, email: &ReceiptEmail) -> VaultResult<()> {
        println!("[mail] to {to}: {}", email.subject);
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 1. Setup
    let config = VaultConfig::default();
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());

    let audit_path = std::env::temp_dir().join("chronovault_audit.jsonl");
    let mut log = UnlockAuditLog::new();
    log.add_forward_sink(Box::new(FileAuditSink::new(&audit_path)?));
    let audit = Arc::new(Mutex::new(log));

    // 2. Alice signs up; her master key is derived from the password
    let alice = Principal::new("uid-alice", "alice@example.com");
    let session = Session::sign_up(store.as_ref(), alice, "correct horse battery staple", &config).await?;
    println!("Signed up as alice");

    // 3. Seal a capsule only she can open
    let draft = CapsuleDraft {
        title: "Note to self".into(),
        message: "Did you remember to stretch today?".into(),
        visibility: Visibility::PrivateSelf,
        open_date: Utc::now() + Duration::seconds(2),
        recipient: None,
    };
    let created = create_capsule(
        store.as_ref(),
        Arc::new(StdoutNotifier),
        &draft,
        &session,
        Utc::now(),
        &config,
    )
    .await?;
    println!("Sealed capsule {}", created.id);
    if let Some(link) = &created.share_link {
        println!("Share link: {}/capsules/{}#<key>", config.share_base_url, link.capsule_id);
    }

    // 4. Too early: the flow stays locked while the countdown runs
    let mut flow = UnlockFlow::load(Arc::clone(&store), &created.id)
        .await?
        .with_audit(Arc::clone(&audit));
    let state = flow.advance(Some(&session), Utc::now()).await;
    println!("Before open date: {state:?}");

    let mut countdown = Countdown::start(draft.open_date, Arc::new(SystemClock), config.countdown_tick());
    while !countdown.is_ready() {
        println!("  {}", countdown.text());
        if !countdown.changed().await {
            break;
        }
    }
    println!("  {}", countdown.text());

    // 5. A stranger is turned away without any decryption
    let stranger = Session::restore(Principal::new("uid-mallory", "mallory@example.com"));
    let mut denied = UnlockFlow::load(Arc::clone(&store), &created.id)
        .await?
        .with_audit(Arc::clone(&audit));
    println!("Stranger: {:?}", denied.advance(Some(&stranger), Utc::now()).await);

    // 6. Alice opens it
    let state = flow.advance(Some(&session), Utc::now()).await;
    println!("Alice: {state:?} -> {:?}", flow.message().unwrap_or_default());
    flow.status_update_settled().await;

    let records = audit.lock().map(|log| log.len()).unwrap_or_default();
    println!("{records} audit records written to {}", audit_path.display());

    Ok(())
}
