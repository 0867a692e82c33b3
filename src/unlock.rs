//! Unlock state machine.
//!
//! An [`UnlockFlow`] owns one capsule envelope and decides, on every call to
//! [`UnlockFlow::advance`], whether decryption may be attempted. Two gates
//! are checked before any cryptography runs:
//!
//! 1. **Time**: `now >= openDate`, otherwise `Locked`.
//! 2. **Authorization**: depends on the key strategy of the visibility.
//!    Public capsules need nothing; private-self capsules need the creator's
//!    session and master key; private-recipient capsules need the
//!    recipient's principal.
//!
//! ```text
//! AwaitingAuth ─┬─> Locked ──(tick)──> ...
//!               ├─> AccessDenied
//!               ├─> MissingKey ──(submit_key)──┐
//!               └─> Decrypting <───────────────┘
//!                      ├─> Unsealed
//!                      ├─> DecryptionFailed ──(submit_key)──> Decrypting
//!                      └─> Error
//! ```
//!
//! Unwrap and decrypt failures are reported identically.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::audit::{UnlockAuditLog, UnlockRecord};
use crate::capsule;
use crate::countdown;
use crate::crypto;
use crate::envelope::{CapsuleEnvelope, CapsuleStatus};
use crate::error::{VaultError, VaultResult};
use crate::keys::{KeyStrategy, MasterKey, MessageKey};
use crate::session::Session;
use crate::store::{collections, DocumentStore};

/// Where the flow currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockState {
    /// Authentication status not yet resolved.
    AwaitingAuth,
    /// Before the open date.
    Locked,
    Decrypting,
    Unsealed,
    /// Authorized, but the master key is not in the session.
    MissingKey,
    AccessDenied,
    /// Tag verification failed on unwrap or decrypt.
    DecryptionFailed,
    /// Corrupt record or environment fault.
    Error,
}

impl UnlockState {
    /// States `advance` never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Unsealed | Self::AccessDenied | Self::DecryptionFailed | Self::Error
        )
    }

    /// States from which a viewer-supplied key is accepted.
    pub fn accepts_key(&self) -> bool {
        matches!(self, Self::MissingKey | Self::DecryptionFailed)
    }
}

enum KeySource {
    Envelope,
    Master(Arc<MasterKey>),
    Supplied(MessageKey),
}

enum Gate {
    Settle(UnlockState),
    Decrypt(KeySource),
}

fn open_envelope(envelope: &CapsuleEnvelope, source: KeySource) -> VaultResult<Zeroizing<Vec<u8>>> {
    let key = match source {
        KeySource::Envelope => envelope.key_protection.exported()?,
        KeySource::Master(master) => envelope.key_protection.unwrap_with(&master)?,
        KeySource::Supplied(key) => key,
    };
    Ok(Zeroizing::new(envelope.open_with(&key)?))
}

/// The unlock flow for one capsule view.
pub struct UnlockFlow {
    capsule_id: String,
    envelope: CapsuleEnvelope,
    store: Arc<dyn DocumentStore>,
    state: UnlockState,
    plaintext: Option<Zeroizing<Vec<u8>>>,
    viewer_uid: Option<String>,
    rejected_key: Option<[u8; 32]>,
    decrypt_attempts: u32,
    status_update: Option<JoinHandle<()>>,
    audit: Option<Arc<Mutex<UnlockAuditLog>>>,
}

impl fmt::Debug for UnlockFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockFlow")
            .field("capsule_id", &self.capsule_id)
            .field("visibility", &self.envelope.visibility)
            .field("state", &self.state)
            .field("decrypt_attempts", &self.decrypt_attempts)
            .finish_non_exhaustive()
    }
}

impl UnlockFlow {
    /// Start a flow in `AwaitingAuth`.
    pub fn new(capsule_id: impl Into<String>, envelope: CapsuleEnvelope, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            capsule_id: capsule_id.into(),
            envelope,
            store,
            state: UnlockState::AwaitingAuth,
            plaintext: None,
            viewer_uid: None,
            rejected_key: None,
            decrypt_attempts: 0,
            status_update: None,
            audit: None,
        }
    }

    /// Fetch the envelope from the store and start a flow for it.
    pub async fn load(store: Arc<dyn DocumentStore>, capsule_id: &str) -> VaultResult<Self> {
        let envelope = capsule::load_capsule(store.as_ref(), capsule_id).await?;
        Ok(Self::new(capsule_id, envelope, store))
    }

    /// Record every settled state in `audit`.
    pub fn with_audit(mut self, audit: Arc<Mutex<UnlockAuditLog>>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn state(&self) -> UnlockState {
        self.state
    }

    pub fn capsule_id(&self) -> &str {
        &self.capsule_id
    }

    pub fn envelope(&self) -> &CapsuleEnvelope {
        &self.envelope
    }

    /// The decrypted body, once `Unsealed`.
    pub fn plaintext(&self) -> Option<&[u8]> {
        self.plaintext.as_deref().map(Vec::as_slice)
    }

    /// The decrypted body as text, if it is valid UTF-8.
    pub fn message(&self) -> Option<&str> {
        self.plaintext().and_then(|p| std::str::from_utf8(p).ok())
    }

    /// How many times decryption has actually been attempted.
    pub fn decrypt_attempts(&self) -> u32 {
        self.decrypt_attempts
    }

    /// Time left until the open date.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        countdown::remaining(self.envelope.open_date_utc, now)
    }

    fn gate(&self, auth: Option<&Session>, now: DateTime<Utc>) -> Gate {
        let Some(session) = auth else {
            return Gate::Settle(UnlockState::AwaitingAuth);
        };
        if let Err(e) = self.envelope.validate() {
            error!(capsule_id = %self.capsule_id, error = %e, "envelope rejected");
            return Gate::Settle(UnlockState::Error);
        }
        if !self.envelope.is_ready(now) {
            return Gate::Settle(UnlockState::Locked);
        }

        match self.envelope.strategy() {
            KeyStrategy::ExportPlaintext => Gate::Decrypt(KeySource::Envelope),
            KeyStrategy::WrapWithMaster => match session.principal() {
                Some(p) if p.uid == self.envelope.creator_id => match session.master_key_handle() {
                    Some(master) => Gate::Decrypt(KeySource::Master(master)),
                    None => Gate::Settle(UnlockState::MissingKey),
                },
                _ => Gate::Settle(UnlockState::AccessDenied),
            },
            KeyStrategy::ExportPlaintextWithAcl => {
                match (session.principal(), self.envelope.recipient_id.as_deref()) {
                    (Some(p), Some(recipient)) if p.uid == recipient => Gate::Decrypt(KeySource::Envelope),
                    _ => Gate::Settle(UnlockState::AccessDenied),
                }
            }
        }
    }

    /// Re-evaluate the gates and, if both pass, decrypt.
    ///
    /// `auth` is `None` while the authentication provider has not yet
    /// reported. Terminal states are returned unchanged; a failed decrypt is
    /// never retried here.
    pub async fn advance(&mut self, auth: Option<&Session>, now: DateTime<Utc>) -> UnlockState {
        if self.state.is_terminal() {
            return self.state;
        }
        self.viewer_uid = auth
            .and_then(Session::principal)
            .map(|p| p.uid.clone());

        match self.gate(auth, now) {
            Gate::Settle(state) => self.settle(state, false),
            Gate::Decrypt(source) => self.decrypt(source, false).await,
        }
    }

    /// Try a key typed in by the viewer (e.g. from a share-link fragment).
    ///
    /// Accepted only from `MissingKey` or `DecryptionFailed`, and only on or
    /// after the open date. Each distinct value is attempted at most once in
    /// a row; a malformed value goes back to `MissingKey` without any
    /// decryption.
    pub async fn submit_key(&mut self, key: &str, now: DateTime<Utc>) -> UnlockState {
        if !self.state.accepts_key() {
            return self.state;
        }
        if !self.envelope.is_ready(now) {
            return self.settle(UnlockState::Locked, true);
        }

        let fingerprint = crypto::fingerprint(key.trim().as_bytes());
        if self.rejected_key == Some(fingerprint) {
            debug!(capsule_id = %self.capsule_id, "same key resubmitted; not retried");
            return self.state;
        }

        let key = match MessageKey::import(key) {
            Ok(key) => key,
            Err(_) => {
                self.rejected_key = Some(fingerprint);
                return self.settle(UnlockState::MissingKey, true);
            }
        };

        let state = self.decrypt(KeySource::Supplied(key), true).await;
        if state != UnlockState::Unsealed {
            self.rejected_key = Some(fingerprint);
        }
        state
    }

    async fn decrypt(&mut self, source: KeySource, key_supplied: bool) -> UnlockState {
        self.state = UnlockState::Decrypting;
        self.decrypt_attempts += 1;

        let envelope = self.envelope.clone();
        let outcome = tokio::task::spawn_blocking(move || open_envelope(&envelope, source)).await;

        let next = match outcome {
            Ok(Ok(plaintext)) => {
                self.plaintext = Some(plaintext);
                self.mark_opened();
                UnlockState::Unsealed
            }
            Ok(Err(VaultError::Authentication)) => UnlockState::DecryptionFailed,
            Ok(Err(e)) if e.is_environmental() => {
                error!(capsule_id = %self.capsule_id, error = %e, "unlock failed");
                UnlockState::Error
            }
            Ok(Err(e)) => {
                warn!(capsule_id = %self.capsule_id, error = %e, "unusable key material");
                UnlockState::Error
            }
            Err(e) => {
                error!(capsule_id = %self.capsule_id, error = %e, "decrypt task failed");
                UnlockState::Error
            }
        };
        self.settle(next, key_supplied)
    }

    /// Move the stored status to `opened` without waiting for the result.
    fn mark_opened(&mut self) {
        if !self.envelope.status.can_mark_opened() {
            return;
        }
        self.envelope.status = CapsuleStatus::Opened;

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(capsule_id = %self.capsule_id, "no runtime; status update skipped");
                return;
            }
        };
        let store = Arc::clone(&self.store);
        let id = self.capsule_id.clone();
        self.status_update = Some(runtime.spawn(async move {
            if let Err(e) = store
                .update(collections::CAPSULES, &id, json!({ "status": "opened" }))
                .await
            {
                warn!(capsule_id = %id, error = %e, "status update failed");
            }
        }));
    }

    /// Wait for the background status update, if one was issued.
    ///
    /// Its outcome never affects the flow's state.
    pub async fn status_update_settled(&mut self) {
        if let Some(handle) = self.status_update.take() {
            let _ = handle.await;
        }
    }

    fn settle(&mut self, state: UnlockState, key_supplied: bool) -> UnlockState {
        let changed = state != self.state;
        self.state = state;
        if changed || key_supplied {
            if state.is_terminal() {
                info!(capsule_id = %self.capsule_id, state = ?state, "unlock settled");
            }
            self.record(state, key_supplied);
        }
        state
    }

    fn record(&self, state: UnlockState, key_supplied: bool) {
        let Some(audit) = &self.audit else {
            return;
        };
        let record = UnlockRecord {
            capsule_id: self.capsule_id.clone(),
            principal_uid: self.viewer_uid.clone(),
            state,
            key_supplied,
            timestamp: Utc::now(),
        };
        match audit.lock() {
            Ok(mut log) => log.append(record),
            Err(_) => warn!(capsule_id = %self.capsule_id, "audit log poisoned"),
        }
    }
}
