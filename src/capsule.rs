//! Capsule creation.
//!
//! Creation generates a fresh message key, encrypts the body, protects the
//! key as the visibility's strategy dictates, persists the envelope and only
//! then notifies the recipient.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::config::VaultConfig;
use crate::envelope::{CapsuleEnvelope, CapsuleStatus, KeyProtection, Visibility};
use crate::error::{VaultError, VaultResult};
use crate::keys::{self, KeyStrategy, MessageKey};
use crate::notify::{NotificationOutcome, Notifier, ReceiptEmail};
use crate::session::Session;
use crate::store::{collections, DocumentStore};

/// The designated reader of a private-recipient capsule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub id: String,
    pub email: String,
}

/// Everything the creator supplies.
#[derive(Clone)]
pub struct CapsuleDraft {
    pub title: String,
    pub message: String,
    pub visibility: Visibility,
    pub open_date: DateTime<Utc>,
    pub recipient: Option<Recipient>,
}

impl fmt::Debug for CapsuleDraft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapsuleDraft")
            .field("title", &self.title)
            .field("visibility", &self.visibility)
            .field("open_date", &self.open_date)
            .field("recipient", &self.recipient)
            .finish_non_exhaustive()
    }
}

fn looks_like_email(email: &str) -> bool {
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && !email.chars().any(char::is_whitespace)
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        _ => false,
    }
}

impl CapsuleDraft {
    /// Apply the creation policy.
    pub fn validate(&self, now: DateTime<Utc>, config: &VaultConfig) -> VaultResult<()> {
        let title_len = self.title.trim().chars().count();
        if !(config.min_title_len..=config.max_title_len).contains(&title_len) {
            return Err(VaultError::Validation(format!(
                "title must be {}-{} characters",
                config.min_title_len, config.max_title_len
            )));
        }
        if self.message.chars().count() < config.min_message_len {
            return Err(VaultError::Validation(format!(
                "message must be at least {} characters",
                config.min_message_len
            )));
        }
        if self.open_date <= now {
            return Err(VaultError::Validation("open date must be in the future".into()));
        }
        match (keys::select_key_strategy(self.visibility), &self.recipient) {
            (KeyStrategy::ExportPlaintextWithAcl, None) => Err(VaultError::Validation(
                "private-recipient capsules need a recipient".into(),
            )),
            (KeyStrategy::ExportPlaintextWithAcl, Some(r)) if r.id.trim().is_empty() => {
                Err(VaultError::Validation("recipient id must not be empty".into()))
            }
            (KeyStrategy::ExportPlaintextWithAcl, Some(r)) if !looks_like_email(&r.email) => {
                Err(VaultError::Validation("recipient email is not valid".into()))
            }
            _ => Ok(()),
        }
    }
}

/// A sealed envelope plus the out-of-band secret, if the visibility has one.
#[derive(Debug)]
pub struct SealedCapsule {
    pub envelope: CapsuleEnvelope,
    /// Exported message key for the share-link fragment. Present for public
    /// and private-self capsules.
    pub share_secret: Option<Zeroizing<String>>,
}

/// Encrypt a draft into an envelope. Performs no I/O.
pub fn seal_capsule(
    draft: &CapsuleDraft,
    session: &Session,
    now: DateTime<Utc>,
    config: &VaultConfig,
) -> VaultResult<SealedCapsule> {
    draft.validate(now, config)?;
    let creator = session
        .principal()
        .ok_or_else(|| VaultError::Authorization("creating a capsule requires sign-in".into()))?;

    let message_key = MessageKey::generate()?;
    let body = message_key.encrypt(draft.message.as_bytes())?;

    let strategy = keys::select_key_strategy(draft.visibility);
    let key_protection = match strategy {
        KeyStrategy::ExportPlaintext | KeyStrategy::ExportPlaintextWithAcl => KeyProtection::Exported {
            exported_key: message_key.export(),
        },
        KeyStrategy::WrapWithMaster => {
            let master = session.master_key().ok_or_else(|| {
                VaultError::Authorization("private capsules require the master key".into())
            })?;
            let wrapped = keys::wrap_key(&message_key, master)?;
            KeyProtection::Wrapped {
                wrapped_key: wrapped.wrapped,
                key_nonce: wrapped.nonce,
            }
        }
    };
    let share_secret = match strategy {
        KeyStrategy::ExportPlaintext | KeyStrategy::WrapWithMaster => {
            Some(Zeroizing::new(message_key.export()))
        }
        KeyStrategy::ExportPlaintextWithAcl => None,
    };

    let recipient = draft
        .recipient
        .as_ref()
        .filter(|_| strategy.requires_recipient());

    let envelope = CapsuleEnvelope {
        title: draft.title.trim().to_string(),
        open_date_utc: draft.open_date,
        visibility: draft.visibility,
        status: CapsuleStatus::Sealed,
        message_nonce: body.nonce,
        ciphertext: body.ciphertext,
        key_protection,
        recipient_id: recipient.map(|r| r.id.clone()),
        recipient_email: recipient.map(|r| r.email.clone()),
        creator_id: creator.uid.clone(),
        created_at_utc: now,
    };
    envelope.validate()?;

    Ok(SealedCapsule {
        envelope,
        share_secret,
    })
}

/// Result of [`create_capsule`].
#[derive(Debug)]
pub struct CreatedCapsule {
    pub id: String,
    pub share_link: Option<ShareLink>,
    pub notification: NotificationOutcome,
}

/// Seal, persist, then notify the recipient.
///
/// A notification failure is reported in the result and logged; it never
/// rolls back the persisted capsule.
pub async fn create_capsule(
    store: &dyn DocumentStore,
    notifier: Arc<dyn Notifier>,
    draft: &CapsuleDraft,
    session: &Session,
    now: DateTime<Utc>,
    config: &VaultConfig,
) -> VaultResult<CreatedCapsule> {
    let sealed = seal_capsule(draft, session, now, config)?;
    let id = store
        .create(collections::CAPSULES, sealed.envelope.to_record()?)
        .await?;
    info!(capsule_id = %id, visibility = sealed.envelope.visibility.as_str(), "capsule sealed");

    let share_link = sealed.share_secret.map(|secret| ShareLink {
        capsule_id: id.clone(),
        secret,
    });

    let notification = match &sealed.envelope.recipient_email {
        Some(email) => {
            let receipt = ReceiptEmail::new(email, &sealed.envelope.title);
            match notifier.send(email, &receipt).await {
                Ok(()) => NotificationOutcome::Sent,
                Err(e) => {
                    warn!(capsule_id = %id, error = %e, "receipt email failed");
                    NotificationOutcome::Failed(e.to_string())
                }
            }
        }
        None => NotificationOutcome::NotRequired,
    };

    Ok(CreatedCapsule {
        id,
        share_link,
        notification,
    })
}

/// Load one capsule envelope by id.
pub async fn load_capsule(store: &dyn DocumentStore, id: &str) -> VaultResult<CapsuleEnvelope> {
    let record = store
        .get(collections::CAPSULES, id)
        .await?
        .ok_or_else(|| VaultError::NotFound(format!("capsule {id}")))?;
    CapsuleEnvelope::from_record(record)
}

// ---------------------------------------------------------------------------
// Share links
// ---------------------------------------------------------------------------

/// A link carrying the message key in its fragment, so the secret never
/// reaches a server: `{base}/capsules/{id}#{key}`.
pub struct ShareLink {
    pub capsule_id: String,
    pub secret: Zeroizing<String>,
}

impl fmt::Debug for ShareLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareLink")
            .field("capsule_id", &self.capsule_id)
            .finish_non_exhaustive()
    }
}

impl ShareLink {
    /// Render against `base_url` (an origin without trailing slash).
    pub fn render(&self, base_url: &str) -> String {
        format!(
            "{}/capsules/{}#{}",
            base_url.trim_end_matches('/'),
            self.capsule_id,
            self.secret.as_str()
        )
    }

    /// Parse a rendered link.
    pub fn parse(url: &str) -> VaultResult<Self> {
        let (path, fragment) = url
            .split_once('#')
            .ok_or_else(|| VaultError::Format("share link fragment".into()))?;
        let capsule_id = path
            .rsplit_once("/capsules/")
            .map(|(_, id)| id.trim_end_matches('/'))
            .filter(|id| !id.is_empty() && !id.contains('/'))
            .ok_or_else(|| VaultError::Format("share link path".into()))?;
        if fragment.is_empty() {
            return Err(VaultError::Format("share link fragment".into()));
        }
        Ok(Self {
            capsule_id: capsule_id.to_string(),
            secret: Zeroizing::new(fragment.to_string()),
        })
    }
}
