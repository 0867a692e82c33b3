//! The persisted capsule envelope.
//!
//! An envelope binds the ciphertext and its nonce to the key-protection
//! material that its visibility calls for. The JSON shape (camelCase) is the
//! document-store schema:
//!
//! ```text
//! { title, openDateUtc, visibility, status, messageNonce, ciphertext,
//!   exportedKey                      // public, private-recipient
//!   | wrappedKey + keyNonce,         // private-self
//!   recipientId?, recipientEmail?, creatorId, createdAtUtc }
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{VaultError, VaultResult};
use crate::keys::{self, KeyStrategy, MasterKey, MessageKey};

/// Who a capsule is for. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    /// Anyone holding the envelope, after the open date.
    Public,
    /// Only the creator, while signed in with their password-derived key.
    PrivateSelf,
    /// Only the designated recipient identity.
    PrivateRecipient,
}

impl Visibility {
    /// The stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::PrivateSelf => "private-self",
            Self::PrivateRecipient => "private-recipient",
        }
    }
}

/// Lifecycle status of a capsule as read by listing views.
///
/// `Expired` is representable and survives storage round trips, but no flow
/// transitions into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapsuleStatus {
    Sealed,
    Ready,
    Opened,
    Expired,
}

impl CapsuleStatus {
    /// Statuses an unseal may move to `Opened`.
    pub fn can_mark_opened(&self) -> bool {
        matches!(self, Self::Sealed | Self::Ready)
    }
}

/// Key material stored with the ciphertext. Exactly one shape is present.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyProtection {
    /// Message key wrapped under the creator's master key.
    Wrapped {
        #[serde(rename = "wrappedKey")]
        wrapped_key: String,
        #[serde(rename = "keyNonce")]
        key_nonce: String,
    },
    /// Message key exported in plaintext.
    Exported {
        #[serde(rename = "exportedKey")]
        exported_key: String,
    },
}

impl KeyProtection {
    /// Whether this material has the shape `strategy` produces.
    pub fn matches(&self, strategy: KeyStrategy) -> bool {
        match self {
            Self::Wrapped { .. } => strategy.requires_master_key(),
            Self::Exported { .. } => strategy.stores_exported_key(),
        }
    }

    /// Recover the message key from exported material.
    pub fn exported(&self) -> VaultResult<MessageKey> {
        match self {
            Self::Exported { exported_key } => MessageKey::import(exported_key),
            Self::Wrapped { .. } => Err(VaultError::Format("envelope key protection".into())),
        }
    }

    /// Recover the message key from wrapped material.
    pub fn unwrap_with(&self, master: &MasterKey) -> VaultResult<MessageKey> {
        match self {
            Self::Wrapped {
                wrapped_key,
                key_nonce,
            } => keys::unwrap_key(wrapped_key, key_nonce, master),
            Self::Exported { .. } => Err(VaultError::Format("envelope key protection".into())),
        }
    }
}

impl fmt::Debug for KeyProtection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wrapped { .. } => f.write_str("Wrapped(..)"),
            Self::Exported { .. } => f.write_str("Exported(..)"),
        }
    }
}

fn check_key_shape(record: &Value) -> VaultResult<()> {
    let exported = record.get("exportedKey").is_some();
    let wrapped = record.get("wrappedKey").is_some() || record.get("keyNonce").is_some();
    match (exported, wrapped) {
        (true, false) | (false, true) => Ok(()),
        (true, true) => Err(VaultError::Format("key protection: both exported and wrapped key".into())),
        (false, false) => Err(VaultError::Format("key protection: no key material".into())),
    }
}

/// One capsule as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsuleEnvelope {
    pub title: String,
    pub open_date_utc: DateTime<Utc>,
    pub visibility: Visibility,
    pub status: CapsuleStatus,
    pub message_nonce: String,
    pub ciphertext: String,
    #[serde(flatten)]
    pub key_protection: KeyProtection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_email: Option<String>,
    pub creator_id: String,
    pub created_at_utc: DateTime<Utc>,
}

impl CapsuleEnvelope {
    /// The key strategy this envelope's visibility calls for.
    pub fn strategy(&self) -> KeyStrategy {
        keys::select_key_strategy(self.visibility)
    }

    /// True once `now` has reached the open date.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        now >= self.open_date_utc
    }

    /// Check that the stored key material is the one the visibility allows,
    /// and that recipient capsules name a recipient.
    pub fn validate(&self) -> VaultResult<()> {
        let strategy = self.strategy();
        if !self.key_protection.matches(strategy) {
            return Err(VaultError::Format(format!(
                "key protection for {} capsule",
                self.visibility.as_str()
            )));
        }
        if strategy.requires_recipient() && self.recipient_id.is_none() {
            return Err(VaultError::Format("recipient for private-recipient capsule".into()));
        }
        Ok(())
    }

    /// Decrypt the body with an already-recovered message key.
    pub fn open_with(&self, key: &MessageKey) -> VaultResult<Vec<u8>> {
        key.decrypt(&self.ciphertext, &self.message_nonce)
    }

    /// Serialize to a document-store record.
    pub fn to_record(&self) -> VaultResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parse a document-store record and validate it.
    ///
    /// The record must carry exactly one key shape: `exportedKey`, or
    /// `wrappedKey` with `keyNonce`. Anything else is a `Format` error.
    pub fn from_record(record: Value) -> VaultResult<Self> {
        check_key_shape(&record)?;
        let envelope: Self = serde_json::from_value(record)?;
        envelope.validate()?;
        Ok(envelope)
    }
}
