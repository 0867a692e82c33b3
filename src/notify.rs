//! Receipt notification collaborator.
//!
//! After a recipient capsule is persisted, the recipient is told that a
//! capsule is waiting. Delivery is best effort: a failed send is reported to
//! the creator but never undoes the capsule.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::VaultResult;

/// Subject line of every receipt email.
pub const RECEIPT_SUBJECT: &str = "You have a new Time Capsule from ChronoVault!";

/// Template data for a receipt email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptEmail {
    pub recipient_email: String,
    pub capsule_title: String,
    pub subject: String,
}

impl ReceiptEmail {
    pub fn new(recipient_email: &str, capsule_title: &str) -> Self {
        Self {
            recipient_email: recipient_email.to_string(),
            capsule_title: capsule_title.to_string(),
            subject: RECEIPT_SUBJECT.to_string(),
        }
    }
}

/// Email sender.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, email: &ReceiptEmail) -> VaultResult<()>;
}

/// What happened to the receipt for a newly created capsule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// The capsule has no recipient to notify.
    NotRequired,
    Sent,
    /// Sending failed; the capsule still exists.
    Failed(String),
}
