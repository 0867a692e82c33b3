//! Dashboard and public listing views.
//!
//! Listings never decrypt anything. They read envelopes, derive a display
//! status from the stored status and the clock, and group the result.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::envelope::{CapsuleEnvelope, CapsuleStatus, Visibility};
use crate::error::VaultResult;
use crate::store::{collections, Document, DocumentStore, Filter};

/// One row in a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsuleSummary {
    pub id: String,
    pub title: String,
    pub open_date: DateTime<Utc>,
    pub visibility: Visibility,
    pub recipient: String,
    pub status: CapsuleStatus,
}

impl CapsuleSummary {
    pub fn from_envelope(id: impl Into<String>, envelope: &CapsuleEnvelope, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: envelope.title.clone(),
            open_date: envelope.open_date_utc,
            visibility: envelope.visibility,
            recipient: recipient_label(envelope),
            status: display_status(envelope.status, envelope.open_date_utc, now),
        }
    }
}

/// Status as shown to the user.
///
/// `opened` and `expired` are kept as stored. Anything else is `ready` once
/// the open date has passed and `sealed` before it.
pub fn display_status(stored: CapsuleStatus, open_date: DateTime<Utc>, now: DateTime<Utc>) -> CapsuleStatus {
    match stored {
        CapsuleStatus::Opened | CapsuleStatus::Expired => stored,
        CapsuleStatus::Sealed | CapsuleStatus::Ready if now >= open_date => CapsuleStatus::Ready,
        CapsuleStatus::Sealed | CapsuleStatus::Ready => CapsuleStatus::Sealed,
    }
}

/// Who a capsule is for, as shown in a listing.
pub fn recipient_label(envelope: &CapsuleEnvelope) -> String {
    match envelope.visibility {
        Visibility::Public => "Public".to_string(),
        Visibility::PrivateRecipient => envelope
            .recipient_email
            .clone()
            .unwrap_or_else(|| "Recipient".to_string()),
        Visibility::PrivateSelf => "You".to_string(),
    }
}

/// Summaries split by display status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SummaryGroups {
    pub upcoming: Vec<CapsuleSummary>,
    pub ready: Vec<CapsuleSummary>,
    pub archived: Vec<CapsuleSummary>,
}

impl SummaryGroups {
    pub fn len(&self) -> usize {
        self.upcoming.len() + self.ready.len() + self.archived.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Group summaries, preserving their order within each group.
pub fn group_summaries(summaries: impl IntoIterator<Item = CapsuleSummary>) -> SummaryGroups {
    let mut groups = SummaryGroups::default();
    for summary in summaries {
        match summary.status {
            CapsuleStatus::Sealed => groups.upcoming.push(summary),
            CapsuleStatus::Ready => groups.ready.push(summary),
            CapsuleStatus::Opened | CapsuleStatus::Expired => groups.archived.push(summary),
        }
    }
    groups
}

/// Parse query results, skipping records that fail validation.
fn parse_documents(docs: Vec<Document>) -> Vec<(String, CapsuleEnvelope)> {
    docs.into_iter()
        .filter_map(|(id, record)| match CapsuleEnvelope::from_record(record) {
            Ok(envelope) => Some((id, envelope)),
            Err(e) => {
                warn!(capsule_id = %id, error = %e, "skipping unreadable capsule");
                None
            }
        })
        .collect()
}

fn summarize(mut envelopes: Vec<(String, CapsuleEnvelope)>, now: DateTime<Utc>) -> Vec<CapsuleSummary> {
    envelopes.sort_by(|(_, a), (_, b)| b.open_date_utc.cmp(&a.open_date_utc));
    envelopes
        .iter()
        .map(|(id, envelope)| CapsuleSummary::from_envelope(id.as_str(), envelope, now))
        .collect()
}

/// Capsules created by `uid`, furthest open date first.
pub async fn capsules_for_user(
    store: &dyn DocumentStore,
    uid: &str,
    now: DateTime<Utc>,
) -> VaultResult<Vec<CapsuleSummary>> {
    let docs = store
        .query(collections::CAPSULES, &[Filter::eq("creatorId", uid)], None)
        .await?;
    Ok(summarize(parse_documents(docs), now))
}

/// Capsules addressed to `uid`, furthest open date first.
pub async fn capsules_for_recipient(
    store: &dyn DocumentStore,
    uid: &str,
    now: DateTime<Utc>,
) -> VaultResult<Vec<CapsuleSummary>> {
    let docs = store
        .query(
            collections::CAPSULES,
            &[
                Filter::eq("visibility", Visibility::PrivateRecipient.as_str()),
                Filter::eq("recipientId", uid),
            ],
            None,
        )
        .await?;
    Ok(summarize(parse_documents(docs), now))
}

/// Public capsules whose open date has passed, most recently opened first.
pub async fn public_capsules(store: &dyn DocumentStore, now: DateTime<Utc>) -> VaultResult<Vec<CapsuleSummary>> {
    let docs = store
        .query(
            collections::CAPSULES,
            &[Filter::eq("visibility", Visibility::Public.as_str())],
            None,
        )
        .await?;
    let open = parse_documents(docs)
        .into_iter()
        .filter(|(_, envelope)| envelope.is_ready(now))
        .collect();
    Ok(summarize(open, now))
}
