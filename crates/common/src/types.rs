use serde::{Deserialize, Serialize};

/// Row id of a tenant (company) account.
pub type TenantId = i64;
/// Row id of a subscription plan.
pub type PlanId = i64;
/// Row id of an outbound sender (channel identity).
pub type SenderId = i64;
/// Row id of a campaign.
pub type CampaignId = i64;
/// Row id of a per-recipient message log.
pub type MessageLogId = i64;
/// Row id of a user account (owned by the excluded identity layer).
pub type UserId = i64;

/// One validated recipient of a campaign.
///
/// Produced by the (external) list-ingestion layer; this engine only ever
/// receives non-empty lists of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Raw destination identifier (phone-number-like). Normalized to the
    /// adapter's address form at send time, not here.
    pub destination: String,
    /// Message body to deliver.
    pub body: String,
}

impl Recipient {
    pub fn new(destination: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            body: body.into(),
        }
    }
}
