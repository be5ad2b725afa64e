use volley_common::{CampaignId, SenderId};

/// Crate-wide result type for campaign operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed campaign errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("campaign not found: {campaign_id}")]
    CampaignNotFound { campaign_id: CampaignId },

    #[error("sender not found: {sender_id}")]
    SenderNotFound { sender_id: SenderId },

    /// The sender has no ready channel session; campaigns cannot target it.
    #[error("sender {sender_id} is not connected")]
    SenderNotConnected { sender_id: SenderId },

    /// The validated recipient list was empty.
    #[error("recipient list is empty")]
    EmptyRecipientList,

    /// A dispatch was attempted on a campaign that is no longer pending.
    #[error("campaign {campaign_id} was already processed")]
    AlreadyProcessed { campaign_id: CampaignId },

    /// Store operation failed.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
