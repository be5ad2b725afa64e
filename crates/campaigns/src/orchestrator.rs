//! Campaign creation: validation plus the atomic campaign-and-logs insert.

use std::sync::Arc;

use {serde::Serialize, tracing::info};

use {
    volley_common::{CampaignId, Recipient, SenderId, TenantId, UserId},
    volley_store::{Campaign, LogCounts, NewCampaign, Store},
};

use crate::error::{Error, Result};

/// A campaign row together with its per-status log counts.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignStats {
    pub campaign: Campaign,
    pub logs: LogCounts,
}

/// Validates inputs and creates campaigns. Never sends; dispatch is handed
/// off separately via [`crate::Dispatcher::launch`].
#[derive(Clone)]
pub struct CampaignOrchestrator {
    store: Arc<dyn Store>,
}

impl CampaignOrchestrator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a pending campaign with one pending log per recipient.
    ///
    /// The sender must exist and have a ready channel session; the
    /// recipient list must be non-empty (callers receive pre-validated
    /// lists from the ingestion layer). Campaign and logs are created as
    /// one atomic unit; partial creation is never observable.
    pub async fn create_campaign(
        &self,
        user_id: UserId,
        sender_id: SenderId,
        name: &str,
        recipients: &[Recipient],
        tenant_id: Option<TenantId>,
    ) -> Result<Campaign> {
        if recipients.is_empty() {
            return Err(Error::EmptyRecipientList);
        }

        let sender = self
            .store
            .sender(sender_id)
            .await?
            .ok_or(Error::SenderNotFound { sender_id })?;
        if !sender.is_connected {
            return Err(Error::SenderNotConnected { sender_id });
        }

        let campaign = self
            .store
            .insert_campaign_with_logs(
                NewCampaign {
                    name: name.to_string(),
                    user_id,
                    sender_id,
                    tenant_id,
                    scheduled_at: None,
                },
                recipients,
            )
            .await?;

        info!(
            campaign_id = campaign.id,
            sender_id,
            total = campaign.total_count,
            "campaign created"
        );
        Ok(campaign)
    }

    /// Campaign row plus per-status log counts.
    pub async fn campaign_stats(&self, campaign_id: CampaignId) -> Result<CampaignStats> {
        let campaign = self
            .store
            .campaign(campaign_id)
            .await?
            .ok_or(Error::CampaignNotFound { campaign_id })?;
        let logs = self.store.log_counts(campaign_id).await?;
        Ok(CampaignStats { campaign, logs })
    }
}
