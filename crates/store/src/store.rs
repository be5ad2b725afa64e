use {
    anyhow::Result,
    async_trait::async_trait,
    chrono::{DateTime, NaiveDate, Utc},
};

use {
    crate::types::{
        Campaign, ConnectionStatus, LogCounts, MessageLog, NewCampaign, Plan, Sender, Tenant,
    },
    volley_common::{CampaignId, MessageLogId, PlanId, Recipient, SenderId, TenantId},
};

/// Persistent storage consumed by the campaign engine.
///
/// Entity creation for tenants, plans, and senders belongs to the (external)
/// administration layer; this trait only carries what the engine itself
/// reads and mutates.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Tenants ─────────────────────────────────────────────────────────

    async fn tenant(&self, id: TenantId) -> Result<Option<Tenant>>;

    /// Tenants with `is_active == true` and status `active`, for the billing
    /// sweep.
    async fn active_tenants(&self) -> Result<Vec<Tenant>>;

    /// Atomically add `count` to the tenant's cycle usage counter.
    ///
    /// Must be a read-modify-write at the storage layer; concurrent
    /// reservations for the same tenant must not lose updates.
    async fn increment_messages_used(&self, id: TenantId, count: i64) -> Result<()>;

    /// Zero the usage counter and advance the billing anniversary.
    async fn reset_billing_cycle(&self, id: TenantId, today: NaiveDate) -> Result<()>;

    // ── Plans ───────────────────────────────────────────────────────────

    async fn plan(&self, id: PlanId) -> Result<Option<Plan>>;

    // ── Senders ─────────────────────────────────────────────────────────

    async fn sender(&self, id: SenderId) -> Result<Option<Sender>>;

    /// Number of active (not soft-deleted) senders owned by a tenant.
    async fn count_active_senders(&self, tenant_id: TenantId) -> Result<i64>;

    async fn set_sender_connection(
        &self,
        id: SenderId,
        status: ConnectionStatus,
        connected: bool,
    ) -> Result<()>;

    /// Persist or clear the transient pairing token.
    async fn set_pairing_token(&self, id: SenderId, token: Option<String>) -> Result<()>;

    /// Session is ready: status `connected`, connected flag set, timestamp
    /// recorded, pairing token cleared. One write so callers cannot observe
    /// a half-applied transition.
    async fn mark_sender_ready(&self, id: SenderId, at: DateTime<Utc>) -> Result<()>;

    // ── Campaigns ───────────────────────────────────────────────────────

    /// Create a campaign plus one pending log per recipient, atomically.
    /// Partial creation must not be observable.
    async fn insert_campaign_with_logs(
        &self,
        new: NewCampaign,
        recipients: &[Recipient],
    ) -> Result<Campaign>;

    async fn campaign(&self, id: CampaignId) -> Result<Option<Campaign>>;

    /// Conditional transition pending → in_progress, recording the start
    /// time. Returns `false` without side effects when the campaign was not
    /// pending; this is the at-most-once dispatch guard.
    async fn begin_campaign(&self, id: CampaignId, at: DateTime<Utc>) -> Result<bool>;

    async fn complete_campaign(
        &self,
        id: CampaignId,
        sent: i64,
        failed: i64,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn mark_campaign_error(&self, id: CampaignId) -> Result<()>;

    // ── Message logs ────────────────────────────────────────────────────

    /// Pending logs for a campaign, in creation (id) order.
    async fn pending_logs(&self, campaign_id: CampaignId) -> Result<Vec<MessageLog>>;

    /// Record the terminal sent outcome. Fails unless the log is pending;
    /// terminal statuses are never overwritten.
    async fn mark_log_sent(&self, id: MessageLogId, at: DateTime<Utc>) -> Result<()>;

    /// Record the terminal failed outcome. Fails unless the log is pending.
    async fn mark_log_failed(&self, id: MessageLogId, reason: &str) -> Result<()>;

    async fn log_counts(&self, campaign_id: CampaignId) -> Result<LogCounts>;
}
