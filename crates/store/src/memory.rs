//! In-memory store for tests.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    chrono::{DateTime, NaiveDate, Utc},
};

use {
    crate::{
        store::Store,
        types::{
            Campaign, CampaignStatus, ConnectionStatus, LogCounts, LogStatus, MessageLog,
            NewCampaign, Plan, Sender, Tenant, TenantStatus,
        },
    },
    volley_common::{CampaignId, MessageLogId, PlanId, Recipient, SenderId, TenantId},
};

#[derive(Default)]
struct Inner {
    plans: HashMap<PlanId, Plan>,
    tenants: HashMap<TenantId, Tenant>,
    senders: HashMap<SenderId, Sender>,
    campaigns: HashMap<CampaignId, Campaign>,
    logs: HashMap<MessageLogId, MessageLog>,
    next_id: i64,
    // Failure injection for tests.
    fail_resets: HashSet<TenantId>,
    fail_log_updates: HashSet<MessageLogId>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory store backed by `HashMap`. No persistence — for tests only.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Test fixtures ───────────────────────────────────────────────────

    pub fn insert_plan(&self, name: &str, max_messages: i64, max_senders: i64) -> PlanId {
        let mut inner = self.lock();
        let id = inner.next_id();
        inner.plans.insert(id, Plan {
            id,
            name: name.into(),
            max_messages_per_month: max_messages,
            max_senders,
            features: serde_json::json!({}),
            is_active: true,
        });
        id
    }

    pub fn insert_tenant(
        &self,
        name: &str,
        plan_id: PlanId,
        used: i64,
        billing_cycle_start: NaiveDate,
        status: TenantStatus,
    ) -> TenantId {
        let mut inner = self.lock();
        let id = inner.next_id();
        inner.tenants.insert(id, Tenant {
            id,
            name: name.into(),
            plan_id,
            messages_used_cycle: used,
            billing_cycle_start,
            status,
            is_active: true,
        });
        id
    }

    pub fn insert_sender(&self, tenant_id: Option<TenantId>, alias: &str, phone: &str) -> SenderId {
        let mut inner = self.lock();
        let id = inner.next_id();
        inner.senders.insert(id, Sender {
            id,
            alias: alias.into(),
            phone_number: phone.into(),
            tenant_id,
            status: ConnectionStatus::Inactive,
            is_active: true,
            is_connected: false,
            last_connected: None,
            pairing_token: None,
            session_data: None,
        });
        id
    }

    /// Soft-delete a sender.
    pub fn deactivate_sender(&self, id: SenderId) {
        let mut inner = self.lock();
        if let Some(sender) = inner.senders.get_mut(&id) {
            sender.is_active = false;
        }
    }

    /// Make `reset_billing_cycle` fail for one tenant.
    pub fn fail_reset_for(&self, id: TenantId) {
        self.lock().fail_resets.insert(id);
    }

    /// Make `mark_log_sent`/`mark_log_failed` fail for one log.
    pub fn fail_log_update_for(&self, id: MessageLogId) {
        self.lock().fail_log_updates.insert(id);
    }

    pub fn log(&self, id: MessageLogId) -> Option<MessageLog> {
        self.lock().logs.get(&id).cloned()
    }

    pub fn logs_for_campaign(&self, campaign_id: CampaignId) -> Vec<MessageLog> {
        let inner = self.lock();
        let mut logs: Vec<_> = inner
            .logs
            .values()
            .filter(|l| l.campaign_id == campaign_id)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.id);
        logs
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn tenant(&self, id: TenantId) -> Result<Option<Tenant>> {
        Ok(self.lock().tenants.get(&id).cloned())
    }

    async fn active_tenants(&self) -> Result<Vec<Tenant>> {
        let inner = self.lock();
        let mut tenants: Vec<_> = inner
            .tenants
            .values()
            .filter(|t| t.is_active && t.status == TenantStatus::Active)
            .cloned()
            .collect();
        tenants.sort_by_key(|t| t.id);
        Ok(tenants)
    }

    async fn increment_messages_used(&self, id: TenantId, count: i64) -> Result<()> {
        let mut inner = self.lock();
        match inner.tenants.get_mut(&id) {
            Some(tenant) => {
                tenant.messages_used_cycle += count;
                Ok(())
            },
            None => bail!("tenant not found: {id}"),
        }
    }

    async fn reset_billing_cycle(&self, id: TenantId, today: NaiveDate) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_resets.contains(&id) {
            bail!("injected reset failure for tenant {id}");
        }
        match inner.tenants.get_mut(&id) {
            Some(tenant) => {
                tenant.messages_used_cycle = 0;
                tenant.billing_cycle_start = today;
                Ok(())
            },
            None => bail!("tenant not found: {id}"),
        }
    }

    async fn plan(&self, id: PlanId) -> Result<Option<Plan>> {
        Ok(self.lock().plans.get(&id).cloned())
    }

    async fn sender(&self, id: SenderId) -> Result<Option<Sender>> {
        Ok(self.lock().senders.get(&id).cloned())
    }

    async fn count_active_senders(&self, tenant_id: TenantId) -> Result<i64> {
        let inner = self.lock();
        Ok(inner
            .senders
            .values()
            .filter(|s| s.tenant_id == Some(tenant_id) && s.is_active)
            .count() as i64)
    }

    async fn set_sender_connection(
        &self,
        id: SenderId,
        status: ConnectionStatus,
        connected: bool,
    ) -> Result<()> {
        let mut inner = self.lock();
        match inner.senders.get_mut(&id) {
            Some(sender) => {
                sender.status = status;
                sender.is_connected = connected;
                Ok(())
            },
            None => bail!("sender not found: {id}"),
        }
    }

    async fn set_pairing_token(&self, id: SenderId, token: Option<String>) -> Result<()> {
        let mut inner = self.lock();
        match inner.senders.get_mut(&id) {
            Some(sender) => {
                sender.pairing_token = token;
                Ok(())
            },
            None => bail!("sender not found: {id}"),
        }
    }

    async fn mark_sender_ready(&self, id: SenderId, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.lock();
        match inner.senders.get_mut(&id) {
            Some(sender) => {
                sender.status = ConnectionStatus::Connected;
                sender.is_connected = true;
                sender.last_connected = Some(at);
                sender.pairing_token = None;
                Ok(())
            },
            None => bail!("sender not found: {id}"),
        }
    }

    async fn insert_campaign_with_logs(
        &self,
        new: NewCampaign,
        recipients: &[Recipient],
    ) -> Result<Campaign> {
        let mut inner = self.lock();
        let campaign_id = inner.next_id();
        let campaign = Campaign {
            id: campaign_id,
            name: new.name,
            user_id: new.user_id,
            sender_id: new.sender_id,
            total_count: recipients.len() as i64,
            sent_count: 0,
            failed_count: 0,
            status: CampaignStatus::Pending,
            scheduled_at: new.scheduled_at,
            started_at: None,
            completed_at: None,
        };
        inner.campaigns.insert(campaign_id, campaign.clone());

        for recipient in recipients {
            let id = inner.next_id();
            inner.logs.insert(id, MessageLog {
                id,
                campaign_id,
                sender_id: new.sender_id,
                tenant_id: new.tenant_id,
                destination: recipient.destination.clone(),
                body: recipient.body.clone(),
                status: LogStatus::Pending,
                error_reason: None,
                sent_at: None,
            });
        }
        Ok(campaign)
    }

    async fn campaign(&self, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self.lock().campaigns.get(&id).cloned())
    }

    async fn begin_campaign(&self, id: CampaignId, at: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.lock();
        match inner.campaigns.get_mut(&id) {
            Some(campaign) if campaign.status == CampaignStatus::Pending => {
                campaign.status = CampaignStatus::InProgress;
                campaign.started_at = Some(at);
                Ok(true)
            },
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }

    async fn complete_campaign(
        &self,
        id: CampaignId,
        sent: i64,
        failed: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.lock();
        match inner.campaigns.get_mut(&id) {
            Some(campaign) => {
                campaign.status = CampaignStatus::Completed;
                campaign.sent_count = sent;
                campaign.failed_count = failed;
                campaign.completed_at = Some(at);
                Ok(())
            },
            None => bail!("campaign not found: {id}"),
        }
    }

    async fn mark_campaign_error(&self, id: CampaignId) -> Result<()> {
        let mut inner = self.lock();
        if let Some(campaign) = inner.campaigns.get_mut(&id) {
            campaign.status = CampaignStatus::Error;
        }
        Ok(())
    }

    async fn pending_logs(&self, campaign_id: CampaignId) -> Result<Vec<MessageLog>> {
        let inner = self.lock();
        let mut logs: Vec<_> = inner
            .logs
            .values()
            .filter(|l| l.campaign_id == campaign_id && l.status == LogStatus::Pending)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.id);
        Ok(logs)
    }

    async fn mark_log_sent(&self, id: MessageLogId, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_log_updates.contains(&id) {
            bail!("injected log update failure for {id}");
        }
        match inner.logs.get_mut(&id) {
            Some(log) if log.status == LogStatus::Pending => {
                log.status = LogStatus::Sent;
                log.sent_at = Some(at);
                Ok(())
            },
            Some(log) => bail!("message log {id} already {}", log.status.as_str()),
            None => bail!("message log not found: {id}"),
        }
    }

    async fn mark_log_failed(&self, id: MessageLogId, reason: &str) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_log_updates.contains(&id) {
            bail!("injected log update failure for {id}");
        }
        match inner.logs.get_mut(&id) {
            Some(log) if log.status == LogStatus::Pending => {
                log.status = LogStatus::Failed;
                log.error_reason = Some(reason.to_string());
                Ok(())
            },
            Some(log) => bail!("message log {id} already {}", log.status.as_str()),
            None => bail!("message log not found: {id}"),
        }
    }

    async fn log_counts(&self, campaign_id: CampaignId) -> Result<LogCounts> {
        let inner = self.lock();
        let mut counts = LogCounts::default();
        for log in inner.logs.values().filter(|l| l.campaign_id == campaign_id) {
            match log.status {
                LogStatus::Pending => counts.pending += 1,
                LogStatus::Sent => counts.sent += 1,
                LogStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn active_tenants_filters_status() {
        let store = InMemoryStore::new();
        let plan = store.insert_plan("basic", 100, 1);
        let start = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        store.insert_tenant("a", plan, 0, start, TenantStatus::Active);
        store.insert_tenant("b", plan, 0, start, TenantStatus::Suspended);

        let tenants = store.active_tenants().await.unwrap();
        assert_eq!(tenants.len(), 1);
        assert_eq!(tenants[0].name, "a");
    }

    #[tokio::test]
    async fn terminal_logs_cannot_be_remarked() {
        let store = InMemoryStore::new();
        let sender = store.insert_sender(None, "s", "100");
        let campaign = store
            .insert_campaign_with_logs(
                NewCampaign {
                    name: "terminal".into(),
                    user_id: 1,
                    sender_id: sender,
                    tenant_id: None,
                    scheduled_at: None,
                },
                &[Recipient::new("1", "x")],
            )
            .await
            .unwrap();
        let logs = store.logs_for_campaign(campaign.id);

        store.mark_log_sent(logs[0].id, Utc::now()).await.unwrap();
        assert!(store.mark_log_failed(logs[0].id, "late").await.is_err());

        let log = store.log(logs[0].id).unwrap();
        assert_eq!(log.status, LogStatus::Sent);
        assert!(log.error_reason.is_none());
    }

    #[tokio::test]
    async fn begin_campaign_only_once() {
        let store = InMemoryStore::new();
        let sender = store.insert_sender(None, "s", "100");
        let campaign = store
            .insert_campaign_with_logs(
                NewCampaign {
                    name: "c".into(),
                    user_id: 1,
                    sender_id: sender,
                    tenant_id: None,
                    scheduled_at: None,
                },
                &[Recipient::new("1", "x")],
            )
            .await
            .unwrap();

        assert!(store.begin_campaign(campaign.id, Utc::now()).await.unwrap());
        assert!(!store.begin_campaign(campaign.id, Utc::now()).await.unwrap());
    }
}
