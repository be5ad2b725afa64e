//! SQLite-backed store using sqlx.

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    chrono::{DateTime, NaiveDate, Utc},
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
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

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS plans (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    max_messages_per_month INTEGER NOT NULL DEFAULT 1000,
    max_senders INTEGER NOT NULL DEFAULT 1,
    features TEXT NOT NULL DEFAULT '{}',
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS tenants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    plan_id INTEGER NOT NULL REFERENCES plans(id),
    messages_used_cycle INTEGER NOT NULL DEFAULT 0,
    billing_cycle_start TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS senders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    alias TEXT NOT NULL,
    phone_number TEXT NOT NULL,
    tenant_id INTEGER REFERENCES tenants(id),
    status TEXT NOT NULL DEFAULT 'inactive',
    is_active INTEGER NOT NULL DEFAULT 1,
    is_connected INTEGER NOT NULL DEFAULT 0,
    last_connected TEXT,
    pairing_token TEXT,
    session_data TEXT,
    UNIQUE(tenant_id, phone_number)
);

CREATE TABLE IF NOT EXISTS campaigns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    user_id INTEGER NOT NULL,
    sender_id INTEGER NOT NULL REFERENCES senders(id),
    total_count INTEGER NOT NULL DEFAULT 0,
    sent_count INTEGER NOT NULL DEFAULT 0,
    failed_count INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    scheduled_at TEXT,
    started_at TEXT,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS message_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id INTEGER NOT NULL REFERENCES campaigns(id),
    sender_id INTEGER NOT NULL REFERENCES senders(id),
    tenant_id INTEGER REFERENCES tenants(id),
    destination TEXT NOT NULL,
    body TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    error_reason TEXT,
    sent_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_message_logs_campaign
    ON message_logs(campaign_id, status);
"#;

/// Run schema migrations on a pool.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .context("failed to run store migrations")?;
    Ok(())
}

/// SQLite-backed persistence for the campaign engine.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store with its own connection pool and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("failed to connect to SQLite")?;

        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be
    /// run via [`run_migrations`]).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ── Row decoding ────────────────────────────────────────────────────────────

fn to_dt(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("bad timestamp: {s}"))?
        .with_timezone(&Utc))
}

fn opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(to_dt).transpose()
}

fn to_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("bad date: {s}"))
}

fn tenant_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Tenant> {
    let status: String = row.get("status");
    let cycle: String = row.get("billing_cycle_start");
    Ok(Tenant {
        id: row.get("id"),
        name: row.get("name"),
        plan_id: row.get("plan_id"),
        messages_used_cycle: row.get("messages_used_cycle"),
        billing_cycle_start: to_date(&cycle)?,
        status: TenantStatus::parse(&status)?,
        is_active: row.get::<i64, _>("is_active") != 0,
    })
}

fn sender_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Sender> {
    let status: String = row.get("status");
    Ok(Sender {
        id: row.get("id"),
        alias: row.get("alias"),
        phone_number: row.get("phone_number"),
        tenant_id: row.get("tenant_id"),
        status: ConnectionStatus::parse(&status)?,
        is_active: row.get::<i64, _>("is_active") != 0,
        is_connected: row.get::<i64, _>("is_connected") != 0,
        last_connected: opt_dt(row.get("last_connected"))?,
        pairing_token: row.get("pairing_token"),
        session_data: row.get("session_data"),
    })
}

fn campaign_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Campaign> {
    let status: String = row.get("status");
    Ok(Campaign {
        id: row.get("id"),
        name: row.get("name"),
        user_id: row.get("user_id"),
        sender_id: row.get("sender_id"),
        total_count: row.get("total_count"),
        sent_count: row.get("sent_count"),
        failed_count: row.get("failed_count"),
        status: CampaignStatus::parse(&status)?,
        scheduled_at: opt_dt(row.get("scheduled_at"))?,
        started_at: opt_dt(row.get("started_at"))?,
        completed_at: opt_dt(row.get("completed_at"))?,
    })
}

fn log_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<MessageLog> {
    let status: String = row.get("status");
    Ok(MessageLog {
        id: row.get("id"),
        campaign_id: row.get("campaign_id"),
        sender_id: row.get("sender_id"),
        tenant_id: row.get("tenant_id"),
        destination: row.get("destination"),
        body: row.get("body"),
        status: LogStatus::parse(&status)?,
        error_reason: row.get("error_reason"),
        sent_at: opt_dt(row.get("sent_at"))?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn tenant(&self, id: TenantId) -> Result<Option<Tenant>> {
        let row = sqlx::query("SELECT * FROM tenants WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    async fn active_tenants(&self) -> Result<Vec<Tenant>> {
        let rows = sqlx::query("SELECT * FROM tenants WHERE is_active = 1 AND status = 'active'")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(tenant_from_row).collect()
    }

    async fn increment_messages_used(&self, id: TenantId, count: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tenants SET messages_used_cycle = messages_used_cycle + ? WHERE id = ?",
        )
        .bind(count)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("tenant not found: {id}");
        }
        Ok(())
    }

    async fn reset_billing_cycle(&self, id: TenantId, today: NaiveDate) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tenants SET messages_used_cycle = 0, billing_cycle_start = ? WHERE id = ?",
        )
        .bind(today.format("%Y-%m-%d").to_string())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("tenant not found: {id}");
        }
        Ok(())
    }

    async fn plan(&self, id: PlanId) -> Result<Option<Plan>> {
        let row = sqlx::query("SELECT * FROM plans WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let features: String = row.get("features");
                Ok(Some(Plan {
                    id: row.get("id"),
                    name: row.get("name"),
                    max_messages_per_month: row.get("max_messages_per_month"),
                    max_senders: row.get("max_senders"),
                    features: serde_json::from_str(&features)?,
                    is_active: row.get::<i64, _>("is_active") != 0,
                }))
            },
            None => Ok(None),
        }
    }

    async fn sender(&self, id: SenderId) -> Result<Option<Sender>> {
        let row = sqlx::query("SELECT * FROM senders WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(sender_from_row).transpose()
    }

    async fn count_active_senders(&self, tenant_id: TenantId) -> Result<i64> {
        let row =
            sqlx::query("SELECT COUNT(*) AS n FROM senders WHERE tenant_id = ? AND is_active = 1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.get("n"))
    }

    async fn set_sender_connection(
        &self,
        id: SenderId,
        status: ConnectionStatus,
        connected: bool,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE senders SET status = ?, is_connected = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(connected as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("sender not found: {id}");
        }
        Ok(())
    }

    async fn set_pairing_token(&self, id: SenderId, token: Option<String>) -> Result<()> {
        let result = sqlx::query("UPDATE senders SET pairing_token = ? WHERE id = ?")
            .bind(&token)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("sender not found: {id}");
        }
        Ok(())
    }

    async fn mark_sender_ready(&self, id: SenderId, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE senders SET status = 'connected', is_connected = 1,
                    last_connected = ?, pairing_token = NULL
             WHERE id = ?",
        )
        .bind(at.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("sender not found: {id}");
        }
        Ok(())
    }

    async fn insert_campaign_with_logs(
        &self,
        new: NewCampaign,
        recipients: &[Recipient],
    ) -> Result<Campaign> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO campaigns (name, user_id, sender_id, total_count, status, scheduled_at)
             VALUES (?, ?, ?, ?, 'pending', ?)",
        )
        .bind(&new.name)
        .bind(new.user_id)
        .bind(new.sender_id)
        .bind(recipients.len() as i64)
        .bind(new.scheduled_at.map(|at| at.to_rfc3339()))
        .execute(&mut *tx)
        .await?;
        let campaign_id = result.last_insert_rowid();

        for recipient in recipients {
            sqlx::query(
                "INSERT INTO message_logs (campaign_id, sender_id, tenant_id, destination, body, status)
                 VALUES (?, ?, ?, ?, ?, 'pending')",
            )
            .bind(campaign_id)
            .bind(new.sender_id)
            .bind(new.tenant_id)
            .bind(&recipient.destination)
            .bind(&recipient.body)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Campaign {
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
        })
    }

    async fn campaign(&self, id: CampaignId) -> Result<Option<Campaign>> {
        let row = sqlx::query("SELECT * FROM campaigns WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(campaign_from_row).transpose()
    }

    async fn begin_campaign(&self, id: CampaignId, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE campaigns SET status = 'in_progress', started_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(at.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_campaign(
        &self,
        id: CampaignId,
        sent: i64,
        failed: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE campaigns SET status = 'completed', sent_count = ?, failed_count = ?,
                    completed_at = ?
             WHERE id = ?",
        )
        .bind(sent)
        .bind(failed)
        .bind(at.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("campaign not found: {id}");
        }
        Ok(())
    }

    async fn mark_campaign_error(&self, id: CampaignId) -> Result<()> {
        sqlx::query("UPDATE campaigns SET status = 'error' WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn pending_logs(&self, campaign_id: CampaignId) -> Result<Vec<MessageLog>> {
        let rows = sqlx::query(
            "SELECT * FROM message_logs WHERE campaign_id = ? AND status = 'pending' ORDER BY id",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(log_from_row).collect()
    }

    async fn mark_log_sent(&self, id: MessageLogId, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE message_logs SET status = 'sent', sent_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(at.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("message log not found or not pending: {id}");
        }
        Ok(())
    }

    async fn mark_log_failed(&self, id: MessageLogId, reason: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE message_logs SET status = 'failed', error_reason = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("message log not found or not pending: {id}");
        }
        Ok(())
    }

    async fn log_counts(&self, campaign_id: CampaignId) -> Result<LogCounts> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM message_logs WHERE campaign_id = ? GROUP BY status",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = LogCounts::default();
        for row in rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            match LogStatus::parse(&status)? {
                LogStatus::Pending => counts.pending = n,
                LogStatus::Sent => counts.sent = n,
                LogStatus::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, chrono::TimeZone};

    async fn make_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    async fn seed_tenant(store: &SqliteStore, used: i64) -> TenantId {
        sqlx::query("INSERT INTO plans (name, max_messages_per_month, max_senders) VALUES ('basic', 100, 2)")
            .execute(store.pool())
            .await
            .unwrap();
        let result = sqlx::query(
            "INSERT INTO tenants (name, plan_id, messages_used_cycle, billing_cycle_start)
             VALUES ('acme', 1, ?, '2026-08-01')",
        )
        .bind(used)
        .execute(store.pool())
        .await
        .unwrap();
        result.last_insert_rowid()
    }

    async fn seed_sender(store: &SqliteStore) -> SenderId {
        let result =
            sqlx::query("INSERT INTO senders (alias, phone_number) VALUES ('main', '5215550001')")
                .execute(store.pool())
                .await
                .unwrap();
        result.last_insert_rowid()
    }

    #[tokio::test]
    async fn tenant_roundtrip_and_increment() {
        let store = make_store().await;
        let id = seed_tenant(&store, 5).await;

        let tenant = store.tenant(id).await.unwrap().unwrap();
        assert_eq!(tenant.messages_used_cycle, 5);
        assert_eq!(tenant.status, TenantStatus::Active);

        store.increment_messages_used(id, 10).await.unwrap();
        let tenant = store.tenant(id).await.unwrap().unwrap();
        assert_eq!(tenant.messages_used_cycle, 15);
    }

    #[tokio::test]
    async fn increment_unknown_tenant_fails() {
        let store = make_store().await;
        assert!(store.increment_messages_used(99, 1).await.is_err());
    }

    #[tokio::test]
    async fn reset_billing_cycle_zeroes_usage() {
        let store = make_store().await;
        let id = seed_tenant(&store, 42).await;

        let today = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        store.reset_billing_cycle(id, today).await.unwrap();

        let tenant = store.tenant(id).await.unwrap().unwrap();
        assert_eq!(tenant.messages_used_cycle, 0);
        assert_eq!(tenant.billing_cycle_start, today);
    }

    #[tokio::test]
    async fn sender_session_updates() {
        let store = make_store().await;
        let id = seed_sender(&store).await;

        store
            .set_sender_connection(id, ConnectionStatus::Connecting, false)
            .await
            .unwrap();
        store
            .set_pairing_token(id, Some("qr-payload".into()))
            .await
            .unwrap();

        let sender = store.sender(id).await.unwrap().unwrap();
        assert_eq!(sender.status, ConnectionStatus::Connecting);
        assert_eq!(sender.pairing_token.as_deref(), Some("qr-payload"));

        let at = Utc.with_ymd_and_hms(2026, 8, 23, 12, 0, 0).unwrap();
        store.mark_sender_ready(id, at).await.unwrap();

        let sender = store.sender(id).await.unwrap().unwrap();
        assert_eq!(sender.status, ConnectionStatus::Connected);
        assert!(sender.is_connected);
        assert_eq!(sender.last_connected, Some(at));
        assert!(sender.pairing_token.is_none());
    }

    #[tokio::test]
    async fn campaign_with_logs_is_atomic_pair() {
        let store = make_store().await;
        let sender_id = seed_sender(&store).await;

        let recipients = vec![
            Recipient::new("5215550100", "hola"),
            Recipient::new("5215550101", "hola"),
        ];
        let campaign = store
            .insert_campaign_with_logs(
                NewCampaign {
                    name: "launch".into(),
                    user_id: 1,
                    sender_id,
                    tenant_id: None,
                    scheduled_at: None,
                },
                &recipients,
            )
            .await
            .unwrap();

        assert_eq!(campaign.total_count, 2);
        assert_eq!(campaign.status, CampaignStatus::Pending);

        let logs = store.pending_logs(campaign.id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].destination, "5215550100");
        assert!(logs[0].id < logs[1].id);
    }

    #[tokio::test]
    async fn begin_campaign_guards_double_dispatch() {
        let store = make_store().await;
        let sender_id = seed_sender(&store).await;
        let campaign = store
            .insert_campaign_with_logs(
                NewCampaign {
                    name: "once".into(),
                    user_id: 1,
                    sender_id,
                    tenant_id: None,
                    scheduled_at: None,
                },
                &[Recipient::new("5215550100", "hi")],
            )
            .await
            .unwrap();

        let now = Utc::now();
        assert!(store.begin_campaign(campaign.id, now).await.unwrap());
        // Second begin sees in_progress and refuses.
        assert!(!store.begin_campaign(campaign.id, now).await.unwrap());

        let row = store.campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(row.status, CampaignStatus::InProgress);
        assert!(row.started_at.is_some());
    }

    #[tokio::test]
    async fn log_terminal_transitions_and_counts() {
        let store = make_store().await;
        let sender_id = seed_sender(&store).await;
        let campaign = store
            .insert_campaign_with_logs(
                NewCampaign {
                    name: "counts".into(),
                    user_id: 1,
                    sender_id,
                    tenant_id: None,
                    scheduled_at: None,
                },
                &[
                    Recipient::new("1", "a"),
                    Recipient::new("2", "b"),
                    Recipient::new("3", "c"),
                ],
            )
            .await
            .unwrap();

        let logs = store.pending_logs(campaign.id).await.unwrap();
        store.mark_log_sent(logs[0].id, Utc::now()).await.unwrap();
        store
            .mark_log_failed(logs[1].id, "number unreachable")
            .await
            .unwrap();

        let counts = store.log_counts(campaign.id).await.unwrap();
        assert_eq!(counts.sent, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.pending, 1);

        store
            .complete_campaign(campaign.id, 1, 1, Utc::now())
            .await
            .unwrap();
        let row = store.campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(row.status, CampaignStatus::Completed);
        assert_eq!(row.sent_count + row.failed_count + counts.pending, row.total_count);
    }

    #[tokio::test]
    async fn terminal_logs_cannot_be_remarked() {
        let store = make_store().await;
        let sender_id = seed_sender(&store).await;
        let campaign = store
            .insert_campaign_with_logs(
                NewCampaign {
                    name: "terminal".into(),
                    user_id: 1,
                    sender_id,
                    tenant_id: None,
                    scheduled_at: None,
                },
                &[Recipient::new("1", "a"), Recipient::new("2", "b")],
            )
            .await
            .unwrap();
        let logs = store.pending_logs(campaign.id).await.unwrap();

        store.mark_log_sent(logs[0].id, Utc::now()).await.unwrap();
        store.mark_log_failed(logs[1].id, "unreachable").await.unwrap();

        // Terminal statuses never transition a second time.
        assert!(store.mark_log_failed(logs[0].id, "late").await.is_err());
        assert!(store.mark_log_sent(logs[1].id, Utc::now()).await.is_err());

        let counts = store.log_counts(campaign.id).await.unwrap();
        assert_eq!(counts.sent, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.pending, 0);
    }

    #[tokio::test]
    async fn count_active_senders_skips_soft_deleted() {
        let store = make_store().await;
        let tenant_id = seed_tenant(&store, 0).await;
        sqlx::query(
            "INSERT INTO senders (alias, phone_number, tenant_id, is_active) VALUES
             ('a', '100', ?, 1), ('b', '101', ?, 1), ('c', '102', ?, 0)",
        )
        .bind(tenant_id)
        .bind(tenant_id)
        .bind(tenant_id)
        .execute(store.pool())
        .await
        .unwrap();

        assert_eq!(store.count_active_senders(tenant_id).await.unwrap(), 2);
    }
}
