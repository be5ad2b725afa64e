//! Entity types persisted by the store.

use {
    chrono::{DateTime, NaiveDate, Utc},
    serde::{Deserialize, Serialize},
};

use volley_common::{CampaignId, MessageLogId, PlanId, SenderId, TenantId, UserId};

// ── Tenants & plans ─────────────────────────────────────────────────────────

/// Subscription state of a tenant account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Suspended,
    Cancelled,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "cancelled" => Ok(Self::Cancelled),
            other => anyhow::bail!("unknown tenant status: {other}"),
        }
    }
}

/// A company account owning senders and a message quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub plan_id: PlanId,
    /// Messages reserved against the plan limit in the current billing cycle.
    /// Never decreases except on cycle reset.
    pub messages_used_cycle: i64,
    pub billing_cycle_start: NaiveDate,
    pub status: TenantStatus,
    pub is_active: bool,
}

/// A subscription plan. Immutable during a single quota check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub max_messages_per_month: i64,
    pub max_senders: i64,
    pub features: serde_json::Value,
    pub is_active: bool,
}

// ── Senders ─────────────────────────────────────────────────────────────────

/// Channel session state of a sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Inactive,
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "inactive" => Ok(Self::Inactive),
            "connecting" => Ok(Self::Connecting),
            "connected" => Ok(Self::Connected),
            "disconnected" => Ok(Self::Disconnected),
            other => anyhow::bail!("unknown connection status: {other}"),
        }
    }
}

/// An outbound channel identity. Unique per (tenant, phone_number).
///
/// `tenant_id` is `None` for platform-level senders. Soft-deleted senders
/// (`is_active == false`) keep their row and may be reactivated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sender {
    pub id: SenderId,
    pub alias: String,
    pub phone_number: String,
    pub tenant_id: Option<TenantId>,
    pub status: ConnectionStatus,
    pub is_active: bool,
    pub is_connected: bool,
    pub last_connected: Option<DateTime<Utc>>,
    /// Transient pairing token (QR payload) while a session authenticates.
    pub pairing_token: Option<String>,
    /// Opaque session credential blob owned by the channel adapter.
    pub session_data: Option<String>,
}

// ── Campaigns & logs ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
    Error,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "error" => Ok(Self::Error),
            other => anyhow::bail!("unknown campaign status: {other}"),
        }
    }
}

/// One batch dispatch job. Created by the orchestrator, mutated only by the
/// dispatch loop afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub user_id: UserId,
    pub sender_id: SenderId,
    pub total_count: i64,
    pub sent_count: i64,
    pub failed_count: i64,
    pub status: CampaignStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields needed to create a campaign. Counters and status are set by the
/// store on insert.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub name: String,
    pub user_id: UserId,
    pub sender_id: SenderId,
    pub tenant_id: Option<TenantId>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Pending,
    Sent,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => anyhow::bail!("unknown log status: {other}"),
        }
    }
}

/// Per-recipient delivery record. Terminal once sent or failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageLog {
    pub id: MessageLogId,
    pub campaign_id: CampaignId,
    pub sender_id: SenderId,
    pub tenant_id: Option<TenantId>,
    pub destination: String,
    pub body: String,
    pub status: LogStatus,
    pub error_reason: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Per-status log counts for one campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogCounts {
    pub pending: i64,
    pub sent: i64,
    pub failed: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for s in [
            CampaignStatus::Pending,
            CampaignStatus::InProgress,
            CampaignStatus::Completed,
            CampaignStatus::Cancelled,
            CampaignStatus::Error,
        ] {
            assert_eq!(CampaignStatus::parse(s.as_str()).ok(), Some(s));
        }
        assert!(CampaignStatus::parse("bogus").is_err());
    }

    #[test]
    fn connection_status_parse() {
        assert_eq!(
            ConnectionStatus::parse("connecting").ok(),
            Some(ConnectionStatus::Connecting)
        );
        assert!(ConnectionStatus::parse("").is_err());
    }
}
