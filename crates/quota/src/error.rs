use {
    volley_common::{PlanId, TenantId},
    volley_store::TenantStatus,
};

/// Crate-wide result type for quota operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed quota errors. All variants are reported synchronously to the
/// caller and must not be retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("tenant not found: {tenant_id}")]
    TenantNotFound { tenant_id: TenantId },

    #[error("plan not found: {plan_id}")]
    PlanNotFound { plan_id: PlanId },

    #[error("tenant {tenant_id} is {}", .status.as_str())]
    TenantSuspended {
        tenant_id: TenantId,
        status: TenantStatus,
    },

    #[error("message quota exceeded: used {used}/{limit}, {remaining} remaining")]
    MessageQuotaExceeded {
        used: i64,
        limit: i64,
        remaining: i64,
    },

    #[error("sender quota exceeded: {used}/{limit}")]
    SenderQuotaExceeded { used: i64, limit: i64 },

    /// Store operation failed.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
