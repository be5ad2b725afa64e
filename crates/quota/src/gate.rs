use std::sync::Arc;

use tracing::{debug, info};

use {
    volley_common::TenantId,
    volley_store::{Store, TenantStatus},
};

use crate::error::{Error, Result};

/// Whose quota applies to an operation.
///
/// Platform-level actors (operators of the service itself) bypass quota
/// checks entirely; tenant-scoped actors are checked against their plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaScope {
    Platform,
    Tenant(TenantId),
}

/// Enforces plan-based message and sender ceilings.
#[derive(Clone)]
pub struct QuotaGate {
    store: Arc<dyn Store>,
}

impl QuotaGate {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Allow iff `used + requested <= plan limit`.
    ///
    /// Fails `TenantNotFound` for an unresolvable tenant and
    /// `TenantSuspended` for any status other than active. Platform scope
    /// passes unconditionally.
    pub async fn check_message_quota(&self, scope: QuotaScope, requested: i64) -> Result<()> {
        let tenant_id = match scope {
            QuotaScope::Platform => return Ok(()),
            QuotaScope::Tenant(id) => id,
        };

        let tenant = self
            .store
            .tenant(tenant_id)
            .await?
            .ok_or(Error::TenantNotFound { tenant_id })?;

        if tenant.status != TenantStatus::Active {
            return Err(Error::TenantSuspended {
                tenant_id,
                status: tenant.status,
            });
        }

        let plan = self
            .store
            .plan(tenant.plan_id)
            .await?
            .ok_or(Error::PlanNotFound {
                plan_id: tenant.plan_id,
            })?;

        let used = tenant.messages_used_cycle;
        let limit = plan.max_messages_per_month;
        if used + requested > limit {
            return Err(Error::MessageQuotaExceeded {
                used,
                limit,
                remaining: (limit - used).max(0),
            });
        }

        debug!(tenant_id, used, limit, requested, "message quota allowed");
        Ok(())
    }

    /// Deny when the tenant already has `max_senders` active senders.
    pub async fn check_sender_quota(&self, scope: QuotaScope) -> Result<()> {
        let tenant_id = match scope {
            QuotaScope::Platform => return Ok(()),
            QuotaScope::Tenant(id) => id,
        };

        let tenant = self
            .store
            .tenant(tenant_id)
            .await?
            .ok_or(Error::TenantNotFound { tenant_id })?;

        let plan = self
            .store
            .plan(tenant.plan_id)
            .await?
            .ok_or(Error::PlanNotFound {
                plan_id: tenant.plan_id,
            })?;

        let used = self.store.count_active_senders(tenant_id).await?;
        if used >= plan.max_senders {
            return Err(Error::SenderQuotaExceeded {
                used,
                limit: plan.max_senders,
            });
        }
        Ok(())
    }

    /// Reserve capacity for `count` messages about to be dispatched.
    ///
    /// The sole usage increment outside the billing reset sweep. The
    /// increment is atomic at the storage layer, so concurrent campaign
    /// creations for one tenant do not lose updates.
    pub async fn reserve_messages(&self, tenant_id: TenantId, count: i64) -> Result<()> {
        self.store.increment_messages_used(tenant_id, count).await?;
        info!(tenant_id, count, "reserved message quota");
        Ok(())
    }
}
