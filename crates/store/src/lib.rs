//! Durable record store for the campaign engine.
//!
//! Defines the entity set (tenants, plans, senders, campaigns, message logs),
//! the [`Store`] trait consumed by the other crates, a SQLite implementation
//! backed by sqlx, and an in-memory implementation for tests.

pub mod memory;
pub mod sqlite;
pub mod store;
pub mod types;

pub use {
    memory::InMemoryStore,
    sqlite::SqliteStore,
    store::Store,
    types::{
        Campaign, CampaignStatus, ConnectionStatus, LogCounts, LogStatus, MessageLog, NewCampaign,
        Plan, Sender, Tenant, TenantStatus,
    },
};
