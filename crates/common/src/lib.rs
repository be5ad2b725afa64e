//! Shared ids, recipient types, and logging setup used across all volley
//! crates.

pub mod logging;
pub mod types;

pub use types::{CampaignId, MessageLogId, PlanId, Recipient, SenderId, TenantId, UserId};
