//! Plan-based usage ceilings for tenants.
//!
//! The quota gate checks whether a tenant's plan allows N more messages or
//! one more sender, and reserves message capacity by incrementing the
//! tenant's cycle usage counter. Reservation happens at campaign-creation
//! time against the requested recipient count, not at actual send time.

pub mod error;
pub mod gate;

pub use {
    error::{Error, Result},
    gate::{QuotaGate, QuotaScope},
};
