//! Campaign creation and dispatch.
//!
//! The orchestrator validates inputs and creates a campaign plus its
//! per-recipient logs; the dispatcher walks pending logs as a supervised
//! background task, sending each through the channel session registry with
//! pacing and per-recipient failure isolation.

pub mod dispatcher;
pub mod error;
pub mod orchestrator;

pub use {
    dispatcher::{DispatchConfig, DispatchReport, Dispatcher},
    error::{Error, Result},
    orchestrator::{CampaignOrchestrator, CampaignStats},
};
