//! The dispatch loop: one supervised background task per campaign.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    chrono::Utc,
    serde::Serialize,
    tokio::task::JoinHandle,
    tracing::{error, info, warn},
};

use {
    volley_channels::Outbound,
    volley_common::CampaignId,
    volley_store::{Campaign, Store},
};

use crate::error::{Error, Result};

/// Dispatch pacing configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Delay between consecutive recipients of one campaign, applied after
    /// failures as well but not after the final recipient. Respects
    /// channel-side abuse heuristics.
    pub pacing: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            pacing: Duration::from_secs(2),
        }
    }
}

/// Final counters of one dispatch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub total: i64,
    pub sent: i64,
    pub failed: i64,
}

/// Walks a campaign's pending logs sequentially, recording one terminal
/// outcome per recipient.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    outbound: Arc<dyn Outbound>,
    config: DispatchConfig,
    in_flight: Mutex<HashSet<CampaignId>>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, outbound: Arc<dyn Outbound>) -> Self {
        Self::with_config(store, outbound, DispatchConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn Store>,
        outbound: Arc<dyn Outbound>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            outbound,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Dispatch a pending campaign to completion.
    ///
    /// Fails `AlreadyProcessed` without side effects when the campaign is
    /// not pending. Per-recipient send failures are recorded on the log and
    /// do not abort the run; a store failure is fatal to the run and leaves
    /// the campaign in `error` with unprocessed logs still pending.
    pub async fn run(&self, campaign_id: CampaignId) -> Result<DispatchReport> {
        let campaign = self
            .store
            .campaign(campaign_id)
            .await?
            .ok_or(Error::CampaignNotFound { campaign_id })?;

        if !self.store.begin_campaign(campaign_id, Utc::now()).await? {
            return Err(Error::AlreadyProcessed { campaign_id });
        }
        info!(campaign_id, total = campaign.total_count, "campaign dispatch started");

        match self.drain(&campaign).await {
            Ok(report) => {
                info!(
                    campaign_id,
                    sent = report.sent,
                    failed = report.failed,
                    "campaign completed"
                );
                Ok(report)
            },
            Err(run_error) => {
                if let Err(error) = self.store.mark_campaign_error(campaign_id).await {
                    error!(campaign_id, %error, "failed to record campaign error state");
                }
                Err(run_error)
            },
        }
    }

    /// Launch `run` as a tracked background task.
    ///
    /// The task's outcome is observable: failures are logged and the
    /// campaign id is listed by [`Dispatcher::running`] while in flight.
    pub fn launch(self: &Arc<Self>, campaign_id: CampaignId) -> JoinHandle<()> {
        self.track(campaign_id, true);
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            match dispatcher.run(campaign_id).await {
                Ok(report) => {
                    info!(
                        campaign_id,
                        sent = report.sent,
                        failed = report.failed,
                        "background dispatch finished"
                    );
                },
                Err(error) => {
                    error!(campaign_id, %error, "background dispatch failed");
                },
            }
            dispatcher.track(campaign_id, false);
        })
    }

    /// Campaign ids with a dispatch task currently in flight.
    pub fn running(&self) -> Vec<CampaignId> {
        let in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<_> = in_flight.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn track(&self, campaign_id: CampaignId, active: bool) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if active {
            in_flight.insert(campaign_id);
        } else {
            in_flight.remove(&campaign_id);
        }
    }

    async fn drain(&self, campaign: &Campaign) -> Result<DispatchReport> {
        let logs = self.store.pending_logs(campaign.id).await?;
        let total = logs.len() as i64;
        let last = logs.len().saturating_sub(1);
        let mut sent = 0i64;
        let mut failed = 0i64;

        for (index, log) in logs.into_iter().enumerate() {
            match self
                .outbound
                .send(campaign.sender_id, &log.destination, &log.body)
                .await
            {
                Ok(()) => {
                    self.store.mark_log_sent(log.id, Utc::now()).await?;
                    sent += 1;
                },
                Err(error) => {
                    warn!(
                        campaign_id = campaign.id,
                        log_id = log.id,
                        %error,
                        "recipient send failed"
                    );
                    self.store
                        .mark_log_failed(log.id, &error.to_string())
                        .await?;
                    failed += 1;
                },
            }

            if index < last && !self.config.pacing.is_zero() {
                tokio::time::sleep(self.config.pacing).await;
            }
        }

        self.store
            .complete_campaign(campaign.id, sent, failed, Utc::now())
            .await?;
        Ok(DispatchReport {
            total,
            sent,
            failed,
        })
    }
}
