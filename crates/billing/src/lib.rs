//! Billing cycle scheduler.
//!
//! Periodic sweep that resets each active tenant's monthly usage counter on
//! its billing anniversary. Runs independently of request traffic; the
//! reference cadence is daily, which makes the reset effectively
//! monthly-anniversary driven.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Result,
    chrono::{Datelike, NaiveDate, Utc},
    tokio::{
        sync::{Mutex, Notify},
        task::JoinHandle,
    },
    tracing::{error, info, warn},
};

use volley_store::Store;

/// Sweep cadence configuration.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Time between sweeps.
    pub sweep_interval: Duration,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// The billing cycle scheduler.
pub struct BillingService {
    store: Arc<dyn Store>,
    config: BillingConfig,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
}

impl BillingService {
    pub fn new(store: Arc<dyn Store>) -> Arc<Self> {
        Self::with_config(store, BillingConfig::default())
    }

    pub fn with_config(store: Arc<dyn Store>, config: BillingConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            config,
            timer_handle: Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Start the timer loop.
    pub async fn start(self: &Arc<Self>) {
        let svc = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.config.sweep_interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let today = Utc::now().date_naive();
                        if let Err(error) = svc.run_sweep(today).await {
                            error!(%error, "billing sweep failed");
                        }
                    },
                    _ = shutdown.notified() => break,
                }
            }
        });

        *self.timer_handle.lock().await = Some(handle);
        info!(interval_secs = interval.as_secs(), "billing scheduler started");
    }

    /// Stop the timer loop.
    pub async fn stop(&self) {
        self.shutdown.notify_one();
        let mut handle = self.timer_handle.lock().await;
        if let Some(h) = handle.take() {
            h.abort();
        }
        info!("billing scheduler stopped");
    }

    /// Reset every active tenant whose billing anniversary falls on
    /// `today`'s day-of-month. Returns the number of tenants reset.
    ///
    /// Per-tenant resets are independent: a failure resetting one tenant is
    /// logged and never aborts the sweep.
    pub async fn run_sweep(&self, today: NaiveDate) -> Result<usize> {
        let tenants = self.store.active_tenants().await?;
        let mut reset = 0usize;

        for tenant in tenants {
            if tenant.billing_cycle_start.day() != today.day() {
                continue;
            }
            match self.store.reset_billing_cycle(tenant.id, today).await {
                Ok(()) => {
                    info!(tenant_id = tenant.id, "billing cycle reset");
                    reset += 1;
                },
                Err(error) => {
                    warn!(tenant_id = tenant.id, %error, "failed to reset billing cycle");
                },
            }
        }

        info!(reset, "billing sweep complete");
        Ok(reset)
    }
}
