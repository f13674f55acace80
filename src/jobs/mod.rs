//! Scheduled Jobs
//!
//! The payout scheduler settles positive balances on a fixed interval.
//! Settlement itself is a no-op for users without a positive balance, so
//! the interval can be short without risk of double payment.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info};

use crate::ledger::{LedgerEngine, LedgerError, PayoutReport};

/// Configuration for the payout scheduler
#[derive(Debug, Clone)]
pub struct PayoutSchedulerConfig {
    /// Time between payout runs (default: 1 hour)
    pub payout_interval: Duration,
}

impl Default for PayoutSchedulerConfig {
    fn default() -> Self {
        Self {
            payout_interval: Duration::from_secs(3600),
        }
    }
}

/// Runs payout batches in the background.
pub struct PayoutScheduler {
    engine: Arc<LedgerEngine>,
    config: PayoutSchedulerConfig,
}

impl PayoutScheduler {
    pub fn new(engine: Arc<LedgerEngine>) -> Self {
        Self {
            engine,
            config: PayoutSchedulerConfig::default(),
        }
    }

    pub fn with_config(engine: Arc<LedgerEngine>, config: PayoutSchedulerConfig) -> Self {
        Self { engine, config }
    }

    /// Start the scheduler in the background.
    /// Returns a handle that can be used to abort it.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(
            interval_secs = self.config.payout_interval.as_secs(),
            "payout scheduler started"
        );

        let mut payout_interval = interval(self.config.payout_interval);
        // The first tick fires immediately; skip it so a restart loop does
        // not hammer the store.
        payout_interval.tick().await;

        loop {
            payout_interval.tick().await;
            match self.run_once().await {
                Ok(report) if report.settled > 0 || !report.errors.is_empty() => {
                    info!(
                        settled = report.settled,
                        total_amount = report.total_amount,
                        errors = report.errors.len(),
                        "payout batch finished"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "payout batch failed");
                }
            }
        }
    }

    /// Run one payout batch (for manual trigger or testing).
    pub async fn run_once(&self) -> Result<PayoutReport, LedgerError> {
        self.engine.run_payout().await
    }
}
