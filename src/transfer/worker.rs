//! Reconciliation Worker
//!
//! Background worker that re-drives transfers stuck IN_TRANSIT: a publish
//! that failed after the reservation commit, a settlement that failed after
//! the source decision, or a message lost with a non-durable queue.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::error::TransferError;
use super::orchestrator::TransferOrchestrator;
use crate::config::ReconciliationConfig;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan for stale transfers
    pub scan_interval: Duration,
    /// How long a transfer must sit IN_TRANSIT to be considered stale
    pub stale_threshold: Duration,
    /// Maximum transfers to re-drive per scan
    pub batch_size: usize,
    /// Re-drives after which a transfer is reported for manual inspection
    pub max_redrives: i32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
            batch_size: 100,
            max_redrives: 10,
        }
    }
}

impl From<&ReconciliationConfig> for WorkerConfig {
    fn from(config: &ReconciliationConfig) -> Self {
        Self {
            scan_interval: config.scan_interval(),
            stale_threshold: config.stale_threshold(),
            batch_size: config.batch_size,
            max_redrives: config.max_redrives,
        }
    }
}

pub struct ReconciliationWorker {
    orchestrator: Arc<TransferOrchestrator>,
    config: WorkerConfig,
}

impl ReconciliationWorker {
    pub fn new(orchestrator: Arc<TransferOrchestrator>, config: WorkerConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Run until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            batch_size = self.config.batch_size,
            "Starting reconciliation worker"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.scan_once().await {
                error!(error = %e, "Reconciliation scan failed");
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.config.scan_interval) => {}
            }
        }

        info!("Reconciliation worker stopped");
    }

    /// Run a single scan; returns the number of transfers re-driven
    pub async fn scan_once(&self) -> Result<usize, TransferError> {
        let stale = self
            .orchestrator
            .store()
            .find_stale(self.config.stale_threshold, self.config.batch_size)
            .await?;

        if stale.is_empty() {
            debug!("No stale transfers found");
            return Ok(0);
        }

        info!(count = stale.len(), "Found stale transfers to re-drive");

        let mut redriven = 0;
        for transfer in &stale {
            if transfer.retry_count >= self.config.max_redrives {
                error!(
                    transfer_id = %transfer.id,
                    retry_count = transfer.retry_count,
                    "Transfer still in transit after max re-drives, needs manual inspection"
                );
            }

            match self.orchestrator.redrive(transfer).await {
                Ok(true) => {
                    debug!(transfer_id = %transfer.id, retry_count = transfer.retry_count + 1, "Intent re-published");
                    redriven += 1;
                }
                Ok(false) => {
                    debug!(transfer_id = %transfer.id, "Transfer settled before re-drive");
                }
                Err(e) => {
                    warn!(transfer_id = %transfer.id, error = %e, "Failed to re-drive transfer");
                }
            }
        }

        if redriven > 0 {
            info!(count = redriven, "Re-drove transfers this scan");
        }
        Ok(redriven)
    }
}
