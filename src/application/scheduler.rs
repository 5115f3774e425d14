use super::disputes::DisputeEngine;
use super::ledger::SweepReport;
use crate::error::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub sweep: SweepReport,
    pub disputes_resolved: usize,
}

/// The one time-driven part of the system: auto-release of due escrow
/// entries and closing of expired voting windows.
#[derive(Clone)]
pub struct Scheduler {
    engine: Arc<DisputeEngine>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(engine: Arc<DisputeEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    pub fn engine(&self) -> &Arc<DisputeEngine> {
        &self.engine
    }

    /// One pass. Both halves are idempotent, so overlapping with a manual
    /// trigger is harmless.
    pub async fn tick(&self) -> Result<TickReport> {
        let sweep = self.engine.ledger().sweep().await?;
        let resolved = self.engine.close_due().await?;
        Ok(TickReport {
            sweep,
            disputes_resolved: resolved.len(),
        })
    }

    /// Runs `tick` every interval until `shutdown` flips to `true` or its
    /// sender is dropped. Failed ticks are logged and retried next interval.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = self.interval.as_secs(), "scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.tick().await {
                            Ok(report) => debug!(?report, "scheduler tick"),
                            Err(e) => error!(error = %e, "scheduler tick failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("scheduler stopped");
        })
    }
}
