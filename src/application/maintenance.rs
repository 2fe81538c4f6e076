use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use crate::storage::CancellationOutcome;

use super::Canceller;

/// How often cancellation runs and how many recent operations it looks at.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub interval: Duration,
    pub limit: u32,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            limit: 4,
        }
    }
}

/// Periodic cancellation of recent operations.
///
/// Passes run one after another in a single task, and ticks that fire while a
/// pass is still running are skipped, so two passes never observe the same
/// window. If the loop panics it is started again on a fresh task.
pub struct Maintenance<C> {
    config: MaintenanceConfig,
    canceller: Arc<C>,
}

impl<C: Canceller> Maintenance<C> {
    pub fn new(config: MaintenanceConfig, canceller: Arc<C>) -> Self {
        Self { config, canceller }
    }

    /// Run on a background task until `shutdown` turns true or its sender
    /// is dropped.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            limit = self.config.limit,
            "maintenance started"
        );

        loop {
            let worker = tokio::spawn(run_passes(
                self.config.clone(),
                Arc::clone(&self.canceller),
                shutdown.clone(),
            ));

            match worker.await {
                Ok(()) => break,
                Err(err) if err.is_panic() => {
                    error!(error = %err, "maintenance loop panicked, restarting");
                }
                Err(err) => {
                    warn!(error = %err, "maintenance loop aborted");
                    break;
                }
            }

            if *shutdown.borrow() {
                break;
            }
        }

        info!("maintenance stopped");
    }
}

async fn run_passes<C: Canceller>(
    config: MaintenanceConfig,
    canceller: Arc<C>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *shutdown.borrow() {
            return;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = ticker.tick() => {
                run_pass(canceller.as_ref(), config.limit).await;
            }
        }
    }
}

/// One cancellation pass. Failures are logged; the next tick is the retry.
pub async fn run_pass<C: Canceller>(canceller: &C, limit: u32) -> Option<CancellationOutcome> {
    debug!(limit, "cancellation pass started");

    match canceller.cancel(limit).await {
        Ok(outcome) => {
            debug!(
                cancelled = outcome.cancelled.len(),
                balance = outcome.balance,
                "cancellation pass done"
            );
            Some(outcome)
        }
        Err(err) if err.is_transient() => {
            warn!(error = %err, limit, "cancellation pass failed, waiting for next tick");
            None
        }
        Err(err) => {
            error!(error = %err, limit, "cancellation pass failed");
            None
        }
    }
}
