//! Periodic evaluation sweeps

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::ExperimentOrchestrator;

/// Default pause between sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Runs [`ExperimentOrchestrator::evaluate_all`] on a fixed interval
///
/// Sweeps run inline in the loop, so a slow sweep delays the next tick
/// instead of overlapping it.
#[derive(Debug, Clone)]
pub struct SweepScheduler {
    orchestrator: Arc<ExperimentOrchestrator>,
    interval: Duration,
}

impl SweepScheduler {
    pub fn new(orchestrator: Arc<ExperimentOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Sweep until `shutdown` resolves; returns the number of sweeps run
    ///
    /// The first sweep starts immediately. Shutdown is observed between
    /// sweeps.
    pub async fn run<F>(&self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_secs = self.interval.as_secs(), "Sweep scheduler started");

        let mut sweeps = 0u64;
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let summary = self.orchestrator.evaluate_all().await;
                    sweeps += 1;
                    debug!(sweep = sweeps, evaluated = summary.evaluated, "Sweep complete");
                }
            }
        }

        info!(sweeps, "Sweep scheduler stopped");
        sweeps
    }
}
