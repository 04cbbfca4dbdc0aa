//! Schedule command - periodic evaluation sweeps until interrupted

use std::time::Duration;

use clap::Args;
use tracing::{info, warn};

use super::{bootstrap, FixtureArgs};
use crate::infrastructure::observability::init_metrics;

/// Arguments for the schedule command
#[derive(Args, Clone, Debug)]
pub struct ScheduleArgs {
    #[command(flatten)]
    pub fixture: FixtureArgs,

    /// Seconds between sweeps (overrides config)
    #[arg(long)]
    pub interval_secs: Option<u64>,
}

/// Run sweeps on an interval until Ctrl+C
pub async fn run(args: ScheduleArgs) -> anyhow::Result<()> {
    let session = bootstrap(&args.fixture.fixture).await?;
    init_metrics(&session.config.metrics);

    let interval = args
        .interval_secs
        .map(|secs| Duration::from_secs(secs.max(1)))
        .unwrap_or_else(|| session.config.engine.sweep_interval());

    info!("Starting sweep scheduler every {:?}", interval);

    let sweeps = session
        .engine
        .scheduler(interval)
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await;

    info!(sweeps, "Sweep scheduler stopped");
    Ok(())
}
