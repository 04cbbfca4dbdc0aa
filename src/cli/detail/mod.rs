//! Detail command - full report of one experiment

use anyhow::Context;
use clap::Args;

use super::{bootstrap, print_json, FixtureArgs};
use crate::domain::ExperimentId;

/// Arguments for the detail command
#[derive(Args, Clone, Debug)]
pub struct DetailArgs {
    #[command(flatten)]
    pub fixture: FixtureArgs,

    /// Experiment to report on
    #[arg(long)]
    pub experiment: String,
}

/// Print the detail report of one experiment
pub async fn run(args: DetailArgs) -> anyhow::Result<()> {
    let experiment_id = ExperimentId::new(&args.experiment)?;
    let session = bootstrap(&args.fixture.fixture).await?;

    let detail = session
        .engine
        .aggregator
        .get_experiment_detail(&experiment_id)
        .await
        .with_context(|| format!("Experiment '{}' not found", experiment_id))?;

    print_json(&detail)
}
