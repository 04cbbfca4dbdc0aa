//! Declare command - manual winner declaration

use clap::Args;
use serde_json::json;
use tracing::warn;

use super::{bootstrap, print_json, FixtureArgs};
use crate::domain::{ExperimentId, VariantId};

/// Arguments for the declare command
#[derive(Args, Clone, Debug)]
pub struct DeclareArgs {
    #[command(flatten)]
    pub fixture: FixtureArgs,

    /// Experiment to complete
    #[arg(long)]
    pub experiment: String,

    /// Winning variant
    #[arg(long)]
    pub variant: String,
}

/// Declare the winner and print the resulting experiment state
pub async fn run(args: DeclareArgs) -> anyhow::Result<()> {
    let experiment_id = ExperimentId::new(&args.experiment)?;
    let variant_id = VariantId::new(&args.variant)?;
    let session = bootstrap(&args.fixture.fixture).await?;

    let declared = session
        .engine
        .aggregator
        .declare_winner(&experiment_id, &variant_id)
        .await;
    if !declared {
        warn!(
            experiment_id = %experiment_id,
            variant_id = %variant_id,
            "Winner was not declared"
        );
    }

    let experiment = session.engine.experiments.get(experiment_id.as_str()).await?;
    print_json(&json!({
        "declared": declared,
        "experiment": experiment,
    }))
}
