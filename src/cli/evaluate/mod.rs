//! Evaluate command - one sweep over every active experiment

use clap::Args;
use tracing::info;

use super::{bootstrap, print_json, FixtureArgs};

/// Arguments for the evaluate command
#[derive(Args, Clone, Debug)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub fixture: FixtureArgs,
}

/// Run one evaluation sweep and print its summary
pub async fn run(args: EvaluateArgs) -> anyhow::Result<()> {
    let session = bootstrap(&args.fixture.fixture).await?;

    info!(
        concurrency = session.engine.orchestrator.settings().sweep_concurrency,
        "Evaluating active experiments"
    );
    let summary = session.engine.orchestrator.evaluate_all().await;

    print_json(&summary)
}
