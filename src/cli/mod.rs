//! CLI module for the experiment engine
//!
//! Every subcommand loads a JSON fixture into in-memory stores:
//! - `evaluate`: run one evaluation sweep
//! - `schedule`: run sweeps on an interval until interrupted
//! - `report`: tenant experiment listing and dashboard metrics
//! - `detail`: full report of one experiment
//! - `declare`: manually declare a winner

pub mod declare;
pub mod detail;
pub mod evaluate;
pub mod fixture;
pub mod report;
pub mod schedule;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use crate::config::AppConfig;
use crate::domain::{Clock, FixedClock, SystemClock};
use crate::infrastructure::logging;
use crate::infrastructure::services::ExperimentRepositories;
use crate::{create_engine_with, Engine};

pub use fixture::Fixture;

/// Experiment Engine - A/B test assignment, analysis and auto-stop
#[derive(Parser)]
#[command(name = "experiment-engine")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one evaluation sweep and print its summary
    Evaluate(evaluate::EvaluateArgs),

    /// Run evaluation sweeps on an interval until Ctrl+C
    Schedule(schedule::ScheduleArgs),

    /// Print a tenant's experiments and dashboard metrics
    Report(report::ReportArgs),

    /// Print the full report of one experiment
    Detail(detail::DetailArgs),

    /// Complete an experiment with a manually chosen winner
    Declare(declare::DeclareArgs),
}

/// Fixture argument shared by every subcommand
#[derive(Args, Clone, Debug)]
pub struct FixtureArgs {
    /// JSON file with experiments and their traffic
    #[arg(long, short = 'f')]
    pub fixture: PathBuf,
}

/// Loaded configuration and an engine seeded from a fixture
pub struct Session {
    pub config: AppConfig,
    pub engine: Engine,
}

/// Load configuration, initialize logging and seed an engine from `path`
pub async fn bootstrap(path: &Path) -> anyhow::Result<Session> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().unwrap_or_default();
    logging::init_logging(&config.logging);

    let fixture = Fixture::from_path(path)?;
    let engine = engine_from_fixture(&fixture, &config).await?;

    Ok(Session { config, engine })
}

/// Build an engine over in-memory stores filled from the fixture
///
/// The clock is frozen at the fixture's `now` when given.
pub async fn engine_from_fixture(fixture: &Fixture, config: &AppConfig) -> anyhow::Result<Engine> {
    let clock: Arc<dyn Clock> = match fixture.now {
        Some(now) => Arc::new(FixedClock::new(now)),
        None => Arc::new(SystemClock),
    };

    let repositories = ExperimentRepositories::in_memory();
    fixture
        .load_into(&repositories, config.engine.experiment_defaults())
        .await?;

    Ok(create_engine_with(repositories, clock, &config.engine))
}

/// Write a value to stdout as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExperimentStatus;

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from([
            "experiment-engine",
            "report",
            "--fixture",
            "fixture.json",
            "--tenant",
            "acme",
            "--status",
            "running",
        ])
        .unwrap();

        match cli.command {
            Command::Report(args) => {
                assert_eq!(args.fixture.fixture, PathBuf::from("fixture.json"));
                assert_eq!(args.tenant, "acme");
                assert_eq!(args.status, Some(ExperimentStatus::Active));
            }
            _ => panic!("expected report"),
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let result = Cli::try_parse_from([
            "experiment-engine",
            "report",
            "-f",
            "fixture.json",
            "--tenant",
            "acme",
            "--status",
            "archived",
        ]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_engine_from_fixture_uses_fixture_clock() {
        let engine = test_fixture::engine().await;
        let summaries = engine
            .aggregator
            .get_tenant_experiments(&crate::domain::TenantId::new("acme").unwrap(), None)
            .await;

        let pricing = summaries
            .iter()
            .find(|s| s.id.as_str() == "pricing-page")
            .unwrap();
        assert_eq!(pricing.days_running, 14);
    }
}
