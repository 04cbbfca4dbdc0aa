//! Report command - tenant listing and dashboard metrics

use clap::Args;
use serde::Serialize;

use super::{bootstrap, print_json, FixtureArgs};
use crate::domain::{ExperimentStatus, TenantId};
use crate::infrastructure::services::{DashboardMetrics, ExperimentAggregator, ExperimentSummary};

/// Arguments for the report command
#[derive(Args, Clone, Debug)]
pub struct ReportArgs {
    #[command(flatten)]
    pub fixture: FixtureArgs,

    /// Tenant to report on
    #[arg(long)]
    pub tenant: String,

    /// Only list experiments in this status
    #[arg(long)]
    pub status: Option<ExperimentStatus>,
}

#[derive(Debug, Serialize)]
pub struct TenantReport {
    pub experiments: Vec<ExperimentSummary>,
    pub dashboard: DashboardMetrics,
}

/// Print the tenant's experiments and dashboard metrics
pub async fn run(args: ReportArgs) -> anyhow::Result<()> {
    let tenant_id = TenantId::new(&args.tenant)?;
    let session = bootstrap(&args.fixture.fixture).await?;

    let report = build_report(&session.engine.aggregator, &tenant_id, args.status).await;
    print_json(&report)
}

async fn build_report(
    aggregator: &ExperimentAggregator,
    tenant_id: &TenantId,
    status: Option<ExperimentStatus>,
) -> TenantReport {
    TenantReport {
        experiments: aggregator.get_tenant_experiments(tenant_id, status).await,
        dashboard: aggregator.get_dashboard_metrics(tenant_id).await,
    }
}
