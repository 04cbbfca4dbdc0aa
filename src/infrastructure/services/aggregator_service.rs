//! Experiment reporting service
//!
//! Read-side views for dashboards: tenant listings, a full experiment
//! detail and tenant-wide metrics, plus the manual winner declaration.
//! Storage failures are logged and turned into empty results.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use super::{ExperimentRepositories, ResultCalculationService};
use crate::domain::experiment::{
    Experiment, ExperimentId, ExperimentQuery, ExperimentStatus, ExperimentType, MachineName,
    TenantId, Variant, VariantId,
};
use crate::domain::{Clock, DomainError};
use crate::infrastructure::experiment::{
    analyze_experiment, calculate_minimum_sample_size, chi_squared_test,
    estimate_days_to_significance, ChiSquaredResult, ExperimentAnalysis, VariantCounts,
};

// ============================================================================
// Report Types
// ============================================================================

/// One row of a tenant's experiment listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentSummary {
    pub id: ExperimentId,
    pub name: String,
    pub machine_name: MachineName,
    pub experiment_type: ExperimentType,
    pub status: ExperimentStatus,
    pub total_visitors: u64,
    pub total_conversions: u64,
    /// Percent, two decimals
    pub overall_rate: f64,
    pub has_winner: bool,
    pub days_running: i64,
    pub variant_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Experiment header of a detail report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentOverview {
    pub id: ExperimentId,
    pub name: String,
    pub machine_name: MachineName,
    pub hypothesis: Option<String>,
    pub experiment_type: ExperimentType,
    pub status: ExperimentStatus,
    pub confidence_threshold: f64,
    pub minimum_detectable_effect: f64,
    pub total_visitors: u64,
    pub total_conversions: u64,
    pub total_revenue: f64,
    pub overall_rate: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub days_running: i64,
    pub winner_variant: Option<VariantId>,
}

/// Variant row of a detail report, control first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantReport {
    pub id: VariantId,
    pub label: String,
    pub is_control: bool,
    pub traffic: u8,
    pub visitors: u64,
    pub conversions: u64,
    /// Percent, two decimals
    pub conversion_rate: f64,
    pub revenue: f64,
}

/// How far an experiment is from the sample it needs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleSizeProgress {
    /// Visitors needed per variant; `None` while no baseline rate exists
    pub required: Option<u64>,
    pub current: u64,
    pub remaining: u64,
    /// `None` when unknown
    pub days_remaining: Option<u64>,
    /// Percent of `required`, capped at 100
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelStage {
    pub label: String,
    pub count: u64,
    pub rate: f64,
}

/// Full report of one experiment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentDetail {
    pub experiment: ExperimentOverview,
    pub variants: Vec<VariantReport>,
    pub analysis: ExperimentAnalysis,
    pub chi_squared: ChiSquaredResult,
    pub sample_size: SampleSizeProgress,
    pub funnel: Vec<FunnelStage>,
}

/// Tenant-wide experimentation metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardMetrics {
    pub active_experiments: u64,
    pub completed_experiments: u64,
    pub total_visitors: u64,
    /// Percent, two decimals
    pub avg_conversion_rate: f64,
    pub experiments_with_winner: u64,
    pub avg_days_to_significance: u64,
}

// ============================================================================
// Experiment Aggregator
// ============================================================================

/// Reporting service over experiments and their variant counters
#[derive(Debug, Clone)]
pub struct ExperimentAggregator {
    repositories: ExperimentRepositories,
    results: Arc<ResultCalculationService>,
    clock: Arc<dyn Clock>,
}

impl ExperimentAggregator {
    pub fn new(
        repositories: ExperimentRepositories,
        results: Arc<ResultCalculationService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repositories,
            results,
            clock,
        }
    }

    /// List a tenant's experiments, newest first
    pub async fn get_tenant_experiments(
        &self,
        tenant_id: &TenantId,
        status: Option<ExperimentStatus>,
    ) -> Vec<ExperimentSummary> {
        match self.tenant_experiments(tenant_id, status).await {
            Ok(summaries) => summaries,
            Err(e) => {
                error!(tenant_id = %tenant_id, error = %e, "Failed to list tenant experiments");
                Vec::new()
            }
        }
    }

    /// Full report of one experiment; `None` when unknown
    pub async fn get_experiment_detail(
        &self,
        experiment_id: &ExperimentId,
    ) -> Option<ExperimentDetail> {
        match self.experiment_detail(experiment_id).await {
            Ok(detail) => detail,
            Err(e) => {
                error!(experiment_id = %experiment_id, error = %e, "Failed to build experiment detail");
                None
            }
        }
    }

    /// Tenant-wide metrics; zeroed when the tenant has no experiments
    pub async fn get_dashboard_metrics(&self, tenant_id: &TenantId) -> DashboardMetrics {
        match self.dashboard_metrics(tenant_id).await {
            Ok(metrics) => metrics,
            Err(e) => {
                error!(tenant_id = %tenant_id, error = %e, "Failed to compute dashboard metrics");
                DashboardMetrics::default()
            }
        }
    }

    /// Manually complete an experiment with the given winner
    ///
    /// Refuses already completed experiments and variants of other
    /// experiments.
    pub async fn declare_winner(&self, experiment_id: &ExperimentId, variant_id: &VariantId) -> bool {
        let experiment = match self.repositories.experiments.get(experiment_id).await {
            Ok(Some(experiment)) => experiment,
            Ok(None) => return false,
            Err(e) => {
                error!(experiment_id = %experiment_id, error = %e, "Failed to load experiment");
                return false;
            }
        };

        if experiment.status() == ExperimentStatus::Completed {
            info!(
                experiment_id = %experiment_id,
                "Winner not declared: experiment already completed"
            );
            return false;
        }

        match self.results.declare_winner(experiment_id, variant_id).await {
            Ok(declared) => declared,
            Err(e) => {
                error!(
                    experiment_id = %experiment_id,
                    variant_id = %variant_id,
                    error = %e,
                    "Failed to declare winner"
                );
                false
            }
        }
    }

    // ========================================================================
    // Builders
    // ========================================================================

    async fn load_tenant(
        &self,
        tenant_id: &TenantId,
        status: Option<ExperimentStatus>,
    ) -> Result<Vec<(Experiment, Vec<Variant>)>, DomainError> {
        let mut query = ExperimentQuery::new().with_tenant(tenant_id.clone());
        if let Some(status) = status {
            query = query.with_status(status);
        }

        let ids = self.repositories.experiments.query_ids(&query).await?;
        let experiments = self.repositories.experiments.get_many(&ids).await?;

        let mut loaded = Vec::with_capacity(experiments.len());
        for experiment in experiments {
            let variants = self
                .repositories
                .variants
                .list_for_experiment(experiment.id())
                .await?;
            loaded.push((experiment, variants));
        }
        Ok(loaded)
    }

    async fn tenant_experiments(
        &self,
        tenant_id: &TenantId,
        status: Option<ExperimentStatus>,
    ) -> Result<Vec<ExperimentSummary>, DomainError> {
        let now = self.clock.now();

        Ok(self
            .load_tenant(tenant_id, status)
            .await?
            .into_iter()
            .map(|(experiment, variants)| {
                let totals = Totals::of(&variants);
                ExperimentSummary {
                    has_winner: has_winner(&experiment, &variants, &totals),
                    id: experiment.id().clone(),
                    name: experiment.name().to_string(),
                    machine_name: experiment.machine_name().clone(),
                    experiment_type: experiment.experiment_type(),
                    status: experiment.status(),
                    total_visitors: totals.visitors,
                    total_conversions: totals.conversions,
                    overall_rate: round_to(totals.rate_percent(), 2),
                    days_running: experiment.days_running(now),
                    variant_count: variants.len(),
                    created_at: experiment.created_at(),
                }
            })
            .collect())
    }

    async fn experiment_detail(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<Option<ExperimentDetail>, DomainError> {
        let Some(experiment) = self.repositories.experiments.get(experiment_id).await? else {
            return Ok(None);
        };

        let mut variants = self
            .repositories
            .variants
            .list_for_experiment(experiment_id)
            .await?;
        variants.sort_by_key(|v| !v.is_control());

        let now = self.clock.now();
        let totals = Totals::of(&variants);
        let counts: Vec<VariantCounts> = variants.iter().map(VariantCounts::from).collect();

        let analysis = analyze_experiment(&counts, experiment.confidence_threshold());
        let chi_squared = chi_squared_test(
            &counts
                .iter()
                .map(|c| (c.visitors, c.conversions))
                .collect::<Vec<_>>(),
        );

        let sample_size = self.sample_size_progress(&experiment, &variants, &totals, now);

        let funnel = vec![
            FunnelStage {
                label: "Visitors".to_string(),
                count: totals.visitors,
                rate: 100.0,
            },
            FunnelStage {
                label: "Conversions".to_string(),
                count: totals.conversions,
                rate: round_to(totals.rate_percent(), 1),
            },
        ];

        let overview = ExperimentOverview {
            id: experiment.id().clone(),
            name: experiment.name().to_string(),
            machine_name: experiment.machine_name().clone(),
            hypothesis: experiment.hypothesis().map(str::to_string),
            experiment_type: experiment.experiment_type(),
            status: experiment.status(),
            confidence_threshold: experiment.confidence_threshold(),
            minimum_detectable_effect: experiment.minimum_detectable_effect(),
            total_visitors: totals.visitors,
            total_conversions: totals.conversions,
            total_revenue: round_to(totals.revenue, 2),
            overall_rate: round_to(totals.rate_percent(), 2),
            created_at: experiment.created_at(),
            started_at: experiment.started_at(),
            days_running: experiment.days_running(now),
            winner_variant: experiment.winner_variant().cloned(),
        };

        let variants = variants
            .iter()
            .map(|v| VariantReport {
                id: v.id().clone(),
                label: v.label().to_string(),
                is_control: v.is_control(),
                traffic: v.traffic(),
                visitors: v.visitors(),
                conversions: v.conversions(),
                conversion_rate: round_to(v.conversion_rate() * 100.0, 2),
                revenue: round_to(v.revenue(), 2),
            })
            .collect();

        Ok(Some(ExperimentDetail {
            experiment: overview,
            variants,
            analysis,
            chi_squared,
            sample_size,
            funnel,
        }))
    }

    fn sample_size_progress(
        &self,
        experiment: &Experiment,
        variants: &[Variant],
        totals: &Totals,
        now: DateTime<Utc>,
    ) -> SampleSizeProgress {
        let control_rate = variants
            .iter()
            .find(|v| v.is_control() && v.visitors() > 0)
            .map(Variant::conversion_rate)
            .unwrap_or(0.0);
        let baseline = if control_rate > 0.0 {
            control_rate
        } else {
            totals.rate()
        };

        let required = calculate_minimum_sample_size(
            baseline,
            experiment.minimum_detectable_effect(),
            experiment.confidence_threshold(),
            experiment.power(),
        );

        let current = totals.visitors;
        let days_remaining = required.and_then(|required| {
            let start = experiment.started_at().unwrap_or(experiment.created_at());
            let days_elapsed = (now - start).num_days().max(1) as u64;
            let daily_rate = current.div_ceil(days_elapsed) as f64;
            estimate_days_to_significance(current, daily_rate, required)
        });

        let progress = match required {
            Some(required) if required > 0 => {
                round_to((current as f64 / required as f64 * 100.0).min(100.0), 1)
            }
            _ => 0.0,
        };

        SampleSizeProgress {
            required,
            current,
            remaining: required.map_or(0, |r| r.saturating_sub(current)),
            days_remaining,
            progress,
        }
    }

    async fn dashboard_metrics(&self, tenant_id: &TenantId) -> Result<DashboardMetrics, DomainError> {
        let now = self.clock.now();
        let mut metrics = DashboardMetrics::default();
        let mut total_conversions = 0u64;
        let mut completion_days = Vec::new();

        for (experiment, variants) in self.load_tenant(tenant_id, None).await? {
            let totals = Totals::of(&variants);
            metrics.total_visitors += totals.visitors;
            total_conversions += totals.conversions;

            if has_winner(&experiment, &variants, &totals) {
                metrics.experiments_with_winner += 1;
            }

            match experiment.status() {
                ExperimentStatus::Active => metrics.active_experiments += 1,
                ExperimentStatus::Completed => {
                    metrics.completed_experiments += 1;
                    completion_days.push(experiment.days_running(now).max(0) as u64);
                }
                ExperimentStatus::Draft | ExperimentStatus::Paused => {}
            }
        }

        if metrics.total_visitors > 0 {
            metrics.avg_conversion_rate = round_to(
                total_conversions as f64 / metrics.total_visitors as f64 * 100.0,
                2,
            );
        }

        if !completion_days.is_empty() {
            let mean = completion_days.iter().sum::<u64>() as f64 / completion_days.len() as f64;
            metrics.avg_days_to_significance = mean.round() as u64;
        }

        Ok(metrics)
    }
}

// ============================================================================
// Helpers
// ============================================================================

struct Totals {
    visitors: u64,
    conversions: u64,
    revenue: f64,
}

impl Totals {
    fn of(variants: &[Variant]) -> Self {
        Self {
            visitors: variants.iter().map(Variant::visitors).sum(),
            conversions: variants.iter().map(Variant::conversions).sum(),
            revenue: variants.iter().map(Variant::revenue).sum(),
        }
    }

    fn rate(&self) -> f64 {
        if self.visitors == 0 {
            0.0
        } else {
            self.conversions as f64 / self.visitors as f64
        }
    }

    fn rate_percent(&self) -> f64 {
        self.rate() * 100.0
    }
}

/// Completed with a recorded winner, or running with a significant leader
fn has_winner(experiment: &Experiment, variants: &[Variant], totals: &Totals) -> bool {
    if experiment.status() == ExperimentStatus::Completed && experiment.winner_variant().is_some() {
        return true;
    }
    if variants.len() < 2 || totals.visitors == 0 {
        return false;
    }

    let counts: Vec<VariantCounts> = variants.iter().map(VariantCounts::from).collect();
    analyze_experiment(&counts, experiment.confidence_threshold()).has_winner()
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
