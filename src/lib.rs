//! Experiment Engine
//!
//! A/B testing engine with support for:
//! - Deterministic, sticky variant assignment
//! - Exposure and conversion tracking
//! - Two-proportion z-tests, sample size planning and auto-stop
//! - Concurrent evaluation sweeps and dashboard reporting

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;
use std::time::Duration;

use config::EngineConfig;
use domain::{Clock, SystemClock};
use infrastructure::services::{
    AssignmentService, ExperimentAggregator, ExperimentOrchestrator, ExperimentRepositories,
    ExperimentService, ExposureService, ResultCalculationService, SweepScheduler,
};

/// All experiment services wired over one set of repositories
#[derive(Debug, Clone)]
pub struct Engine {
    pub repositories: ExperimentRepositories,
    pub experiments: ExperimentService,
    pub assignments: AssignmentService,
    pub exposures: ExposureService,
    pub results: Arc<ResultCalculationService>,
    pub orchestrator: Arc<ExperimentOrchestrator>,
    pub aggregator: ExperimentAggregator,
}

impl Engine {
    /// Scheduler running the orchestrator every `interval`
    pub fn scheduler(&self, interval: Duration) -> SweepScheduler {
        SweepScheduler::new(self.orchestrator.clone(), interval)
    }
}

/// Create an engine over empty in-memory stores and the system clock
pub fn create_engine(config: &AppConfig) -> Engine {
    create_engine_with(
        ExperimentRepositories::in_memory(),
        Arc::new(SystemClock),
        &config.engine,
    )
}

/// Create an engine over the given stores and clock
pub fn create_engine_with(
    repositories: ExperimentRepositories,
    clock: Arc<dyn Clock>,
    config: &EngineConfig,
) -> Engine {
    let results = Arc::new(ResultCalculationService::new(
        repositories.clone(),
        clock.clone(),
    ));
    let orchestrator = Arc::new(
        ExperimentOrchestrator::new(repositories.clone(), results.clone())
            .with_settings(config.orchestrator_settings()),
    );

    Engine {
        experiments: ExperimentService::new(repositories.clone(), clock.clone())
            .with_defaults(config.experiment_defaults()),
        assignments: AssignmentService::new(repositories.clone(), clock.clone()),
        exposures: ExposureService::new(repositories.clone(), clock.clone()),
        aggregator: ExperimentAggregator::new(repositories.clone(), results.clone(), clock),
        results,
        orchestrator,
        repositories,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    use domain::experiment::{ExperimentType, PrimaryMetric};
    use domain::{ExperimentStatus, FixedClock, MachineName, TenantId, VisitorId};
    use infrastructure::services::{CreateExperimentRequest, CreateVariantRequest};

    fn request() -> CreateExperimentRequest {
        CreateExperimentRequest {
            id: "checkout-button".to_string(),
            tenant_id: "acme".to_string(),
            machine_name: "checkout_button".to_string(),
            name: "Checkout button copy".to_string(),
            hypothesis: None,
            experiment_type: ExperimentType::Cta,
            primary_metric: PrimaryMetric::ConversionRate,
            minimum_detectable_effect: Some(1.0),
            confidence_threshold: None,
            power: None,
            auto_complete: None,
            minimum_runtime_days: 1,
            variants: vec![
                CreateVariantRequest {
                    id: "control".to_string(),
                    label: "Buy now".to_string(),
                    traffic: 50,
                    control: true,
                },
                CreateVariantRequest {
                    id: "urgent".to_string(),
                    label: "Buy now, 2 left".to_string(),
                    traffic: 50,
                    control: false,
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_full_experiment_lifecycle() {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
        ));
        let engine = create_engine_with(
            ExperimentRepositories::in_memory(),
            clock.clone(),
            &EngineConfig::default(),
        );
        let tenant = TenantId::new("acme").unwrap();
        let slot = MachineName::new("checkout_button").unwrap();

        let experiment = engine.experiments.create(request()).await.unwrap();
        engine.experiments.start("checkout-button").await.unwrap();

        for i in 0..2000 {
            let visitor = VisitorId::new(format!("visitor-{i}")).unwrap();
            let variant = engine
                .assignments
                .assign_by_machine_name(&tenant, &slot, &visitor)
                .await
                .unwrap()
                .unwrap();
            engine
                .exposures
                .record_exposure(experiment.id(), variant.id(), &visitor)
                .await
                .unwrap();

            // urgent converts every 5th visitor, control every 20th
            let converts = if variant.id().as_str() == "urgent" {
                i % 5 == 0
            } else {
                i % 20 == 0
            };
            if converts {
                assert!(
                    engine
                        .assignments
                        .record_conversion(&tenant, &slot, &visitor, Some(10.0))
                        .await
                        .unwrap()
                );
            }
        }

        // Minimum runtime of one day not yet reached
        let first = engine.orchestrator.evaluate_all().await;
        assert_eq!(first.evaluated, 1);
        assert_eq!(first.winners_declared, 0);
        assert_eq!(first.skipped, 1);

        clock.advance(ChronoDuration::days(2));
        let second = engine.orchestrator.evaluate_all().await;
        assert_eq!(second.winners_declared, 1);

        let completed = engine.experiments.get("checkout-button").await.unwrap().unwrap();
        assert_eq!(completed.status(), ExperimentStatus::Completed);
        assert_eq!(
            completed.winner_variant().map(|v| v.as_str()),
            Some("urgent")
        );

        let metrics = engine.aggregator.get_dashboard_metrics(&tenant).await;
        assert_eq!(metrics.completed_experiments, 1);
        assert_eq!(metrics.total_visitors, 2000);
        assert_eq!(metrics.avg_days_to_significance, 2);

        let unassigned = engine
            .assignments
            .assign_by_machine_name(&tenant, &slot, &VisitorId::new("late").unwrap())
            .await
            .unwrap();
        assert!(unassigned.is_none());
    }

    #[test]
    fn test_create_engine_from_default_config() {
        let engine = create_engine(&AppConfig::default());
        assert_eq!(engine.orchestrator.settings().sweep_concurrency, 4);
    }
}
