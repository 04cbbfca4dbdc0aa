//! Infrastructure services

mod aggregator_service;
mod assignment_service;
mod experiment_service;
mod exposure_service;
mod orchestrator;
mod repositories;
mod result_service;
mod scheduler;

#[cfg(test)]
pub(crate) mod test_support;

pub use aggregator_service::{
    DashboardMetrics, ExperimentAggregator, ExperimentDetail, ExperimentOverview,
    ExperimentSummary, FunnelStage, SampleSizeProgress, VariantReport,
};
pub use assignment_service::AssignmentService;
pub use experiment_service::{
    CreateExperimentRequest, CreateVariantRequest, ExperimentDefaults, ExperimentService,
};
pub use exposure_service::{ExposureService, Page};
pub use orchestrator::{
    EvaluationOutcome, EvaluationSummary, ExperimentOrchestrator, OrchestratorSettings,
    DEFAULT_EVALUATION_TIMEOUT, DEFAULT_SWEEP_CONCURRENCY,
};
pub use repositories::ExperimentRepositories;
pub use result_service::ResultCalculationService;
pub use scheduler::{SweepScheduler, DEFAULT_SWEEP_INTERVAL};
