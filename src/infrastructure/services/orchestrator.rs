//! Experiment orchestrator
//!
//! Sweeps every active experiment: recompute results, apply the auto-stop
//! rule and declare winners. Experiments are evaluated through a bounded
//! worker pool with a per-experiment timeout; one failure never aborts the
//! sweep.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{ExperimentRepositories, ResultCalculationService};
use crate::domain::experiment::{ExperimentId, ExperimentQuery, ExperimentStatus};
use crate::domain::DomainError;
use crate::infrastructure::observability::record_sweep;

/// Default number of experiments evaluated concurrently
pub const DEFAULT_SWEEP_CONCURRENCY: usize = 4;

/// Default time budget for evaluating one experiment
pub const DEFAULT_EVALUATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Worker pool settings of a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub sweep_concurrency: usize,
    pub evaluation_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            sweep_concurrency: DEFAULT_SWEEP_CONCURRENCY,
            evaluation_timeout: DEFAULT_EVALUATION_TIMEOUT,
        }
    }
}

/// What happened to one experiment during a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationOutcome {
    /// No exposures yet, nothing to judge
    NotReady,
    /// The experiment was completed with a winner
    WinnerDeclared,
    /// Results exist but the stop rule did not fire
    Skipped,
}

/// Totals of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub evaluated: u64,
    pub winners_declared: u64,
    pub skipped: u64,
    pub errors: u64,
}

impl EvaluationSummary {
    fn record(&mut self, outcome: &Result<EvaluationOutcome, DomainError>) {
        self.evaluated += 1;
        match outcome {
            Ok(EvaluationOutcome::NotReady) => {}
            Ok(EvaluationOutcome::WinnerDeclared) => self.winners_declared += 1,
            Ok(EvaluationOutcome::Skipped) => self.skipped += 1,
            Err(_) => self.errors += 1,
        }
    }
}

/// Evaluates all active experiments
#[derive(Debug, Clone)]
pub struct ExperimentOrchestrator {
    repositories: ExperimentRepositories,
    results: Arc<ResultCalculationService>,
    settings: OrchestratorSettings,
}

impl ExperimentOrchestrator {
    pub fn new(
        repositories: ExperimentRepositories,
        results: Arc<ResultCalculationService>,
    ) -> Self {
        Self {
            repositories,
            results,
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> OrchestratorSettings {
        self.settings
    }

    /// Recompute one experiment and declare a winner if the stop rule fires
    pub async fn evaluate_experiment(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<EvaluationOutcome, DomainError> {
        if self.results.calculate_results(experiment_id).await?.is_none() {
            return Ok(EvaluationOutcome::NotReady);
        }

        let Some(winner) = self.results.auto_stop_winner(experiment_id).await? else {
            return Ok(EvaluationOutcome::Skipped);
        };

        if self.results.declare_winner(experiment_id, &winner).await? {
            info!(
                experiment_id = %experiment_id,
                variant_id = %winner,
                "Auto-stopped experiment"
            );
            Ok(EvaluationOutcome::WinnerDeclared)
        } else {
            warn!(
                experiment_id = %experiment_id,
                variant_id = %winner,
                "Stop rule fired but the winner could not be declared"
            );
            Ok(EvaluationOutcome::Skipped)
        }
    }

    /// Evaluate every active experiment and fold the outcomes
    pub async fn evaluate_all(&self) -> EvaluationSummary {
        let query = ExperimentQuery::new().with_status(ExperimentStatus::Active);

        let ids = match self.repositories.experiments.query_ids(&query).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Failed to list active experiments");
                let summary = EvaluationSummary {
                    errors: 1,
                    ..Default::default()
                };
                record_sweep(&summary);
                return summary;
            }
        };

        debug!(
            experiments = ids.len(),
            concurrency = self.settings.sweep_concurrency,
            "Starting evaluation sweep"
        );

        let timeout = self.settings.evaluation_timeout;
        let outcomes: Vec<(ExperimentId, Result<EvaluationOutcome, DomainError>)> =
            stream::iter(ids)
                .map(|experiment_id| async move {
                    let outcome =
                        match tokio::time::timeout(timeout, self.evaluate_experiment(&experiment_id))
                            .await
                        {
                            Ok(outcome) => outcome,
                            Err(_) => Err(DomainError::timeout(format!(
                                "evaluation of '{}' exceeded {}ms",
                                experiment_id,
                                timeout.as_millis()
                            ))),
                        };
                    (experiment_id, outcome)
                })
                .buffer_unordered(self.settings.sweep_concurrency.max(1))
                .collect()
                .await;

        let mut summary = EvaluationSummary::default();
        for (experiment_id, outcome) in &outcomes {
            if let Err(e) = outcome {
                error!(experiment_id = %experiment_id, error = %e, "Experiment evaluation failed");
            }
            summary.record(outcome);
        }

        record_sweep(&summary);

        info!(
            evaluated = summary.evaluated,
            winners_declared = summary.winners_declared,
            skipped = summary.skipped,
            errors = summary.errors,
            "Evaluation sweep finished"
        );

        summary
    }
}
