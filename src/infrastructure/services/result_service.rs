//! Result calculation service
//!
//! Turns the exposure log of an experiment into a statistics snapshot,
//! decides whether the experiment may stop on its own and declares winners.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use super::ExperimentRepositories;
use crate::domain::experiment::{
    ExperimentId, ExperimentResult, ExposureQuery, VariantId, VariantResult, VisitorId,
};
use crate::domain::{Clock, DomainError};
use crate::infrastructure::experiment::{
    calculate_minimum_sample_size, calculate_z_score, confidence_interval, lift,
    z_score_to_confidence,
};

#[derive(Default)]
struct VariantTally<'a> {
    visitors: HashSet<&'a VisitorId>,
    converted: HashSet<&'a VisitorId>,
}

/// Service computing experiment results and winners
#[derive(Debug, Clone)]
pub struct ResultCalculationService {
    repositories: ExperimentRepositories,
    clock: Arc<dyn Clock>,
}

impl ResultCalculationService {
    pub fn new(repositories: ExperimentRepositories, clock: Arc<dyn Clock>) -> Self {
        Self {
            repositories,
            clock,
        }
    }

    /// Recompute and store the result snapshot of an experiment
    ///
    /// Returns `None` while the experiment has no exposures.
    pub async fn calculate_results(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<Option<ExperimentResult>, DomainError> {
        let exposures = self
            .repositories
            .exposures
            .query(&ExposureQuery::for_experiment(experiment_id.clone()))
            .await?;

        if exposures.is_empty() {
            info!(experiment_id = %experiment_id, "No exposures yet, skipping result calculation");
            return Ok(None);
        }

        let Some(experiment) = self.repositories.experiments.get(experiment_id).await? else {
            return Err(DomainError::not_found(format!(
                "Experiment '{}' has exposures but no longer exists",
                experiment_id
            )));
        };

        let mut tallies: BTreeMap<&VariantId, VariantTally<'_>> = BTreeMap::new();
        for exposure in &exposures {
            let tally = tallies.entry(exposure.variant_id()).or_default();
            tally.visitors.insert(exposure.visitor_id());
            if exposure.is_converted() {
                tally.converted.insert(exposure.visitor_id());
            }
        }

        let flagged_control = self
            .repositories
            .variants
            .list_for_experiment(experiment_id)
            .await?
            .into_iter()
            .find(|v| v.is_control())
            .map(|v| v.id().clone());

        let control_id = match flagged_control {
            Some(id) if tallies.contains_key(&id) => id,
            _ => match tallies.keys().next() {
                Some(id) => (*id).clone(),
                None => return Ok(None),
            },
        };

        let count = |tally: &VariantTally<'_>| {
            (tally.visitors.len() as u64, tally.converted.len() as u64)
        };
        let (control_visitors, control_conversions) = tallies
            .get(&control_id)
            .map(count)
            .unwrap_or_default();
        let control_rate = rate(control_visitors, control_conversions);
        let threshold_pct = experiment.confidence_threshold() * 100.0;

        let mut rows: Vec<VariantResult> = tallies
            .iter()
            .map(|(variant_id, tally)| {
                let (visitors, conversions) = count(tally);
                let conversion_rate = rate(visitors, conversions);
                let is_control = *variant_id == &control_id;

                let (z_score, confidence, variant_lift) = if is_control {
                    (0.0, 0.0, 0.0)
                } else {
                    let z = calculate_z_score(
                        control_visitors,
                        control_conversions,
                        visitors,
                        conversions,
                    );
                    (
                        z,
                        z_score_to_confidence(z),
                        lift(control_rate, conversion_rate),
                    )
                };

                VariantResult {
                    variant_id: (*variant_id).clone(),
                    is_control,
                    visitors,
                    conversions,
                    conversion_rate,
                    z_score,
                    confidence,
                    lift: variant_lift,
                    confidence_interval: confidence_interval(visitors, conversions),
                    significant: !is_control && confidence >= threshold_pct,
                }
            })
            .collect();
        rows.sort_by_key(|row| !row.is_control);

        let result = ExperimentResult {
            experiment_id: experiment_id.clone(),
            calculated_at: self.clock.now(),
            control_variant_id: control_id,
            variants: rows,
            total_exposures: exposures.len() as u64,
        };

        self.repositories.results.save(result.clone()).await?;

        debug!(
            experiment_id = %experiment_id,
            exposures = result.total_exposures,
            variants = result.variants.len(),
            "Calculated experiment results"
        );

        Ok(Some(result))
    }

    /// Whether the stored result allows the experiment to stop automatically
    ///
    /// A treatment must reach the confidence threshold and both it and the
    /// control must have reached the minimum sample size.
    pub async fn check_auto_stop(&self, experiment_id: &ExperimentId) -> Result<bool, DomainError> {
        Ok(self.evaluate_stop(experiment_id).await?.is_some())
    }

    /// The variant to declare when the experiment may stop automatically
    ///
    /// The qualifying treatment with the highest confidence wins when its
    /// lift is positive; a significant loser hands the win to the control.
    pub async fn auto_stop_winner(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<Option<VariantId>, DomainError> {
        self.evaluate_stop(experiment_id).await
    }

    async fn evaluate_stop(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<Option<VariantId>, DomainError> {
        let Some(result) = self.repositories.results.get(experiment_id).await? else {
            return Ok(None);
        };
        let Some(experiment) = self.repositories.experiments.get(experiment_id).await? else {
            return Ok(None);
        };

        if !experiment.status().is_running() || !experiment.auto_complete() {
            return Ok(None);
        }

        if !experiment.minimum_runtime_elapsed(self.clock.now()) {
            debug!(
                experiment_id = %experiment_id,
                minimum_runtime_days = experiment.minimum_runtime_days(),
                "Minimum runtime not reached"
            );
            return Ok(None);
        }

        let Some(control) = result.control() else {
            return Ok(None);
        };

        let baseline = if control.conversion_rate > 0.0 {
            control.conversion_rate
        } else {
            result.pooled_rate()
        };

        let Some(required) = calculate_minimum_sample_size(
            baseline,
            experiment.minimum_detectable_effect(),
            experiment.confidence_threshold(),
            experiment.power(),
        ) else {
            debug!(
                experiment_id = %experiment_id,
                baseline,
                "Sample size undefined for baseline"
            );
            return Ok(None);
        };

        if control.visitors < required {
            return Ok(None);
        }

        let threshold_pct = experiment.confidence_threshold() * 100.0;
        let best = result
            .treatments()
            .filter(|t| t.confidence >= threshold_pct && t.visitors >= required)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

        Ok(best.map(|treatment| {
            if treatment.lift > 0.0 {
                treatment.variant_id.clone()
            } else {
                control.variant_id.clone()
            }
        }))
    }

    /// Complete an experiment with the given winner
    ///
    /// Returns `false` when the experiment or variant is unknown, or the
    /// experiment cannot move to completed.
    pub async fn declare_winner(
        &self,
        experiment_id: &ExperimentId,
        variant_id: &VariantId,
    ) -> Result<bool, DomainError> {
        let Some(mut experiment) = self.repositories.experiments.get(experiment_id).await? else {
            return Ok(false);
        };

        if self
            .repositories
            .variants
            .get(experiment_id, variant_id)
            .await?
            .is_none()
        {
            debug!(
                experiment_id = %experiment_id,
                variant_id = %variant_id,
                "Winner is not a variant of this experiment"
            );
            return Ok(false);
        }

        let expected = experiment.status();
        if let Err(e) = experiment.complete(variant_id.clone(), self.clock.now()) {
            debug!(experiment_id = %experiment_id, error = %e, "Cannot complete experiment");
            return Ok(false);
        }

        match self.repositories.experiments.update(experiment, expected).await {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                debug!(experiment_id = %experiment_id, error = %e, "Experiment changed before completion");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        info!(
            experiment_id = %experiment_id,
            variant_id = %variant_id,
            "Declared experiment winner"
        );

        Ok(true)
    }
}

fn rate(visitors: u64, conversions: u64) -> f64 {
    if visitors == 0 {
        0.0
    } else {
        conversions as f64 / visitors as f64
    }
}
