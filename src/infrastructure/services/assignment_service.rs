//! Variant assignment service
//!
//! Buckets visitors into variants of active experiments and records their
//! conversions. An assignment is written once per (experiment, visitor); the
//! variant's visitor counter is bumped only by the request that wrote it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::ExperimentRepositories;
use crate::domain::experiment::{
    select_variant, Assignment, ExperimentId, MachineName, TenantId, TrafficSplitter, Variant,
    VisitorId,
};
use crate::domain::{Clock, DomainError};
use crate::infrastructure::experiment::ConsistentHasher;
use crate::infrastructure::observability::{record_assignment, record_conversion};

/// Service assigning visitors to variants and recording conversions
#[derive(Debug, Clone)]
pub struct AssignmentService {
    repositories: ExperimentRepositories,
    clock: Arc<dyn Clock>,
    splitter: Arc<dyn TrafficSplitter>,
}

impl AssignmentService {
    /// Create a service using deterministic hash-based splitting
    pub fn new(repositories: ExperimentRepositories, clock: Arc<dyn Clock>) -> Self {
        Self {
            repositories,
            clock,
            splitter: Arc::new(ConsistentHasher),
        }
    }

    pub fn with_splitter(mut self, splitter: Arc<dyn TrafficSplitter>) -> Self {
        self.splitter = splitter;
        self
    }

    /// Get the visitor's variant, assigning one on first sight
    ///
    /// Returns `None` when the experiment is unknown, not active, or has no
    /// variants. A visitor that already holds an assignment keeps it.
    pub async fn assign_variant(
        &self,
        experiment_id: &ExperimentId,
        visitor_id: &VisitorId,
    ) -> Result<Option<Variant>, DomainError> {
        if let Some(existing) = self
            .repositories
            .assignments
            .get(experiment_id, visitor_id)
            .await?
        {
            return self
                .repositories
                .variants
                .get(experiment_id, existing.variant_id())
                .await;
        }

        let Some(experiment) = self.repositories.experiments.get(experiment_id).await? else {
            debug!(experiment_id = %experiment_id, "Assignment skipped: unknown experiment");
            return Ok(None);
        };

        if !experiment.status().is_running() {
            debug!(
                experiment_id = %experiment_id,
                status = %experiment.status(),
                "Assignment skipped: experiment is not active"
            );
            return Ok(None);
        }

        let variants = self
            .repositories
            .variants
            .list_for_experiment(experiment_id)
            .await?;

        let roll = self.splitter.sample(experiment_id, visitor_id);
        let Some(chosen) = select_variant(&variants, roll) else {
            warn!(experiment_id = %experiment_id, "Active experiment has no variants");
            return Ok(None);
        };

        let assignment = Assignment::new(
            experiment_id.clone(),
            visitor_id.clone(),
            chosen.id().clone(),
            self.clock.now(),
        );

        match self.repositories.assignments.create(assignment).await {
            Ok(_) => {
                if let Err(e) = self
                    .repositories
                    .variants
                    .increment_visitors(experiment_id, chosen.id())
                    .await
                {
                    self.release_assignment(experiment_id, visitor_id).await;
                    return Err(e);
                }
                record_assignment(experiment_id.as_str(), chosen.id().as_str());

                debug!(
                    experiment_id = %experiment_id,
                    visitor_id = %visitor_id,
                    variant_id = %chosen.id(),
                    "Assigned visitor to variant"
                );

                let mut variant = chosen.clone();
                variant.record_visitor();
                Ok(Some(variant))
            }
            Err(e) if e.is_conflict() => {
                debug!(
                    experiment_id = %experiment_id,
                    visitor_id = %visitor_id,
                    "Concurrent assignment won; reading stored variant"
                );

                let stored = self
                    .repositories
                    .assignments
                    .get(experiment_id, visitor_id)
                    .await?
                    .ok_or_else(|| {
                        DomainError::internal(format!(
                            "Assignment for '{}' in '{}' vanished after conflict",
                            visitor_id, experiment_id
                        ))
                    })?;

                self.repositories
                    .variants
                    .get(experiment_id, stored.variant_id())
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Assign a visitor within the active experiment of a tenant's slot
    pub async fn assign_by_machine_name(
        &self,
        tenant_id: &TenantId,
        machine_name: &MachineName,
        visitor_id: &VisitorId,
    ) -> Result<Option<Variant>, DomainError> {
        match self
            .repositories
            .active_for_slot(tenant_id, machine_name)
            .await?
        {
            Some(experiment) => self.assign_variant(experiment.id(), visitor_id).await,
            None => {
                debug!(
                    tenant_id = %tenant_id,
                    machine_name = %machine_name,
                    "No active experiment for slot"
                );
                Ok(None)
            }
        }
    }

    /// Record a conversion for a previously assigned visitor
    ///
    /// Returns `true` only when the conversion is newly recorded. Visitors
    /// without an assignment are never assigned here.
    pub async fn record_conversion(
        &self,
        tenant_id: &TenantId,
        machine_name: &MachineName,
        visitor_id: &VisitorId,
        value: Option<f64>,
    ) -> Result<bool, DomainError> {
        let Some(experiment) = self
            .repositories
            .active_for_slot(tenant_id, machine_name)
            .await?
        else {
            debug!(
                tenant_id = %tenant_id,
                machine_name = %machine_name,
                "Conversion ignored: no active experiment for slot"
            );
            return Ok(false);
        };
        let experiment_id = experiment.id();

        let Some(assignment) = self
            .repositories
            .assignments
            .get(experiment_id, visitor_id)
            .await?
        else {
            debug!(
                experiment_id = %experiment_id,
                visitor_id = %visitor_id,
                "Conversion ignored: visitor has no assignment"
            );
            return Ok(false);
        };

        let now = self.clock.now();

        if !self
            .repositories
            .assignments
            .mark_converted(experiment_id, visitor_id, now)
            .await?
        {
            debug!(
                experiment_id = %experiment_id,
                visitor_id = %visitor_id,
                "Conversion ignored: already converted"
            );
            return Ok(false);
        }

        let amount = value.map(conversion_amount);
        let counted = match self.apply_conversion(&assignment, amount, now).await {
            Ok(counted) => counted,
            Err(e) => {
                self.release_conversion(experiment_id, visitor_id).await;
                return Err(e);
            }
        };

        if !counted {
            warn!(
                experiment_id = %experiment_id,
                variant_id = %assignment.variant_id(),
                "Variant conversion counter already matches its visitors"
            );
        }

        record_conversion(experiment_id.as_str(), assignment.variant_id().as_str());

        info!(
            experiment_id = %experiment_id,
            variant_id = %assignment.variant_id(),
            visitor_id = %visitor_id,
            value = amount.unwrap_or(0.0),
            "Recorded conversion"
        );

        Ok(true)
    }

    /// Mark the visitor's latest exposure and bump the variant counters
    async fn apply_conversion(
        &self,
        assignment: &Assignment,
        amount: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        let experiment_id = assignment.experiment_id();

        if let Some(exposure) = self
            .repositories
            .exposures
            .latest_for_visitor(experiment_id, assignment.visitor_id())
            .await?
        {
            self.repositories
                .exposures
                .mark_converted(&exposure.id(), amount, now)
                .await?;
        }

        self.repositories
            .variants
            .record_conversion(experiment_id, assignment.variant_id(), amount.unwrap_or(0.0))
            .await
    }

    // Rollbacks leave the visitor retryable; failures are only logged

    async fn release_assignment(&self, experiment_id: &ExperimentId, visitor_id: &VisitorId) {
        if let Err(e) = self
            .repositories
            .assignments
            .remove(experiment_id, visitor_id)
            .await
        {
            error!(
                experiment_id = %experiment_id,
                visitor_id = %visitor_id,
                error = %e,
                "Failed to remove uncounted assignment"
            );
        }
    }

    async fn release_conversion(&self, experiment_id: &ExperimentId, visitor_id: &VisitorId) {
        if let Err(e) = self
            .repositories
            .assignments
            .clear_conversion(experiment_id, visitor_id)
            .await
        {
            error!(
                experiment_id = %experiment_id,
                visitor_id = %visitor_id,
                error = %e,
                "Failed to clear uncounted conversion"
            );
        }
    }
}

/// Revenue counted for a conversion value; negative and non-finite count as 0
fn conversion_amount(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}
