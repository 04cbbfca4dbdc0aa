//! Experiment administration service
//!
//! Creates experiments with their variants and drives the lifecycle
//! transitions, enforcing that a tenant's machine-name slot holds at most
//! one active experiment.

use std::sync::Arc;

use tracing::{debug, info};

use super::ExperimentRepositories;
use crate::domain::experiment::{
    validate_variant_set, Experiment, ExperimentId, ExperimentQuery, ExperimentType, MachineName,
    PrimaryMetric, TenantId, Variant, VariantId, DEFAULT_CONFIDENCE_THRESHOLD,
    DEFAULT_MINIMUM_DETECTABLE_EFFECT, DEFAULT_POWER,
};
use crate::domain::{Clock, DomainError};

// ============================================================================
// Request Types
// ============================================================================

/// Request to create a new experiment
#[derive(Debug, Clone)]
pub struct CreateExperimentRequest {
    pub id: String,
    pub tenant_id: String,
    pub machine_name: String,
    pub name: String,
    pub hypothesis: Option<String>,
    pub experiment_type: ExperimentType,
    pub primary_metric: PrimaryMetric,
    pub minimum_detectable_effect: Option<f64>,
    pub confidence_threshold: Option<f64>,
    pub power: Option<f64>,
    pub auto_complete: Option<bool>,
    pub minimum_runtime_days: u32,
    pub variants: Vec<CreateVariantRequest>,
}

/// Request to create a new variant
#[derive(Debug, Clone)]
pub struct CreateVariantRequest {
    pub id: String,
    pub label: String,
    pub traffic: u8,
    pub control: bool,
}

/// Statistical settings applied when a request leaves them unset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExperimentDefaults {
    pub minimum_detectable_effect: f64,
    pub confidence_threshold: f64,
    pub power: f64,
}

impl Default for ExperimentDefaults {
    fn default() -> Self {
        Self {
            minimum_detectable_effect: DEFAULT_MINIMUM_DETECTABLE_EFFECT,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            power: DEFAULT_POWER,
        }
    }
}

// ============================================================================
// Experiment Service
// ============================================================================

/// Service for managing A/B testing experiments
#[derive(Debug, Clone)]
pub struct ExperimentService {
    repositories: ExperimentRepositories,
    clock: Arc<dyn Clock>,
    defaults: ExperimentDefaults,
}

impl ExperimentService {
    /// Create a new experiment service
    pub fn new(repositories: ExperimentRepositories, clock: Arc<dyn Clock>) -> Self {
        Self {
            repositories,
            clock,
            defaults: ExperimentDefaults::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: ExperimentDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Get an experiment by ID
    pub async fn get(&self, id: &str) -> Result<Option<Experiment>, DomainError> {
        let experiment_id = parse_id(id)?;
        self.repositories.experiments.get(&experiment_id).await
    }

    /// List experiments matching the query, newest first
    pub async fn list(&self, query: &ExperimentQuery) -> Result<Vec<Experiment>, DomainError> {
        let ids = self.repositories.experiments.query_ids(query).await?;
        self.repositories.experiments.get_many(&ids).await
    }

    /// Variants of an experiment in creation order
    pub async fn variants(&self, id: &str) -> Result<Vec<Variant>, DomainError> {
        let experiment_id = parse_id(id)?;
        self.repositories
            .variants
            .list_for_experiment(&experiment_id)
            .await
    }

    /// The active experiment in a tenant's slot
    pub async fn find_active(
        &self,
        tenant_id: &str,
        machine_name: &str,
    ) -> Result<Option<Experiment>, DomainError> {
        let tenant_id = TenantId::new(tenant_id)?;
        let machine_name = MachineName::new(machine_name)?;
        self.repositories
            .active_for_slot(&tenant_id, &machine_name)
            .await
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create a draft experiment together with its variants
    pub async fn create(
        &self,
        request: CreateExperimentRequest,
    ) -> Result<Experiment, DomainError> {
        debug!(experiment_id = %request.id, "Creating experiment");

        let experiment_id = parse_id(&request.id)?;
        let tenant_id = TenantId::new(&request.tenant_id)?;
        let machine_name = MachineName::new(&request.machine_name)?;

        if request.name.trim().is_empty() {
            return Err(DomainError::validation("Experiment name cannot be empty"));
        }

        if self
            .repositories
            .experiments
            .get(&experiment_id)
            .await?
            .is_some()
        {
            return Err(DomainError::conflict(format!(
                "Experiment '{}' already exists",
                request.id
            )));
        }

        let mut experiment = Experiment::new(
            experiment_id.clone(),
            tenant_id,
            machine_name,
            request.name.trim(),
            self.clock.now(),
        )
        .with_type(request.experiment_type)
        .with_primary_metric(request.primary_metric)
        .with_minimum_detectable_effect(
            request
                .minimum_detectable_effect
                .unwrap_or(self.defaults.minimum_detectable_effect),
        )
        .with_confidence_threshold(
            request
                .confidence_threshold
                .unwrap_or(self.defaults.confidence_threshold),
        )
        .with_power(request.power.unwrap_or(self.defaults.power))
        .with_auto_complete(request.auto_complete.unwrap_or(true))
        .with_minimum_runtime_days(request.minimum_runtime_days);

        if let Some(hypothesis) = request.hypothesis {
            experiment = experiment.with_hypothesis(hypothesis);
        }

        experiment.validate_settings()?;

        let variants = request
            .variants
            .iter()
            .map(|v| build_variant(&experiment_id, v))
            .collect::<Result<Vec<_>, _>>()?;
        validate_variant_set(&variants)?;

        let created = self.repositories.experiments.create(experiment).await?;
        for variant in variants {
            self.repositories.variants.create(variant).await?;
        }

        info!(
            experiment_id = %created.id(),
            tenant_id = %created.tenant_id(),
            machine_name = %created.machine_name(),
            "Created experiment"
        );

        Ok(created)
    }

    // ========================================================================
    // Lifecycle Operations
    // ========================================================================

    /// Start a draft experiment
    pub async fn start(&self, id: &str) -> Result<Experiment, DomainError> {
        let mut experiment = self.require(id).await?;

        let variants = self
            .repositories
            .variants
            .list_for_experiment(experiment.id())
            .await?;
        validate_variant_set(&variants)?;
        experiment.validate_settings()?;

        self.ensure_slot_free(&experiment).await?;

        let expected = experiment.status();
        experiment.start(self.clock.now())?;
        let updated = self
            .repositories
            .experiments
            .update(experiment, expected)
            .await?;

        info!(experiment_id = %updated.id(), "Started experiment");
        Ok(updated)
    }

    /// Pause an active experiment
    pub async fn pause(&self, id: &str) -> Result<Experiment, DomainError> {
        let mut experiment = self.require(id).await?;

        let expected = experiment.status();
        experiment.pause(self.clock.now())?;
        let updated = self
            .repositories
            .experiments
            .update(experiment, expected)
            .await?;

        info!(experiment_id = %updated.id(), "Paused experiment");
        Ok(updated)
    }

    /// Resume a paused experiment
    pub async fn resume(&self, id: &str) -> Result<Experiment, DomainError> {
        let mut experiment = self.require(id).await?;

        self.ensure_slot_free(&experiment).await?;

        let expected = experiment.status();
        experiment.resume(self.clock.now())?;
        let updated = self
            .repositories
            .experiments
            .update(experiment, expected)
            .await?;

        info!(experiment_id = %updated.id(), "Resumed experiment");
        Ok(updated)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn require(&self, id: &str) -> Result<Experiment, DomainError> {
        let experiment_id = parse_id(id)?;
        self.repositories
            .experiments
            .get(&experiment_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Experiment '{}' not found", id)))
    }

    async fn ensure_slot_free(&self, experiment: &Experiment) -> Result<(), DomainError> {
        let occupant = self
            .repositories
            .active_for_slot(experiment.tenant_id(), experiment.machine_name())
            .await?;

        match occupant {
            Some(other) if other.id() != experiment.id() => Err(DomainError::conflict(format!(
                "Experiment '{}' is already active for '{}'",
                other.id(),
                experiment.machine_name()
            ))),
            _ => Ok(()),
        }
    }
}

fn parse_id(id: &str) -> Result<ExperimentId, DomainError> {
    ExperimentId::new(id).map_err(DomainError::from)
}

fn build_variant(
    experiment_id: &ExperimentId,
    request: &CreateVariantRequest,
) -> Result<Variant, DomainError> {
    let variant_id = VariantId::new(&request.id)?;

    if request.label.trim().is_empty() {
        return Err(DomainError::validation(format!(
            "Variant '{}' must have a label",
            request.id
        )));
    }

    Ok(Variant::new(
        variant_id,
        experiment_id.clone(),
        request.label.trim(),
        request.traffic,
    )
    .with_control(request.control))
}
