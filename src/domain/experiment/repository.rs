//! Experiment repository traits and query types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

use super::assignment::Assignment;
use super::entity::{
    Experiment, ExperimentId, ExperimentStatus, ExposureId, MachineName, TenantId, Variant,
    VariantId, VisitorId,
};
use super::exposure::Exposure;
use super::result::ExperimentResult;
use crate::domain::DomainError;

// ============================================================================
// ExperimentQuery
// ============================================================================

/// Query parameters for listing experiments
#[derive(Debug, Clone, Default)]
pub struct ExperimentQuery {
    /// Filter by owning tenant
    pub tenant_id: Option<TenantId>,
    /// Filter by slot
    pub machine_name: Option<MachineName>,
    /// Filter by status
    pub status: Option<ExperimentStatus>,
    /// Maximum number of results
    pub limit: Option<usize>,
    /// Number of results to skip
    pub offset: Option<usize>,
}

impl ExperimentQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_machine_name(mut self, machine_name: MachineName) -> Self {
        self.machine_name = Some(machine_name);
        self
    }

    pub fn with_status(mut self, status: ExperimentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Check whether an experiment satisfies the filters (pagination excluded)
    pub fn matches(&self, experiment: &Experiment) -> bool {
        self.tenant_id
            .as_ref()
            .is_none_or(|t| experiment.tenant_id() == t)
            && self
                .machine_name
                .as_ref()
                .is_none_or(|m| experiment.machine_name() == m)
            && self.status.is_none_or(|s| experiment.status() == s)
    }
}

// ============================================================================
// ExposureQuery
// ============================================================================

/// Query parameters for exposures of one experiment
#[derive(Debug, Clone)]
pub struct ExposureQuery {
    /// Experiment whose exposures are listed
    pub experiment_id: ExperimentId,
    /// Filter by variant
    pub variant_id: Option<VariantId>,
    /// Maximum number of results
    pub limit: Option<usize>,
    /// Number of results to skip
    pub offset: Option<usize>,
}

impl ExposureQuery {
    pub fn for_experiment(experiment_id: ExperimentId) -> Self {
        Self {
            experiment_id,
            variant_id: None,
            limit: None,
            offset: None,
        }
    }

    pub fn with_variant(mut self, variant_id: VariantId) -> Self {
        self.variant_id = Some(variant_id);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

// ============================================================================
// ExperimentRepository
// ============================================================================

/// Repository trait for experiments
#[async_trait]
pub trait ExperimentRepository: Send + Sync + Debug {
    /// Create a new experiment
    ///
    /// Conflicts if the ID exists, or if the experiment is active and its
    /// slot already holds an active experiment.
    async fn create(&self, experiment: Experiment) -> Result<Experiment, DomainError>;

    /// Get an experiment by ID
    async fn get(&self, id: &ExperimentId) -> Result<Option<Experiment>, DomainError>;

    /// Get several experiments, silently skipping unknown IDs
    async fn get_many(&self, ids: &[ExperimentId]) -> Result<Vec<Experiment>, DomainError>;

    /// List IDs matching the query, newest first
    async fn query_ids(&self, query: &ExperimentQuery) -> Result<Vec<ExperimentId>, DomainError>;

    /// Replace an experiment whose stored status is still `expected`
    ///
    /// Conflicts when the stored status differs, or when the write would
    /// leave two active experiments in one (tenant, machine name) slot.
    async fn update(
        &self,
        experiment: Experiment,
        expected: ExperimentStatus,
    ) -> Result<Experiment, DomainError>;
}

// ============================================================================
// VariantRepository
// ============================================================================

/// Repository trait for variants and their counters
///
/// Counter updates happen inside the repository so concurrent callers
/// never lose increments.
#[async_trait]
pub trait VariantRepository: Send + Sync + Debug {
    /// Create a variant; conflicts if the ID exists within its experiment
    async fn create(&self, variant: Variant) -> Result<Variant, DomainError>;

    /// Get a variant of a specific experiment
    async fn get(
        &self,
        experiment_id: &ExperimentId,
        variant_id: &VariantId,
    ) -> Result<Option<Variant>, DomainError>;

    /// List variants of an experiment in creation order
    async fn list_for_experiment(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<Vec<Variant>, DomainError>;

    /// Atomically add one visitor
    async fn increment_visitors(
        &self,
        experiment_id: &ExperimentId,
        variant_id: &VariantId,
    ) -> Result<(), DomainError>;

    /// Atomically add one conversion and its value; false if it would exceed visitors
    async fn record_conversion(
        &self,
        experiment_id: &ExperimentId,
        variant_id: &VariantId,
        value: f64,
    ) -> Result<bool, DomainError>;
}

// ============================================================================
// AssignmentRepository
// ============================================================================

/// Repository trait for visitor assignments
#[async_trait]
pub trait AssignmentRepository: Send + Sync + Debug {
    /// Insert an assignment; fails with `Conflict` if the pair already exists
    async fn create(&self, assignment: Assignment) -> Result<Assignment, DomainError>;

    /// Get the assignment of a visitor
    async fn get(
        &self,
        experiment_id: &ExperimentId,
        visitor_id: &VisitorId,
    ) -> Result<Option<Assignment>, DomainError>;

    /// Mark converted; false if missing or already converted
    async fn mark_converted(
        &self,
        experiment_id: &ExperimentId,
        visitor_id: &VisitorId,
        at: DateTime<Utc>,
    ) -> Result<bool, DomainError>;

    /// Reset the conversion mark; false if missing or not converted
    async fn clear_conversion(
        &self,
        experiment_id: &ExperimentId,
        visitor_id: &VisitorId,
    ) -> Result<bool, DomainError>;

    /// Delete an assignment; false if missing
    async fn remove(
        &self,
        experiment_id: &ExperimentId,
        visitor_id: &VisitorId,
    ) -> Result<bool, DomainError>;
}

// ============================================================================
// ExposureRepository
// ============================================================================

/// Repository trait for exposures
#[async_trait]
pub trait ExposureRepository: Send + Sync + Debug {
    /// Store a new exposure
    async fn create(&self, exposure: Exposure) -> Result<Exposure, DomainError>;

    /// List exposures ordered by `exposed_at`, then ID
    async fn query(&self, query: &ExposureQuery) -> Result<Vec<Exposure>, DomainError>;

    /// Count exposures of an experiment
    async fn count(&self, experiment_id: &ExperimentId) -> Result<u64, DomainError>;

    /// Most recent exposure of a visitor
    async fn latest_for_visitor(
        &self,
        experiment_id: &ExperimentId,
        visitor_id: &VisitorId,
    ) -> Result<Option<Exposure>, DomainError>;

    /// Mark an exposure converted; false if missing or already converted
    async fn mark_converted(
        &self,
        id: &ExposureId,
        value: Option<f64>,
        at: DateTime<Utc>,
    ) -> Result<bool, DomainError>;
}

// ============================================================================
// ResultRepository
// ============================================================================

/// Repository trait for result snapshots (one per experiment)
#[async_trait]
pub trait ResultRepository: Send + Sync + Debug {
    async fn get(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<Option<ExperimentResult>, DomainError>;

    /// Store a snapshot, replacing any previous one
    async fn save(&self, result: ExperimentResult) -> Result<(), DomainError>;
}
