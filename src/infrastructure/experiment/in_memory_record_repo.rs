//! In-memory implementations of the assignment, exposure and result repositories

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::experiment::{
    Assignment, AssignmentRepository, ExperimentId, ExperimentResult, Exposure, ExposureId,
    ExposureQuery, ExposureRepository, ResultRepository, VisitorId,
};
use crate::domain::DomainError;

// ============================================================================
// InMemoryAssignmentRepository
// ============================================================================

/// In-memory assignment store with a uniqueness constraint per (experiment, visitor)
#[derive(Debug, Default)]
pub struct InMemoryAssignmentRepository {
    assignments: RwLock<HashMap<(ExperimentId, VisitorId), Assignment>>,
}

impl InMemoryAssignmentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored assignments
    pub fn len(&self) -> usize {
        self.assignments.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AssignmentRepository for InMemoryAssignmentRepository {
    async fn create(&self, assignment: Assignment) -> Result<Assignment, DomainError> {
        let mut assignments = self
            .assignments
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        let key = (
            assignment.experiment_id().clone(),
            assignment.visitor_id().clone(),
        );

        match assignments.entry(key) {
            Entry::Occupied(_) => Err(DomainError::conflict(format!(
                "Visitor '{}' is already assigned in experiment '{}'",
                assignment.visitor_id(),
                assignment.experiment_id()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(assignment.clone());
                Ok(assignment)
            }
        }
    }

    async fn get(
        &self,
        experiment_id: &ExperimentId,
        visitor_id: &VisitorId,
    ) -> Result<Option<Assignment>, DomainError> {
        let assignments = self
            .assignments
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(assignments
            .get(&(experiment_id.clone(), visitor_id.clone()))
            .cloned())
    }

    async fn mark_converted(
        &self,
        experiment_id: &ExperimentId,
        visitor_id: &VisitorId,
        at: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        let mut assignments = self
            .assignments
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        Ok(assignments
            .get_mut(&(experiment_id.clone(), visitor_id.clone()))
            .is_some_and(|a| a.mark_converted(at)))
    }

    async fn clear_conversion(
        &self,
        experiment_id: &ExperimentId,
        visitor_id: &VisitorId,
    ) -> Result<bool, DomainError> {
        let mut assignments = self
            .assignments
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        Ok(assignments
            .get_mut(&(experiment_id.clone(), visitor_id.clone()))
            .is_some_and(Assignment::clear_conversion))
    }

    async fn remove(
        &self,
        experiment_id: &ExperimentId,
        visitor_id: &VisitorId,
    ) -> Result<bool, DomainError> {
        let mut assignments = self
            .assignments
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        Ok(assignments
            .remove(&(experiment_id.clone(), visitor_id.clone()))
            .is_some())
    }
}

// ============================================================================
// InMemoryExposureRepository
// ============================================================================

/// In-memory exposure store
#[derive(Debug, Default)]
pub struct InMemoryExposureRepository {
    exposures: RwLock<HashMap<ExposureId, Exposure>>,
}

impl InMemoryExposureRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository with initial exposures
    pub fn with_exposures(exposures: Vec<Exposure>) -> Self {
        let map = exposures.into_iter().map(|e| (e.id(), e)).collect();
        Self {
            exposures: RwLock::new(map),
        }
    }
}

#[async_trait]
impl ExposureRepository for InMemoryExposureRepository {
    async fn create(&self, exposure: Exposure) -> Result<Exposure, DomainError> {
        let mut exposures = self
            .exposures
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        if exposures.contains_key(&exposure.id()) {
            return Err(DomainError::conflict(format!(
                "Exposure '{}' already exists",
                exposure.id()
            )));
        }

        exposures.insert(exposure.id(), exposure.clone());
        Ok(exposure)
    }

    async fn query(&self, query: &ExposureQuery) -> Result<Vec<Exposure>, DomainError> {
        let exposures = self
            .exposures
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        let mut results: Vec<&Exposure> = exposures
            .values()
            .filter(|e| e.experiment_id() == &query.experiment_id)
            .filter(|e| {
                query
                    .variant_id
                    .as_ref()
                    .is_none_or(|v| e.variant_id() == v)
            })
            .collect();

        results.sort_by(|a, b| {
            a.exposed_at()
                .cmp(&b.exposed_at())
                .then_with(|| a.id().cmp(&b.id()))
        });

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);

        Ok(results
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self, experiment_id: &ExperimentId) -> Result<u64, DomainError> {
        let exposures = self
            .exposures
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(exposures
            .values()
            .filter(|e| e.experiment_id() == experiment_id)
            .count() as u64)
    }

    async fn latest_for_visitor(
        &self,
        experiment_id: &ExperimentId,
        visitor_id: &VisitorId,
    ) -> Result<Option<Exposure>, DomainError> {
        let exposures = self
            .exposures
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(exposures
            .values()
            .filter(|e| e.experiment_id() == experiment_id && e.visitor_id() == visitor_id)
            .max_by(|a, b| {
                a.exposed_at()
                    .cmp(&b.exposed_at())
                    .then_with(|| a.id().cmp(&b.id()))
            })
            .cloned())
    }

    async fn mark_converted(
        &self,
        id: &ExposureId,
        value: Option<f64>,
        at: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        let mut exposures = self
            .exposures
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        Ok(exposures
            .get_mut(id)
            .is_some_and(|e| e.mark_converted(value, at)))
    }
}

// ============================================================================
// InMemoryResultRepository
// ============================================================================

/// In-memory result store holding the latest snapshot per experiment
#[derive(Debug, Default)]
pub struct InMemoryResultRepository {
    results: RwLock<HashMap<ExperimentId, ExperimentResult>>,
}

impl InMemoryResultRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultRepository for InMemoryResultRepository {
    async fn get(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<Option<ExperimentResult>, DomainError> {
        let results = self
            .results
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(results.get(experiment_id).cloned())
    }

    async fn save(&self, result: ExperimentResult) -> Result<(), DomainError> {
        let mut results = self
            .results
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        results.insert(result.experiment_id.clone(), result);
        Ok(())
    }
}
