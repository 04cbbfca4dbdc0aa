//! Repository bundle shared by the experiment services

use std::sync::Arc;

use crate::domain::experiment::{
    AssignmentRepository, Experiment, ExperimentQuery, ExperimentRepository, ExperimentStatus,
    ExposureRepository, MachineName, ResultRepository, TenantId, VariantRepository,
};
use crate::domain::DomainError;
use crate::infrastructure::experiment::{
    InMemoryAssignmentRepository, InMemoryExperimentRepository, InMemoryExposureRepository,
    InMemoryResultRepository, InMemoryVariantRepository,
};

/// Storage ports used by the experiment services
#[derive(Debug, Clone)]
pub struct ExperimentRepositories {
    pub experiments: Arc<dyn ExperimentRepository>,
    pub variants: Arc<dyn VariantRepository>,
    pub assignments: Arc<dyn AssignmentRepository>,
    pub exposures: Arc<dyn ExposureRepository>,
    pub results: Arc<dyn ResultRepository>,
}

impl ExperimentRepositories {
    pub fn new(
        experiments: Arc<dyn ExperimentRepository>,
        variants: Arc<dyn VariantRepository>,
        assignments: Arc<dyn AssignmentRepository>,
        exposures: Arc<dyn ExposureRepository>,
        results: Arc<dyn ResultRepository>,
    ) -> Self {
        Self {
            experiments,
            variants,
            assignments,
            exposures,
            results,
        }
    }

    /// Empty in-memory stores
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryExperimentRepository::new()),
            Arc::new(InMemoryVariantRepository::new()),
            Arc::new(InMemoryAssignmentRepository::new()),
            Arc::new(InMemoryExposureRepository::new()),
            Arc::new(InMemoryResultRepository::new()),
        )
    }

    pub fn with_exposures(mut self, exposures: Arc<dyn ExposureRepository>) -> Self {
        self.exposures = exposures;
        self
    }

    /// The active experiment occupying a tenant's machine-name slot
    pub async fn active_for_slot(
        &self,
        tenant_id: &TenantId,
        machine_name: &MachineName,
    ) -> Result<Option<Experiment>, DomainError> {
        let query = ExperimentQuery::new()
            .with_tenant(tenant_id.clone())
            .with_machine_name(machine_name.clone())
            .with_status(ExperimentStatus::Active)
            .with_limit(1);

        match self.experiments.query_ids(&query).await?.first() {
            Some(id) => self.experiments.get(id).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::services::test_support::{at, seed_experiment};

    #[tokio::test]
    async fn test_active_for_slot() {
        let repos = ExperimentRepositories::in_memory();
        seed_experiment(&repos, "old-hero", "hero", ExperimentStatus::Completed, at(0)).await;
        seed_experiment(&repos, "new-hero", "hero", ExperimentStatus::Active, at(1)).await;
        seed_experiment(&repos, "checkout", "checkout", ExperimentStatus::Active, at(2)).await;

        let found = repos
            .active_for_slot(
                &TenantId::new("acme").unwrap(),
                &MachineName::new("hero").unwrap(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id().as_str(), "new-hero");

        let missing = repos
            .active_for_slot(
                &TenantId::new("globex").unwrap(),
                &MachineName::new("hero").unwrap(),
            )
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
