//! In-memory implementations of the experiment and variant repositories

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::experiment::{
    Experiment, ExperimentId, ExperimentQuery, ExperimentRepository, ExperimentStatus, Variant,
    VariantId, VariantRepository,
};
use crate::domain::DomainError;

// ============================================================================
// InMemoryExperimentRepository
// ============================================================================

/// In-memory experiment repository implementation
#[derive(Debug, Default)]
pub struct InMemoryExperimentRepository {
    experiments: RwLock<HashMap<ExperimentId, Experiment>>,
}

impl InMemoryExperimentRepository {
    /// Create a new empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository with initial experiments
    pub fn with_experiments(experiments: Vec<Experiment>) -> Self {
        let map = experiments
            .into_iter()
            .map(|e| (e.id().clone(), e))
            .collect();

        Self {
            experiments: RwLock::new(map),
        }
    }
}

#[async_trait]
impl ExperimentRepository for InMemoryExperimentRepository {
    async fn create(&self, experiment: Experiment) -> Result<Experiment, DomainError> {
        let mut experiments = self
            .experiments
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        if experiments.contains_key(experiment.id()) {
            return Err(DomainError::conflict(format!(
                "Experiment '{}' already exists",
                experiment.id()
            )));
        }
        ensure_slot_free(&experiments, &experiment)?;

        experiments.insert(experiment.id().clone(), experiment.clone());
        Ok(experiment)
    }

    async fn get(&self, id: &ExperimentId) -> Result<Option<Experiment>, DomainError> {
        let experiments = self
            .experiments
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(experiments.get(id).cloned())
    }

    async fn get_many(&self, ids: &[ExperimentId]) -> Result<Vec<Experiment>, DomainError> {
        let experiments = self
            .experiments
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(ids
            .iter()
            .filter_map(|id| experiments.get(id).cloned())
            .collect())
    }

    async fn query_ids(&self, query: &ExperimentQuery) -> Result<Vec<ExperimentId>, DomainError> {
        let experiments = self
            .experiments
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        let mut matching: Vec<&Experiment> =
            experiments.values().filter(|e| query.matches(e)).collect();

        // Newest first, ID as tie-breaker
        matching.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);

        Ok(matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|e| e.id().clone())
            .collect())
    }

    async fn update(
        &self,
        experiment: Experiment,
        expected: ExperimentStatus,
    ) -> Result<Experiment, DomainError> {
        let mut experiments = self
            .experiments
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        let Some(stored) = experiments.get(experiment.id()) else {
            return Err(DomainError::not_found(format!(
                "Experiment '{}' not found",
                experiment.id()
            )));
        };

        if stored.status() != expected {
            return Err(DomainError::conflict(format!(
                "Experiment '{}' is {} but {} was expected",
                experiment.id(),
                stored.status(),
                expected
            )));
        }
        ensure_slot_free(&experiments, &experiment)?;

        experiments.insert(experiment.id().clone(), experiment.clone());
        Ok(experiment)
    }
}

/// At most one active experiment per (tenant, machine name)
fn ensure_slot_free(
    experiments: &HashMap<ExperimentId, Experiment>,
    experiment: &Experiment,
) -> Result<(), DomainError> {
    if !experiment.status().is_running() {
        return Ok(());
    }

    let occupant = experiments.values().find(|other| {
        other.id() != experiment.id()
            && other.status().is_running()
            && other.tenant_id() == experiment.tenant_id()
            && other.machine_name() == experiment.machine_name()
    });

    match occupant {
        Some(other) => Err(DomainError::conflict(format!(
            "Experiment '{}' is already active for '{}'",
            other.id(),
            experiment.machine_name()
        ))),
        None => Ok(()),
    }
}

// ============================================================================
// InMemoryVariantRepository
// ============================================================================

/// In-memory variant repository; counters are updated under the write lock
#[derive(Debug, Default)]
pub struct InMemoryVariantRepository {
    variants: RwLock<HashMap<ExperimentId, Vec<Variant>>>,
}

impl InMemoryVariantRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository with initial variants, kept in the given order
    pub fn with_variants(variants: Vec<Variant>) -> Self {
        let mut map: HashMap<ExperimentId, Vec<Variant>> = HashMap::new();
        for variant in variants {
            map.entry(variant.experiment_id().clone())
                .or_default()
                .push(variant);
        }

        Self {
            variants: RwLock::new(map),
        }
    }

    fn with_variant_mut<T>(
        &self,
        experiment_id: &ExperimentId,
        variant_id: &VariantId,
        f: impl FnOnce(&mut Variant) -> T,
    ) -> Result<T, DomainError> {
        let mut variants = self
            .variants
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        variants
            .get_mut(experiment_id)
            .and_then(|list| list.iter_mut().find(|v| v.id() == variant_id))
            .map(f)
            .ok_or_else(|| {
                DomainError::not_found(format!(
                    "Variant '{}' of experiment '{}' not found",
                    variant_id, experiment_id
                ))
            })
    }
}

#[async_trait]
impl VariantRepository for InMemoryVariantRepository {
    async fn create(&self, variant: Variant) -> Result<Variant, DomainError> {
        let mut variants = self
            .variants
            .write()
            .map_err(|e| DomainError::internal(format!("Failed to acquire write lock: {}", e)))?;

        let list = variants.entry(variant.experiment_id().clone()).or_default();

        if list.iter().any(|v| v.id() == variant.id()) {
            return Err(DomainError::conflict(format!(
                "Variant '{}' already exists in experiment '{}'",
                variant.id(),
                variant.experiment_id()
            )));
        }

        list.push(variant.clone());
        Ok(variant)
    }

    async fn get(
        &self,
        experiment_id: &ExperimentId,
        variant_id: &VariantId,
    ) -> Result<Option<Variant>, DomainError> {
        let variants = self
            .variants
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(variants
            .get(experiment_id)
            .and_then(|list| list.iter().find(|v| v.id() == variant_id))
            .cloned())
    }

    async fn list_for_experiment(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<Vec<Variant>, DomainError> {
        let variants = self
            .variants
            .read()
            .map_err(|e| DomainError::internal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(variants.get(experiment_id).cloned().unwrap_or_default())
    }

    async fn increment_visitors(
        &self,
        experiment_id: &ExperimentId,
        variant_id: &VariantId,
    ) -> Result<(), DomainError> {
        self.with_variant_mut(experiment_id, variant_id, Variant::record_visitor)
    }

    async fn record_conversion(
        &self,
        experiment_id: &ExperimentId,
        variant_id: &VariantId,
        value: f64,
    ) -> Result<bool, DomainError> {
        self.with_variant_mut(experiment_id, variant_id, |v| v.record_conversion(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::{MachineName, TenantId};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
    }

    fn create_test_experiment(id: &str, tenant: &str, offset_days: i64) -> Experiment {
        Experiment::new(
            ExperimentId::new(id).unwrap(),
            TenantId::new(tenant).unwrap(),
            MachineName::new("hero_banner").unwrap(),
            format!("Experiment {}", id),
            base_time() + Duration::days(offset_days),
        )
    }

    fn create_test_variant(exp: &str, id: &str, traffic: u8) -> Variant {
        Variant::new(
            VariantId::new(id).unwrap(),
            ExperimentId::new(exp).unwrap(),
            id,
            traffic,
        )
    }

    mod experiments {
        use super::*;

        #[tokio::test]
        async fn test_create_and_get() {
            let repo = InMemoryExperimentRepository::new();
            repo.create(create_test_experiment("test-1", "acme", 0))
                .await
                .unwrap();

            let fetched = repo
                .get(&ExperimentId::new("test-1").unwrap())
                .await
                .unwrap();
            assert_eq!(fetched.unwrap().name(), "Experiment test-1");
        }

        #[tokio::test]
        async fn test_create_duplicate() {
            let repo = InMemoryExperimentRepository::new();
            let exp = create_test_experiment("test-1", "acme", 0);

            repo.create(exp.clone()).await.unwrap();
            let err = repo.create(exp).await.unwrap_err();

            assert!(err.is_conflict());
            assert!(err.to_string().contains("already exists"));
        }

        #[tokio::test]
        async fn test_update_not_found() {
            let repo = InMemoryExperimentRepository::new();
            let result = repo
                .update(create_test_experiment("test-1", "acme", 0), ExperimentStatus::Draft)
                .await;

            assert!(matches!(result, Err(DomainError::NotFound { .. })));
        }

        #[tokio::test]
        async fn test_update_replaces() {
            let repo = InMemoryExperimentRepository::new();
            let mut exp = create_test_experiment("test-1", "acme", 0);
            repo.create(exp.clone()).await.unwrap();

            exp.start(base_time()).unwrap();
            repo.update(exp, ExperimentStatus::Draft).await.unwrap();

            let fetched = repo
                .get(&ExperimentId::new("test-1").unwrap())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(fetched.status(), ExperimentStatus::Active);
        }

        #[tokio::test]
        async fn test_update_rejects_stale_status() {
            let repo = InMemoryExperimentRepository::new();
            let mut exp = create_test_experiment("test-1", "acme", 0);
            exp.start(base_time()).unwrap();
            repo.create(exp.clone()).await.unwrap();

            let mut paused = exp.clone();
            paused.pause(base_time()).unwrap();
            repo.update(paused, ExperimentStatus::Active).await.unwrap();

            // A completion built from the stale active copy must not land
            let mut completed = exp;
            completed
                .complete(VariantId::new("control").unwrap(), base_time())
                .unwrap();
            let err = repo
                .update(completed, ExperimentStatus::Active)
                .await
                .unwrap_err();
            assert!(err.is_conflict());

            let fetched = repo
                .get(&ExperimentId::new("test-1").unwrap())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(fetched.status(), ExperimentStatus::Paused);
        }

        #[tokio::test]
        async fn test_single_active_experiment_per_slot() {
            let repo = InMemoryExperimentRepository::new();
            let mut first = create_test_experiment("first", "acme", 0);
            let mut second = create_test_experiment("second", "acme", 1);
            repo.create(first.clone()).await.unwrap();
            repo.create(second.clone()).await.unwrap();

            first.start(base_time()).unwrap();
            repo.update(first, ExperimentStatus::Draft).await.unwrap();

            second.start(base_time()).unwrap();
            let err = repo
                .update(second.clone(), ExperimentStatus::Draft)
                .await
                .unwrap_err();
            assert!(err.is_conflict());
            assert!(err.to_string().contains("already active"));

            let mut third = create_test_experiment("third", "acme", 2);
            third.start(base_time()).unwrap();
            assert!(repo.create(third).await.unwrap_err().is_conflict());

            // Same machine name under another tenant is a different slot
            let mut elsewhere = create_test_experiment("elsewhere", "globex", 2);
            elsewhere.start(base_time()).unwrap();
            repo.create(elsewhere).await.unwrap();
        }

        #[tokio::test]
        async fn test_get_many_skips_unknown() {
            let repo = InMemoryExperimentRepository::with_experiments(vec![
                create_test_experiment("exp-1", "acme", 0),
                create_test_experiment("exp-2", "acme", 1),
            ]);

            let ids = ["exp-2", "missing", "exp-1"].map(|id| ExperimentId::new(id).unwrap());
            let found = repo.get_many(&ids).await.unwrap();

            let found: Vec<_> = found.iter().map(|e| e.id().as_str()).collect();
            assert_eq!(found, vec!["exp-2", "exp-1"]);
        }

        #[tokio::test]
        async fn test_query_ids_newest_first_and_paginated() {
            let repo = InMemoryExperimentRepository::new();
            for i in 0..5 {
                repo.create(create_test_experiment(&format!("exp-{i}"), "acme", i))
                    .await
                    .unwrap();
            }
            repo.create(create_test_experiment("other", "globex", 10))
                .await
                .unwrap();

            let query = ExperimentQuery::new().with_tenant(TenantId::new("acme").unwrap());
            let all = repo.query_ids(&query).await.unwrap();
            let all: Vec<_> = all.iter().map(|id| id.as_str()).collect();
            assert_eq!(all, vec!["exp-4", "exp-3", "exp-2", "exp-1", "exp-0"]);

            let page = repo
                .query_ids(&query.with_offset(1).with_limit(2))
                .await
                .unwrap();
            let page: Vec<_> = page.iter().map(|id| id.as_str()).collect();
            assert_eq!(page, vec!["exp-3", "exp-2"]);
        }

        #[tokio::test]
        async fn test_query_ids_by_status() {
            let mut active = create_test_experiment("active-1", "acme", 0);
            active.start(base_time()).unwrap();
            let repo = InMemoryExperimentRepository::with_experiments(vec![
                active,
                create_test_experiment("draft-1", "acme", 0),
            ]);

            let ids = repo
                .query_ids(&ExperimentQuery::new().with_status(ExperimentStatus::Active))
                .await
                .unwrap();
            assert_eq!(ids.len(), 1);
            assert_eq!(ids[0].as_str(), "active-1");
        }
    }

    mod variants {
        use super::*;

        #[tokio::test]
        async fn test_list_keeps_creation_order() {
            let repo = InMemoryVariantRepository::new();
            for id in ["control", "b", "a"] {
                repo.create(create_test_variant("exp-1", id, 33))
                    .await
                    .unwrap();
            }
            repo.create(create_test_variant("exp-2", "control", 50))
                .await
                .unwrap();

            let list = repo
                .list_for_experiment(&ExperimentId::new("exp-1").unwrap())
                .await
                .unwrap();
            let ids: Vec<_> = list.iter().map(|v| v.id().as_str()).collect();
            assert_eq!(ids, vec!["control", "b", "a"]);

            let none = repo
                .list_for_experiment(&ExperimentId::new("exp-9").unwrap())
                .await
                .unwrap();
            assert!(none.is_empty());
        }

        #[tokio::test]
        async fn test_duplicate_variant_in_same_experiment() {
            let repo = InMemoryVariantRepository::new();
            repo.create(create_test_variant("exp-1", "b", 50))
                .await
                .unwrap();

            let err = repo
                .create(create_test_variant("exp-1", "b", 50))
                .await
                .unwrap_err();
            assert!(err.is_conflict());
        }

        #[tokio::test]
        async fn test_counters() {
            let repo = InMemoryVariantRepository::with_variants(vec![create_test_variant(
                "exp-1", "b", 50,
            )]);
            let exp = ExperimentId::new("exp-1").unwrap();
            let id = VariantId::new("b").unwrap();

            assert!(!repo.record_conversion(&exp, &id, 5.0).await.unwrap());

            repo.increment_visitors(&exp, &id).await.unwrap();
            assert!(repo.record_conversion(&exp, &id, 5.0).await.unwrap());

            let variant = repo.get(&exp, &id).await.unwrap().unwrap();
            assert_eq!(variant.visitors(), 1);
            assert_eq!(variant.conversions(), 1);
            assert_eq!(variant.revenue(), 5.0);
        }

        #[tokio::test]
        async fn test_increment_unknown_variant() {
            let repo = InMemoryVariantRepository::new();
            let result = repo
                .increment_visitors(
                    &ExperimentId::new("exp-1").unwrap(),
                    &VariantId::new("b").unwrap(),
                )
                .await;
            assert!(matches!(result, Err(DomainError::NotFound { .. })));
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn test_concurrent_increments_are_not_lost() {
            let repo = Arc::new(InMemoryVariantRepository::with_variants(vec![
                create_test_variant("exp-1", "b", 100),
            ]));

            let handles: Vec<_> = (0..50)
                .map(|_| {
                    let repo = Arc::clone(&repo);
                    tokio::spawn(async move {
                        repo.increment_visitors(
                            &ExperimentId::new("exp-1").unwrap(),
                            &VariantId::new("b").unwrap(),
                        )
                        .await
                    })
                })
                .collect();

            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            let variant = repo
                .get(
                    &ExperimentId::new("exp-1").unwrap(),
                    &VariantId::new("b").unwrap(),
                )
                .await
                .unwrap()
                .unwrap();
            assert_eq!(variant.visitors(), 50);
        }
    }
}
