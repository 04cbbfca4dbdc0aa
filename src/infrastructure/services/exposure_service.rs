//! Exposure tracking service

use std::sync::Arc;

use tracing::debug;

use super::ExperimentRepositories;
use crate::domain::experiment::{ExperimentId, Exposure, ExposureQuery, VariantId, VisitorId};
use crate::domain::{Clock, DomainError};

/// Pagination window for exposure listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Page {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset,
        }
    }
}

/// Service recording that assigned visitors actually saw a variant
#[derive(Debug, Clone)]
pub struct ExposureService {
    repositories: ExperimentRepositories,
    clock: Arc<dyn Clock>,
}

impl ExposureService {
    pub fn new(repositories: ExperimentRepositories, clock: Arc<dyn Clock>) -> Self {
        Self {
            repositories,
            clock,
        }
    }

    /// Store a new exposure stamped with the current time
    ///
    /// Every call creates a row; repeated views are kept.
    pub async fn record_exposure(
        &self,
        experiment_id: &ExperimentId,
        variant_id: &VariantId,
        visitor_id: &VisitorId,
    ) -> Result<Exposure, DomainError> {
        let exposure = Exposure::new(
            experiment_id.clone(),
            variant_id.clone(),
            visitor_id.clone(),
            self.clock.now(),
        );

        let stored = self.repositories.exposures.create(exposure).await?;

        debug!(
            experiment_id = %experiment_id,
            variant_id = %variant_id,
            visitor_id = %visitor_id,
            exposure_id = %stored.id(),
            "Recorded exposure"
        );

        Ok(stored)
    }

    /// List exposures of an experiment, oldest first
    pub async fn get_exposures_for_experiment(
        &self,
        experiment_id: &ExperimentId,
        page: Page,
    ) -> Result<Vec<Exposure>, DomainError> {
        let mut query = ExposureQuery::for_experiment(experiment_id.clone()).with_offset(page.offset);

        if let Some(limit) = page.limit {
            query = query.with_limit(limit);
        }

        self.repositories.exposures.query(&query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::services::test_support::{
        at, experiment_id, fixed_clock, variant_id, visitor_id,
    };
    use chrono::Duration;

    fn create_service() -> (ExposureService, Arc<crate::domain::FixedClock>) {
        let clock = fixed_clock(0);
        let service = ExposureService::new(ExperimentRepositories::in_memory(), clock.clone());
        (service, clock)
    }

    #[tokio::test]
    async fn test_record_exposure_uses_clock() {
        let (service, _) = create_service();

        let exposure = service
            .record_exposure(
                &experiment_id("exp-1"),
                &variant_id("control"),
                &visitor_id("v1"),
            )
            .await
            .unwrap();

        assert_eq!(exposure.exposed_at(), at(0));
        assert!(!exposure.is_converted());
    }

    #[tokio::test]
    async fn test_repeated_views_create_rows() {
        let (service, _) = create_service();
        let exp = experiment_id("exp-1");

        let first = service
            .record_exposure(&exp, &variant_id("control"), &visitor_id("v1"))
            .await
            .unwrap();
        let second = service
            .record_exposure(&exp, &variant_id("control"), &visitor_id("v1"))
            .await
            .unwrap();

        assert_ne!(first.id(), second.id());
        let all = service
            .get_exposures_for_experiment(&exp, Page::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_listing_is_ordered_and_paginated() {
        let (service, clock) = create_service();
        let exp = experiment_id("exp-1");

        for i in 0..5 {
            service
                .record_exposure(&exp, &variant_id("control"), &visitor_id(&format!("v{i}")))
                .await
                .unwrap();
            clock.advance(Duration::minutes(1));
        }
        service
            .record_exposure(
                &experiment_id("other"),
                &variant_id("control"),
                &visitor_id("v0"),
            )
            .await
            .unwrap();

        let page = service
            .get_exposures_for_experiment(&exp, Page::new(2, 1))
            .await
            .unwrap();

        let visitors: Vec<_> = page.iter().map(|e| e.visitor_id().as_str()).collect();
        assert_eq!(visitors, vec!["v1", "v2"]);
    }

    #[tokio::test]
    async fn test_unknown_experiment_lists_nothing() {
        let (service, _) = create_service();

        let exposures = service
            .get_exposures_for_experiment(&experiment_id("missing"), Page::default())
            .await
            .unwrap();

        assert!(exposures.is_empty());
    }
}
