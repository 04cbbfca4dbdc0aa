//! Fixtures shared by the service tests

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use super::ExperimentRepositories;
use crate::domain::experiment::{
    Experiment, ExperimentId, ExperimentQuery, ExperimentRepository, ExperimentStatus, ExposureId,
    ExposureQuery, ExposureRepository, Exposure, MachineName, TenantId, Variant, VariantId,
    VariantRepository, VisitorId,
};
use crate::domain::{DomainError, FixedClock};
use crate::infrastructure::experiment::{
    InMemoryExperimentRepository, InMemoryExposureRepository, InMemoryVariantRepository,
};

pub const TENANT: &str = "acme";

/// Day `n` of the test calendar
pub fn at(day: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap() + Duration::days(day)
}

pub fn fixed_clock(day: i64) -> Arc<FixedClock> {
    Arc::new(FixedClock::new(at(day)))
}

pub fn experiment_id(id: &str) -> ExperimentId {
    ExperimentId::new(id).unwrap()
}

pub fn variant_id(id: &str) -> VariantId {
    VariantId::new(id).unwrap()
}

pub fn visitor_id(id: &str) -> VisitorId {
    VisitorId::new(id).unwrap()
}

pub fn tenant() -> TenantId {
    TenantId::new(TENANT).unwrap()
}

pub fn build_experiment(id: &str, machine_name: &str, created_at: DateTime<Utc>) -> Experiment {
    build_experiment_in(TENANT, id, machine_name, created_at)
}

pub fn build_experiment_in(
    tenant_id: &str,
    id: &str,
    machine_name: &str,
    created_at: DateTime<Utc>,
) -> Experiment {
    Experiment::new(
        experiment_id(id),
        TenantId::new(tenant_id).unwrap(),
        MachineName::new(machine_name).unwrap(),
        format!("Experiment {id}"),
        created_at,
    )
}

/// Store an experiment with a 50/50 `control`/`treatment` split
pub async fn seed_experiment(
    repos: &ExperimentRepositories,
    id: &str,
    machine_name: &str,
    status: ExperimentStatus,
    created_at: DateTime<Utc>,
) -> Experiment {
    store_experiment(
        repos,
        build_experiment(id, machine_name, created_at),
        status,
        &[("control", 50, true), ("treatment", 50, false)],
    )
    .await
}

/// Store an experiment and its variants, walking it to `status`
///
/// Transitions are stamped with the creation time; completed experiments
/// are won by their control.
pub async fn store_experiment(
    repos: &ExperimentRepositories,
    mut experiment: Experiment,
    status: ExperimentStatus,
    variants: &[(&str, u8, bool)],
) -> Experiment {
    let stamp = experiment.created_at();
    let control = variants
        .iter()
        .find(|(_, _, is_control)| *is_control)
        .map(|(id, _, _)| variant_id(id));

    match status {
        ExperimentStatus::Draft => {}
        ExperimentStatus::Active => experiment.start(stamp).unwrap(),
        ExperimentStatus::Paused => {
            experiment.start(stamp).unwrap();
            experiment.pause(stamp).unwrap();
        }
        ExperimentStatus::Completed => {
            experiment.start(stamp).unwrap();
            experiment.complete(control.clone().unwrap(), stamp).unwrap();
        }
    }

    let stored = repos.experiments.create(experiment).await.unwrap();
    for (id, traffic, is_control) in variants {
        let variant = Variant::new(variant_id(id), stored.id().clone(), id.to_uppercase(), *traffic)
            .with_control(*is_control);
        repos.variants.create(variant).await.unwrap();
    }

    stored
}

/// Record `visitors` exposures on a variant, the first `conversions` converted
///
/// Variant counters are bumped alongside so aggregate views agree.
pub async fn seed_traffic(
    repos: &ExperimentRepositories,
    experiment: &str,
    variant: &str,
    visitors: u64,
    conversions: u64,
    exposed_at: DateTime<Utc>,
) {
    let exp_id = experiment_id(experiment);
    let var_id = variant_id(variant);

    for i in 0..visitors {
        let mut exposure = Exposure::new(
            exp_id.clone(),
            var_id.clone(),
            visitor_id(&format!("{variant}-{i}")),
            exposed_at,
        );
        repos.variants.increment_visitors(&exp_id, &var_id).await.unwrap();
        if i < conversions {
            exposure.mark_converted(None, exposed_at);
            repos
                .variants
                .record_conversion(&exp_id, &var_id, 0.0)
                .await
                .unwrap();
        }
        repos.exposures.create(exposure).await.unwrap();
    }
}

// ============================================================================
// Failing repository
// ============================================================================

/// Exposure store whose reads fail for one experiment until healed
#[derive(Debug)]
pub struct FailingExposureRepository {
    inner: InMemoryExposureRepository,
    failing: ExperimentId,
    healed: AtomicBool,
}

impl FailingExposureRepository {
    pub fn new(failing: &str) -> Self {
        Self {
            inner: InMemoryExposureRepository::new(),
            failing: experiment_id(failing),
            healed: AtomicBool::new(false),
        }
    }

    pub fn heal(&self) {
        self.healed.store(true, Ordering::SeqCst);
    }

    fn check(&self, experiment_id: &ExperimentId) -> Result<(), DomainError> {
        if experiment_id == &self.failing && !self.healed.load(Ordering::SeqCst) {
            Err(DomainError::storage(format!(
                "exposure store unavailable for '{experiment_id}'"
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ExposureRepository for FailingExposureRepository {
    async fn create(&self, exposure: Exposure) -> Result<Exposure, DomainError> {
        self.inner.create(exposure).await
    }

    async fn query(&self, query: &ExposureQuery) -> Result<Vec<Exposure>, DomainError> {
        self.check(&query.experiment_id)?;
        self.inner.query(query).await
    }

    async fn count(&self, experiment_id: &ExperimentId) -> Result<u64, DomainError> {
        self.check(experiment_id)?;
        self.inner.count(experiment_id).await
    }

    async fn latest_for_visitor(
        &self,
        experiment_id: &ExperimentId,
        visitor_id: &VisitorId,
    ) -> Result<Option<Exposure>, DomainError> {
        self.check(experiment_id)?;
        self.inner.latest_for_visitor(experiment_id, visitor_id).await
    }

    async fn mark_converted(
        &self,
        id: &ExposureId,
        value: Option<f64>,
        at: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        self.inner.mark_converted(id, value, at).await
    }
}

/// Exposure store whose queries stall for one experiment
#[derive(Debug)]
pub struct SlowExposureRepository {
    inner: InMemoryExposureRepository,
    slow: ExperimentId,
    delay: std::time::Duration,
}

impl SlowExposureRepository {
    pub fn new(slow: &str, delay: std::time::Duration) -> Self {
        Self {
            inner: InMemoryExposureRepository::new(),
            slow: experiment_id(slow),
            delay,
        }
    }
}

#[async_trait]
impl ExposureRepository for SlowExposureRepository {
    async fn create(&self, exposure: Exposure) -> Result<Exposure, DomainError> {
        self.inner.create(exposure).await
    }

    async fn query(&self, query: &ExposureQuery) -> Result<Vec<Exposure>, DomainError> {
        if query.experiment_id == self.slow {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.query(query).await
    }

    async fn count(&self, experiment_id: &ExperimentId) -> Result<u64, DomainError> {
        self.inner.count(experiment_id).await
    }

    async fn latest_for_visitor(
        &self,
        experiment_id: &ExperimentId,
        visitor_id: &VisitorId,
    ) -> Result<Option<Exposure>, DomainError> {
        self.inner.latest_for_visitor(experiment_id, visitor_id).await
    }

    async fn mark_converted(
        &self,
        id: &ExposureId,
        value: Option<f64>,
        at: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        self.inner.mark_converted(id, value, at).await
    }
}

/// Variant store whose next counter updates can be made to fail once
#[derive(Debug, Default)]
pub struct FlakyVariantRepository {
    inner: InMemoryVariantRepository,
    fail_next_visitor: AtomicBool,
    fail_next_conversion: AtomicBool,
}

impl FlakyVariantRepository {
    pub fn fail_next_visitor(&self) {
        self.fail_next_visitor.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_conversion(&self) {
        self.fail_next_conversion.store(true, Ordering::SeqCst);
    }

    fn trip(flag: &AtomicBool) -> Result<(), DomainError> {
        if flag.swap(false, Ordering::SeqCst) {
            Err(DomainError::storage("variant counters unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VariantRepository for FlakyVariantRepository {
    async fn create(&self, variant: Variant) -> Result<Variant, DomainError> {
        self.inner.create(variant).await
    }

    async fn get(
        &self,
        experiment_id: &ExperimentId,
        variant_id: &VariantId,
    ) -> Result<Option<Variant>, DomainError> {
        self.inner.get(experiment_id, variant_id).await
    }

    async fn list_for_experiment(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<Vec<Variant>, DomainError> {
        self.inner.list_for_experiment(experiment_id).await
    }

    async fn increment_visitors(
        &self,
        experiment_id: &ExperimentId,
        variant_id: &VariantId,
    ) -> Result<(), DomainError> {
        Self::trip(&self.fail_next_visitor)?;
        self.inner.increment_visitors(experiment_id, variant_id).await
    }

    async fn record_conversion(
        &self,
        experiment_id: &ExperimentId,
        variant_id: &VariantId,
        value: f64,
    ) -> Result<bool, DomainError> {
        Self::trip(&self.fail_next_conversion)?;
        self.inner
            .record_conversion(experiment_id, variant_id, value)
            .await
    }
}

/// Experiment store that yields to other tasks after every read
///
/// Lets two lifecycle calls interleave between their read and their write.
#[derive(Debug, Default)]
pub struct YieldingExperimentRepository {
    inner: InMemoryExperimentRepository,
}

#[async_trait]
impl ExperimentRepository for YieldingExperimentRepository {
    async fn create(&self, experiment: Experiment) -> Result<Experiment, DomainError> {
        self.inner.create(experiment).await
    }

    async fn get(&self, id: &ExperimentId) -> Result<Option<Experiment>, DomainError> {
        let experiment = self.inner.get(id).await;
        tokio::task::yield_now().await;
        experiment
    }

    async fn get_many(&self, ids: &[ExperimentId]) -> Result<Vec<Experiment>, DomainError> {
        self.inner.get_many(ids).await
    }

    async fn query_ids(&self, query: &ExperimentQuery) -> Result<Vec<ExperimentId>, DomainError> {
        let ids = self.inner.query_ids(query).await;
        tokio::task::yield_now().await;
        ids
    }

    async fn update(
        &self,
        experiment: Experiment,
        expected: ExperimentStatus,
    ) -> Result<Experiment, DomainError> {
        self.inner.update(experiment, expected).await
    }
}

// ============================================================================
// Log capture
// ============================================================================

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
}

/// Layer recording every event emitted while installed
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    /// Route this thread's events into the capture until the guard drops
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count_at(&self, level: Level) -> usize {
        self.events().iter().filter(|e| e.level == level).count()
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if let Ok(mut events) = self.events.lock() {
            events.push(CapturedEvent {
                level: *event.metadata().level(),
                message: visitor.message,
            });
        }
    }
}
