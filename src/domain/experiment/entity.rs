//! Experiment domain entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::validation::{
    validate_machine_name, validate_ratio, validate_slug_id, validate_visitor_id,
    ExperimentValidationError, IdKind,
};

/// Default relative minimum detectable effect (10%)
pub const DEFAULT_MINIMUM_DETECTABLE_EFFECT: f64 = 0.10;

/// Default confidence threshold (95%)
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.95;

/// Default statistical power (80%)
pub const DEFAULT_POWER: f64 = 0.80;

// ============================================================================
// Validated string identifiers
// ============================================================================

macro_rules! validated_id {
    ($(#[$meta:meta])* $name:ident, $validate:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier with validation
            pub fn new(id: impl Into<String>) -> Result<Self, ExperimentValidationError> {
                let id = id.into();
                let validate: fn(&str) -> Result<(), ExperimentValidationError> = $validate;
                validate(&id)?;
                Ok(Self(id))
            }

            /// Get the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ExperimentValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

validated_id!(
    /// Unique identifier for an experiment
    ExperimentId,
    |id| validate_slug_id(IdKind::Experiment, id)
);

validated_id!(
    /// Identifier of a variant, unique within its experiment
    VariantId,
    |id| validate_slug_id(IdKind::Variant, id)
);

validated_id!(
    /// Identifier of the tenant (site, account) owning an experiment
    TenantId,
    |id| validate_slug_id(IdKind::Tenant, id)
);

validated_id!(
    /// Opaque visitor identifier supplied by the caller
    VisitorId,
    validate_visitor_id
);

validated_id!(
    /// Stable slot name an experiment occupies within a tenant (`homepage_cta`)
    MachineName,
    validate_machine_name
);

// ============================================================================
// ExposureId
// ============================================================================

/// Generated identifier of an exposure row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExposureId(Uuid);

impl ExposureId {
    /// Generate a fresh random ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ExposureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ExperimentStatus
// ============================================================================

/// Lifecycle status of an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Being configured, receives no traffic
    #[default]
    Draft,
    /// Receiving traffic and being evaluated
    Active,
    /// Temporarily receiving no traffic
    Paused,
    /// Finished; terminal
    Completed,
}

impl ExperimentStatus {
    /// Check if the experiment is routing traffic
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Check if a transition to the target status is allowed
    ///
    /// Only `draft -> active -> completed` and `active <-> paused` are valid.
    pub fn can_transition_to(&self, target: ExperimentStatus) -> bool {
        matches!(
            (self, target),
            (Self::Draft, Self::Active)
                | (Self::Active, Self::Paused)
                | (Self::Paused, Self::Active)
                | (Self::Active, Self::Completed)
        )
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl FromStr for ExperimentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "active" | "running" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            other => Err(format!("Unknown experiment status: '{}'", other)),
        }
    }
}

// ============================================================================
// ExperimentType / PrimaryMetric
// ============================================================================

/// What kind of surface the experiment varies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentType {
    #[default]
    Page,
    Email,
    Pricing,
    Cta,
    FeatureFlag,
    Custom,
}

/// Metric the experiment is judged on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryMetric {
    #[default]
    ConversionRate,
    ClickRate,
    Revenue,
    Engagement,
    Custom,
}

// ============================================================================
// Variant
// ============================================================================

/// One arm of an experiment together with its running counters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variant {
    id: VariantId,
    experiment_id: ExperimentId,
    label: String,
    traffic: u8,
    #[serde(default)]
    is_control: bool,
    #[serde(default)]
    visitors: u64,
    #[serde(default)]
    conversions: u64,
    #[serde(default)]
    revenue: f64,
}

impl Variant {
    /// Create a new variant with zeroed counters
    pub fn new(
        id: VariantId,
        experiment_id: ExperimentId,
        label: impl Into<String>,
        traffic: u8,
    ) -> Self {
        Self {
            id,
            experiment_id,
            label: label.into(),
            traffic,
            is_control: false,
            visitors: 0,
            conversions: 0,
            revenue: 0.0,
        }
    }

    /// Mark this variant as the control arm
    pub fn with_control(mut self, is_control: bool) -> Self {
        self.is_control = is_control;
        self
    }

    /// Seed counters (fixtures and imports); conversions are capped at visitors
    pub fn with_counts(mut self, visitors: u64, conversions: u64) -> Self {
        self.visitors = visitors;
        self.conversions = conversions.min(visitors);
        self
    }

    pub fn with_revenue(mut self, revenue: f64) -> Self {
        self.revenue = revenue;
        self
    }

    pub fn id(&self) -> &VariantId {
        &self.id
    }

    pub fn experiment_id(&self) -> &ExperimentId {
        &self.experiment_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Traffic weight, 0 to 100
    pub fn traffic(&self) -> u8 {
        self.traffic
    }

    pub fn is_control(&self) -> bool {
        self.is_control
    }

    pub fn visitors(&self) -> u64 {
        self.visitors
    }

    pub fn conversions(&self) -> u64 {
        self.conversions
    }

    pub fn revenue(&self) -> f64 {
        self.revenue
    }

    /// Conversion rate as a ratio; 0 when there are no visitors
    pub fn conversion_rate(&self) -> f64 {
        if self.visitors == 0 {
            0.0
        } else {
            self.conversions as f64 / self.visitors as f64
        }
    }

    /// Count one newly assigned visitor
    pub fn record_visitor(&mut self) {
        self.visitors = self.visitors.saturating_add(1);
    }

    /// Count one conversion, refusing to exceed the visitor count
    pub fn record_conversion(&mut self, value: f64) -> bool {
        if self.conversions >= self.visitors {
            return false;
        }
        self.conversions += 1;
        self.revenue += value;
        true
    }
}

/// Check that a set of variants forms a valid experiment layout
///
/// Requires at least two variants, unique IDs, weights summing to 100 and
/// exactly one control.
pub fn validate_variant_set(variants: &[Variant]) -> Result<(), ExperimentValidationError> {
    if variants.len() < 2 {
        return Err(ExperimentValidationError::InsufficientVariants);
    }

    let mut seen = std::collections::HashSet::new();
    for variant in variants {
        if !seen.insert(variant.id().as_str()) {
            return Err(ExperimentValidationError::DuplicateVariantId(
                variant.id().to_string(),
            ));
        }
        if variant.traffic() > 100 {
            return Err(ExperimentValidationError::TrafficOutOfRange(
                variant.id().to_string(),
                u32::from(variant.traffic()),
            ));
        }
    }

    let total: u32 = variants.iter().map(|v| u32::from(v.traffic())).sum();
    if total != 100 {
        return Err(ExperimentValidationError::InvalidTrafficSum(total));
    }

    let controls = variants.iter().filter(|v| v.is_control()).count();
    if controls != 1 {
        return Err(ExperimentValidationError::ControlCount(controls));
    }

    Ok(())
}

// ============================================================================
// Experiment
// ============================================================================

/// An A/B test occupying a machine-name slot within a tenant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experiment {
    id: ExperimentId,
    tenant_id: TenantId,
    machine_name: MachineName,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hypothesis: Option<String>,
    #[serde(default)]
    experiment_type: ExperimentType,
    #[serde(default)]
    primary_metric: PrimaryMetric,
    #[serde(default)]
    status: ExperimentStatus,
    minimum_detectable_effect: f64,
    confidence_threshold: f64,
    power: f64,
    auto_complete: bool,
    #[serde(default)]
    minimum_runtime_days: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    winner_variant: Option<VariantId>,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl Experiment {
    /// Create a new experiment in Draft status
    pub fn new(
        id: ExperimentId,
        tenant_id: TenantId,
        machine_name: MachineName,
        name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            machine_name,
            name: name.into(),
            hypothesis: None,
            experiment_type: ExperimentType::default(),
            primary_metric: PrimaryMetric::default(),
            status: ExperimentStatus::Draft,
            minimum_detectable_effect: DEFAULT_MINIMUM_DETECTABLE_EFFECT,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            power: DEFAULT_POWER,
            auto_complete: true,
            minimum_runtime_days: 0,
            winner_variant: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    // Builder methods

    pub fn with_hypothesis(mut self, hypothesis: impl Into<String>) -> Self {
        self.hypothesis = Some(hypothesis.into());
        self
    }

    pub fn with_type(mut self, experiment_type: ExperimentType) -> Self {
        self.experiment_type = experiment_type;
        self
    }

    pub fn with_primary_metric(mut self, metric: PrimaryMetric) -> Self {
        self.primary_metric = metric;
        self
    }

    /// Set the relative minimum detectable effect (0.10 = 10%)
    pub fn with_minimum_detectable_effect(mut self, mde: f64) -> Self {
        self.minimum_detectable_effect = mde;
        self
    }

    /// Set the confidence threshold as a ratio (0.95 = 95%)
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_power(mut self, power: f64) -> Self {
        self.power = power;
        self
    }

    pub fn with_auto_complete(mut self, auto_complete: bool) -> Self {
        self.auto_complete = auto_complete;
        self
    }

    pub fn with_minimum_runtime_days(mut self, days: u32) -> Self {
        self.minimum_runtime_days = days;
        self
    }

    // Getters

    pub fn id(&self) -> &ExperimentId {
        &self.id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn machine_name(&self) -> &MachineName {
        &self.machine_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hypothesis(&self) -> Option<&str> {
        self.hypothesis.as_deref()
    }

    pub fn experiment_type(&self) -> ExperimentType {
        self.experiment_type
    }

    pub fn primary_metric(&self) -> PrimaryMetric {
        self.primary_metric
    }

    pub fn status(&self) -> ExperimentStatus {
        self.status
    }

    pub fn minimum_detectable_effect(&self) -> f64 {
        self.minimum_detectable_effect
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    pub fn power(&self) -> f64 {
        self.power
    }

    pub fn auto_complete(&self) -> bool {
        self.auto_complete
    }

    pub fn minimum_runtime_days(&self) -> u32 {
        self.minimum_runtime_days
    }

    pub fn winner_variant(&self) -> Option<&VariantId> {
        self.winner_variant.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Whole days the experiment has been running
    ///
    /// Measured from `started_at` (or `created_at` if never started) to
    /// `completed_at`, or to `now` while still open.
    pub fn days_running(&self, now: DateTime<Utc>) -> i64 {
        let start = self.started_at.unwrap_or(self.created_at);
        let end = self.completed_at.unwrap_or(now);
        (end - start).num_days().max(0)
    }

    /// Whether the configured minimum runtime has elapsed since start
    pub fn minimum_runtime_elapsed(&self, now: DateTime<Utc>) -> bool {
        if self.minimum_runtime_days == 0 {
            return true;
        }
        match self.started_at {
            Some(started) => (now - started).num_days() >= i64::from(self.minimum_runtime_days),
            None => false,
        }
    }

    /// Check that the statistical settings are usable
    pub fn validate_settings(&self) -> Result<(), ExperimentValidationError> {
        validate_ratio("Confidence threshold", self.confidence_threshold)?;
        validate_ratio("Power", self.power)?;
        if !(self.minimum_detectable_effect > 0.0) {
            return Err(ExperimentValidationError::InvalidEffect(
                self.minimum_detectable_effect,
            ));
        }
        Ok(())
    }

    // Status transitions

    fn transition(
        &mut self,
        target: ExperimentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), ExperimentValidationError> {
        if !self.status.can_transition_to(target) {
            return Err(ExperimentValidationError::InvalidStatusTransition(
                self.status.to_string(),
                target.to_string(),
            ));
        }
        self.status = target;
        self.updated_at = now;
        Ok(())
    }

    /// Start the experiment (draft -> active)
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), ExperimentValidationError> {
        if self.status != ExperimentStatus::Draft {
            return Err(ExperimentValidationError::InvalidStatusTransition(
                self.status.to_string(),
                ExperimentStatus::Active.to_string(),
            ));
        }
        self.transition(ExperimentStatus::Active, now)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Pause the experiment (active -> paused)
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), ExperimentValidationError> {
        self.transition(ExperimentStatus::Paused, now)
    }

    /// Resume the experiment (paused -> active)
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), ExperimentValidationError> {
        if self.status != ExperimentStatus::Paused {
            return Err(ExperimentValidationError::InvalidStatusTransition(
                self.status.to_string(),
                ExperimentStatus::Active.to_string(),
            ));
        }
        self.transition(ExperimentStatus::Active, now)
    }

    /// Complete the experiment and record the winning variant
    pub fn complete(
        &mut self,
        winner: VariantId,
        now: DateTime<Utc>,
    ) -> Result<(), ExperimentValidationError> {
        self.transition(ExperimentStatus::Completed, now)?;
        self.winner_variant = Some(winner);
        self.completed_at = Some(now);
        Ok(())
    }
}
