//! Experiment domain module for A/B testing
//!
//! Experiments occupy a machine-name slot within a tenant, split visitors
//! across weighted variants and are judged on conversion rate.

mod assignment;
mod entity;
mod exposure;
mod repository;
mod result;
mod validation;

pub use assignment::{select_variant, Assignment, TrafficSplitter};
pub use entity::{
    validate_variant_set, Experiment, ExperimentId, ExperimentStatus, ExperimentType, ExposureId,
    MachineName, PrimaryMetric, TenantId, Variant, VariantId, VisitorId,
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MINIMUM_DETECTABLE_EFFECT, DEFAULT_POWER,
};
pub use exposure::Exposure;
pub use repository::{
    AssignmentRepository, ExperimentQuery, ExperimentRepository, ExposureQuery,
    ExposureRepository, ResultRepository, VariantRepository,
};
pub use result::{ConfidenceInterval, ExperimentResult, VariantResult};
pub use validation::{ExperimentValidationError, IdKind};

#[cfg(test)]
pub use assignment::MockTrafficSplitter;
