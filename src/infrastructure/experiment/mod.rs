//! Infrastructure layer for experiment A/B testing
//!
//! Provides in-memory repositories, traffic splitters and the statistics
//! engine.

mod consistent_hashing;
mod in_memory_record_repo;
mod in_memory_repository;
pub mod statistical;

pub use consistent_hashing::{ConsistentHasher, RandomSplitter};
pub use in_memory_record_repo::{
    InMemoryAssignmentRepository, InMemoryExposureRepository, InMemoryResultRepository,
};
pub use in_memory_repository::{InMemoryExperimentRepository, InMemoryVariantRepository};
pub use statistical::{
    analyze_experiment, calculate_minimum_sample_size, calculate_z_score, chi_squared_test,
    confidence_interval, estimate_days_to_significance, inverse_normal_cdf, lift, normal_cdf,
    z_score_to_confidence, ChiSquaredResult, ExperimentAnalysis, VariantAnalysis, VariantCounts,
};
