//! Domain layer - Core business logic and entities

pub mod clock;
pub mod error;
pub mod experiment;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::DomainError;
pub use experiment::{
    Experiment, ExperimentId, ExperimentStatus, MachineName, TenantId, Variant, VariantId,
    VisitorId,
};

#[cfg(test)]
pub use clock::MockClock;
