//! Infrastructure layer - Storage, statistics and service implementations

pub mod experiment;
pub mod logging;
pub mod observability;
pub mod services;
