//! Observability infrastructure - Prometheus metrics

mod config;
mod metrics;

pub use config::MetricsConfig;
pub use metrics::{init_metrics, record_assignment, record_conversion, record_sweep};
