//! Prometheus metrics infrastructure

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use super::config::MetricsConfig;
use crate::infrastructure::services::EvaluationSummary;

/// Install the Prometheus recorder and its scrape listener
///
/// Returns `false` when disabled or when installation fails. Must run
/// inside a Tokio runtime.
pub fn init_metrics(config: &MetricsConfig) -> bool {
    if !config.enabled {
        tracing::info!("Prometheus metrics disabled");
        return false;
    }

    let builder = PrometheusBuilder::new().with_http_listener(config.listen_address);

    match builder.install() {
        Ok(()) => {
            register_default_metrics();
            tracing::info!("Prometheus metrics listening on {}", config.listen_address);
            true
        }
        Err(e) => {
            tracing::error!("Failed to initialize Prometheus metrics: {}", e);
            false
        }
    }
}

fn register_default_metrics() {
    gauge!("experiment_engine_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

/// Record a newly written visitor assignment
pub fn record_assignment(experiment_id: &str, variant_id: &str) {
    let labels = [
        ("experiment", experiment_id.to_string()),
        ("variant", variant_id.to_string()),
    ];

    counter!("experiment_assignments_total", &labels).increment(1);
}

/// Record a newly counted conversion
pub fn record_conversion(experiment_id: &str, variant_id: &str) {
    let labels = [
        ("experiment", experiment_id.to_string()),
        ("variant", variant_id.to_string()),
    ];

    counter!("experiment_conversions_total", &labels).increment(1);
}

/// Record the outcome totals of an evaluation sweep
pub fn record_sweep(summary: &EvaluationSummary) {
    counter!("experiment_sweeps_total").increment(1);
    counter!("experiment_sweep_evaluations_total").increment(summary.evaluated);
    counter!("experiment_sweep_winners_total").increment(summary.winners_declared);
    counter!("experiment_sweep_skipped_total").increment(summary.skipped);

    if summary.errors > 0 {
        counter!("experiment_sweep_errors_total").increment(summary.errors);
    }
}
