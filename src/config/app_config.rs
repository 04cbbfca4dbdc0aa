use std::time::Duration;

use serde::Deserialize;

use crate::domain::experiment::{
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MINIMUM_DETECTABLE_EFFECT, DEFAULT_POWER,
};
use crate::infrastructure::observability::MetricsConfig;
use crate::infrastructure::services::{
    ExperimentDefaults, OrchestratorSettings, DEFAULT_EVALUATION_TIMEOUT,
    DEFAULT_SWEEP_CONCURRENCY, DEFAULT_SWEEP_INTERVAL,
};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Statistical defaults and sweep tuning
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub confidence_threshold: f64,
    pub power: f64,
    pub minimum_detectable_effect: f64,
    pub sweep_concurrency: usize,
    pub evaluation_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            power: DEFAULT_POWER,
            minimum_detectable_effect: DEFAULT_MINIMUM_DETECTABLE_EFFECT,
            sweep_concurrency: DEFAULT_SWEEP_CONCURRENCY,
            evaluation_timeout_secs: DEFAULT_EVALUATION_TIMEOUT.as_secs(),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs(),
        }
    }
}

impl EngineConfig {
    pub fn experiment_defaults(&self) -> ExperimentDefaults {
        ExperimentDefaults {
            minimum_detectable_effect: self.minimum_detectable_effect,
            confidence_threshold: self.confidence_threshold,
            power: self.power,
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            sweep_concurrency: self.sweep_concurrency.max(1),
            evaluation_timeout: Duration::from_secs(self.evaluation_timeout_secs.max(1)),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl AppConfig {
    /// Layer `config/default`, `config/local` and `EXPERIMENTS__*` variables
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("EXPERIMENTS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
