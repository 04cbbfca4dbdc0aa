//! Experiment fixtures loaded from JSON files

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::experiment::{
    Experiment, ExperimentId, ExperimentStatus, ExperimentType, Exposure, MachineName,
    PrimaryMetric, TenantId, Variant, VariantId, VisitorId,
};
use crate::infrastructure::services::{ExperimentDefaults, ExperimentRepositories};

/// Snapshot of experiments and their traffic
#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    /// Frozen evaluation time; wall clock when absent
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
    pub experiments: Vec<FixtureExperiment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureExperiment {
    pub id: String,
    pub tenant_id: String,
    pub machine_name: String,
    pub name: String,
    #[serde(default)]
    pub hypothesis: Option<String>,
    #[serde(default)]
    pub experiment_type: ExperimentType,
    #[serde(default)]
    pub primary_metric: PrimaryMetric,
    #[serde(default)]
    pub status: ExperimentStatus,
    #[serde(default)]
    pub minimum_detectable_effect: Option<f64>,
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
    #[serde(default)]
    pub power: Option<f64>,
    #[serde(default = "default_auto_complete")]
    pub auto_complete: bool,
    #[serde(default)]
    pub minimum_runtime_days: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub winner_variant: Option<String>,
    pub variants: Vec<FixtureVariant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureVariant {
    pub id: String,
    pub label: String,
    pub traffic: u8,
    #[serde(default)]
    pub control: bool,
    #[serde(default)]
    pub visitors: u64,
    #[serde(default)]
    pub conversions: u64,
    #[serde(default)]
    pub revenue: f64,
}

fn default_auto_complete() -> bool {
    true
}

impl Fixture {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid fixture {}", path.display()))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Store every experiment, its variants and one exposure per visitor
    ///
    /// Exposures are stamped at the experiment start; the first
    /// `conversions` of each variant are converted.
    pub async fn load_into(
        &self,
        repositories: &ExperimentRepositories,
        defaults: ExperimentDefaults,
    ) -> anyhow::Result<usize> {
        for fixture in &self.experiments {
            load_experiment(repositories, fixture, defaults, self.now)
                .await
                .with_context(|| format!("Failed to load experiment '{}'", fixture.id))?;
        }

        info!(experiments = self.experiments.len(), "Fixture loaded");
        Ok(self.experiments.len())
    }
}

async fn load_experiment(
    repositories: &ExperimentRepositories,
    fixture: &FixtureExperiment,
    defaults: ExperimentDefaults,
    now: Option<DateTime<Utc>>,
) -> anyhow::Result<()> {
    let experiment_id = ExperimentId::new(&fixture.id)?;
    let experiment = build_experiment(fixture, defaults, now)?;
    experiment.validate_settings()?;

    let variants = fixture
        .variants
        .iter()
        .map(|v| {
            Ok(Variant::new(
                VariantId::new(&v.id)?,
                experiment_id.clone(),
                v.label.clone(),
                v.traffic,
            )
            .with_control(v.control)
            .with_counts(v.visitors, v.conversions)
            .with_revenue(v.revenue.max(0.0)))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let exposed_at = experiment.started_at().unwrap_or(experiment.created_at());
    repositories.experiments.create(experiment).await?;

    for variant in variants {
        let variant_id = variant.id().clone();
        let visitors = variant.visitors();
        let conversions = variant.conversions();
        repositories.variants.create(variant).await?;

        for i in 0..visitors {
            let mut exposure = Exposure::new(
                experiment_id.clone(),
                variant_id.clone(),
                VisitorId::new(format!("{variant_id}-{i}"))?,
                exposed_at,
            );
            if i < conversions {
                exposure.mark_converted(None, exposed_at);
            }
            repositories.exposures.create(exposure).await?;
        }
    }

    debug!(experiment_id = %experiment_id, "Fixture experiment stored");
    Ok(())
}

fn build_experiment(
    fixture: &FixtureExperiment,
    defaults: ExperimentDefaults,
    now: Option<DateTime<Utc>>,
) -> anyhow::Result<Experiment> {
    let mut experiment = Experiment::new(
        ExperimentId::new(&fixture.id)?,
        TenantId::new(&fixture.tenant_id)?,
        MachineName::new(&fixture.machine_name)?,
        fixture.name.clone(),
        fixture.created_at,
    )
    .with_type(fixture.experiment_type)
    .with_primary_metric(fixture.primary_metric)
    .with_minimum_detectable_effect(
        fixture
            .minimum_detectable_effect
            .unwrap_or(defaults.minimum_detectable_effect),
    )
    .with_confidence_threshold(
        fixture
            .confidence_threshold
            .unwrap_or(defaults.confidence_threshold),
    )
    .with_power(fixture.power.unwrap_or(defaults.power))
    .with_auto_complete(fixture.auto_complete)
    .with_minimum_runtime_days(fixture.minimum_runtime_days);

    if let Some(hypothesis) = &fixture.hypothesis {
        experiment = experiment.with_hypothesis(hypothesis.clone());
    }

    let started_at = fixture.started_at.unwrap_or(fixture.created_at);
    match fixture.status {
        ExperimentStatus::Draft => {}
        ExperimentStatus::Active => experiment.start(started_at)?,
        ExperimentStatus::Paused => {
            experiment.start(started_at)?;
            experiment.pause(started_at)?;
        }
        ExperimentStatus::Completed => {
            let winner = fixture
                .winner_variant
                .as_deref()
                .or_else(|| {
                    fixture
                        .variants
                        .iter()
                        .find(|v| v.control)
                        .map(|v| v.id.as_str())
                })
                .context("Completed experiment needs a winner or a control variant")?;
            let completed_at = fixture
                .completed_at
                .or(now)
                .unwrap_or_else(Utc::now);

            experiment.start(started_at)?;
            experiment.complete(VariantId::new(winner)?, completed_at)?;
        }
    }

    Ok(experiment)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "now": "2024-06-10T09:00:00Z",
        "experiments": [
            {
                "id": "pricing-page",
                "tenant_id": "acme",
                "machine_name": "pricing_page",
                "name": "Pricing page layout",
                "status": "active",
                "minimum_detectable_effect": 0.5,
                "created_at": "2024-06-01T09:00:00Z",
                "variants": [
                    {"id": "control", "label": "Current", "traffic": 50, "control": true, "visitors": 40, "conversions": 4},
                    {"id": "grid", "label": "Grid", "traffic": 50, "visitors": 40, "conversions": 10, "revenue": 250.0}
                ]
            },
            {
                "id": "welcome-email",
                "tenant_id": "acme",
                "machine_name": "welcome_email",
                "name": "Welcome email subject",
                "experiment_type": "email",
                "status": "completed",
                "created_at": "2024-05-01T09:00:00Z",
                "completed_at": "2024-05-08T09:00:00Z",
                "winner_variant": "short",
                "variants": [
                    {"id": "control", "label": "Welcome!", "traffic": 50, "control": true},
                    {"id": "short", "label": "Hi", "traffic": 50}
                ]
            }
        ]
    }"#;

    #[tokio::test]
    async fn test_load_fixture() {
        let fixture = Fixture::from_json(FIXTURE).unwrap();
        let repos = ExperimentRepositories::in_memory();

        let loaded = fixture
            .load_into(&repos, ExperimentDefaults::default())
            .await
            .unwrap();
        assert_eq!(loaded, 2);

        let pricing_id = ExperimentId::new("pricing-page").unwrap();
        let pricing = repos.experiments.get(&pricing_id).await.unwrap().unwrap();
        assert_eq!(pricing.status(), ExperimentStatus::Active);
        assert_eq!(pricing.minimum_detectable_effect(), 0.5);
        assert_eq!(pricing.confidence_threshold(), 0.95);
        assert!(pricing.auto_complete());

        let variants = repos
            .variants
            .list_for_experiment(&pricing_id)
            .await
            .unwrap();
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[1].conversions(), 10);
        assert_eq!(variants[1].revenue(), 250.0);
        assert_eq!(repos.exposures.count(&pricing_id).await.unwrap(), 80);

        let email = repos
            .experiments
            .get(&ExperimentId::new("welcome-email").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(email.status(), ExperimentStatus::Completed);
        assert_eq!(email.winner_variant().map(|v| v.as_str()), Some("short"));
        assert_eq!(email.days_running(Utc::now()), 7);
    }

    #[tokio::test]
    async fn test_completed_without_winner_or_control_fails() {
        let fixture = Fixture::from_json(
            r#"{"experiments": [{
                "id": "orphan",
                "tenant_id": "acme",
                "machine_name": "orphan",
                "name": "Orphan",
                "status": "completed",
                "created_at": "2024-05-01T09:00:00Z",
                "variants": [{"id": "a", "label": "A", "traffic": 100}]
            }]}"#,
        )
        .unwrap();

        let result = fixture
            .load_into(&ExperimentRepositories::in_memory(), ExperimentDefaults::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_invalid_identifier_is_rejected() {
        let fixture = Fixture::from_json(
            r#"{"experiments": [{
                "id": "Not Valid",
                "tenant_id": "acme",
                "machine_name": "slot",
                "name": "Bad",
                "created_at": "2024-05-01T09:00:00Z",
                "variants": []
            }]}"#,
        )
        .unwrap();

        let result = fixture
            .load_into(&ExperimentRepositories::in_memory(), ExperimentDefaults::default())
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = Fixture::from_path(Path::new("/nonexistent/fixture.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read fixture"));
    }
}
