//! Experiment result snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{ExperimentId, VariantId};

// ============================================================================
// ConfidenceInterval
// ============================================================================

/// Two-sided interval around a conversion rate (ratios, clamped to [0, 1])
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

// ============================================================================
// VariantResult
// ============================================================================

/// Per-variant row of a result snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantResult {
    /// Variant ID
    pub variant_id: VariantId,
    /// Whether this row is the control the others are compared against
    pub is_control: bool,
    /// Distinct exposed visitors
    pub visitors: u64,
    /// Distinct converted visitors
    pub conversions: u64,
    /// Conversion rate (0.0 - 1.0)
    pub conversion_rate: f64,
    /// z-score against the control; 0 for the control itself
    pub z_score: f64,
    /// Two-tailed confidence in percent (0 - 100)
    pub confidence: f64,
    /// Relative lift over the control rate in percent
    pub lift: f64,
    /// 95% interval around the conversion rate
    pub confidence_interval: ConfidenceInterval,
    /// Whether confidence reached the experiment's threshold
    pub significant: bool,
}

// ============================================================================
// ExperimentResult
// ============================================================================

/// Snapshot of an experiment's statistics, recomputed and overwritten each cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    /// Experiment ID
    pub experiment_id: ExperimentId,
    /// When the snapshot was calculated
    pub calculated_at: DateTime<Utc>,
    /// Control variant the other rows were compared against
    pub control_variant_id: VariantId,
    /// One row per variant that has exposures
    pub variants: Vec<VariantResult>,
    /// Total exposure rows considered
    pub total_exposures: u64,
}

impl ExperimentResult {
    /// Get the control row
    pub fn control(&self) -> Option<&VariantResult> {
        self.variants
            .iter()
            .find(|v| v.variant_id == self.control_variant_id)
    }

    /// Iterate over the non-control rows
    pub fn treatments(&self) -> impl Iterator<Item = &VariantResult> {
        self.variants
            .iter()
            .filter(move |v| v.variant_id != self.control_variant_id)
    }

    /// Look up the row of a specific variant
    pub fn variant(&self, id: &VariantId) -> Option<&VariantResult> {
        self.variants.iter().find(|v| &v.variant_id == id)
    }

    /// Total distinct visitors across all variants
    pub fn total_visitors(&self) -> u64 {
        self.variants.iter().map(|v| v.visitors).sum()
    }

    /// Total conversions across all variants
    pub fn total_conversions(&self) -> u64 {
        self.variants.iter().map(|v| v.conversions).sum()
    }

    /// Conversion rate of all variants pooled together
    pub fn pooled_rate(&self) -> f64 {
        let visitors = self.total_visitors();
        if visitors == 0 {
            0.0
        } else {
            self.total_conversions() as f64 / visitors as f64
        }
    }
}
