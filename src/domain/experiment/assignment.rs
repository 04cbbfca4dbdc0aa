//! Visitor-to-variant assignments

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

#[cfg(test)]
use mockall::automock;

use super::entity::{ExperimentId, Variant, VariantId, VisitorId};

/// Source of the bucketing roll used to pick a variant
#[cfg_attr(test, automock)]
pub trait TrafficSplitter: Send + Sync + Debug {
    /// Uniform sample in `[0, 1)` for this visitor and experiment
    fn sample(&self, experiment_id: &ExperimentId, visitor_id: &VisitorId) -> f64;
}

/// The variant a visitor was bucketed into for one experiment
///
/// Created once per (experiment, visitor) pair and never reassigned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    experiment_id: ExperimentId,
    visitor_id: VisitorId,
    variant_id: VariantId,
    assigned_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    converted_at: Option<DateTime<Utc>>,
}

impl Assignment {
    pub fn new(
        experiment_id: ExperimentId,
        visitor_id: VisitorId,
        variant_id: VariantId,
        assigned_at: DateTime<Utc>,
    ) -> Self {
        Self {
            experiment_id,
            visitor_id,
            variant_id,
            assigned_at,
            converted_at: None,
        }
    }

    pub fn experiment_id(&self) -> &ExperimentId {
        &self.experiment_id
    }

    pub fn visitor_id(&self) -> &VisitorId {
        &self.visitor_id
    }

    pub fn variant_id(&self) -> &VariantId {
        &self.variant_id
    }

    pub fn assigned_at(&self) -> DateTime<Utc> {
        self.assigned_at
    }

    pub fn converted_at(&self) -> Option<DateTime<Utc>> {
        self.converted_at
    }

    pub fn is_converted(&self) -> bool {
        self.converted_at.is_some()
    }

    /// Mark the assignment converted; the first call wins
    pub fn mark_converted(&mut self, at: DateTime<Utc>) -> bool {
        if self.converted_at.is_some() {
            return false;
        }
        self.converted_at = Some(at);
        true
    }

    /// Undo a conversion whose follow-up writes failed
    pub fn clear_conversion(&mut self) -> bool {
        self.converted_at.take().is_some()
    }
}

/// Pick a variant by cumulative traffic weight
///
/// `roll` is a uniform sample in `[0, 1)`. When every weight is zero the
/// variants are treated as equally weighted. Returns `None` only for an
/// empty slice.
pub fn select_variant(variants: &[Variant], roll: f64) -> Option<&Variant> {
    let total: u32 = variants.iter().map(|v| u32::from(v.traffic())).sum();
    let weight = |v: &Variant| {
        if total == 0 {
            1.0
        } else {
            f64::from(v.traffic())
        }
    };
    let total = if total == 0 {
        variants.len() as f64
    } else {
        f64::from(total)
    };

    let target = roll.clamp(0.0, 1.0) * total;
    let mut cumulative = 0.0;

    for variant in variants {
        cumulative += weight(variant);
        if target < cumulative {
            return Some(variant);
        }
    }

    // roll == 1.0 or rounding at the upper edge
    variants.iter().rev().find(|v| weight(v) > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn variants(weights: &[(&str, u8)]) -> Vec<Variant> {
        let exp = ExperimentId::new("exp-1").unwrap();
        weights
            .iter()
            .map(|(id, w)| Variant::new(VariantId::new(*id).unwrap(), exp.clone(), *id, *w))
            .collect()
    }

    fn ids(selected: Option<&Variant>) -> Option<&str> {
        selected.map(|v| v.id().as_str())
    }

    #[test]
    fn test_select_variant_respects_weights() {
        let set = variants(&[("control", 20), ("b", 80)]);

        assert_eq!(ids(select_variant(&set, 0.0)), Some("control"));
        assert_eq!(ids(select_variant(&set, 0.1999)), Some("control"));
        assert_eq!(ids(select_variant(&set, 0.2)), Some("b"));
        assert_eq!(ids(select_variant(&set, 0.9999)), Some("b"));
    }

    #[test]
    fn test_select_variant_skips_zero_weight() {
        let set = variants(&[("control", 0), ("b", 100)]);

        assert_eq!(ids(select_variant(&set, 0.0)), Some("b"));
        assert_eq!(ids(select_variant(&set, 1.0)), Some("b"));
    }

    #[test]
    fn test_select_variant_all_zero_weights_is_uniform() {
        let set = variants(&[("control", 0), ("b", 0)]);

        assert_eq!(ids(select_variant(&set, 0.25)), Some("control"));
        assert_eq!(ids(select_variant(&set, 0.75)), Some("b"));
    }

    #[test]
    fn test_select_variant_empty() {
        assert!(select_variant(&[], 0.5).is_none());
    }

    #[test]
    fn test_assignment_conversion_first_write_wins() {
        let first = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut assignment = Assignment::new(
            ExperimentId::new("exp-1").unwrap(),
            VisitorId::new("visitor-1").unwrap(),
            VariantId::new("b").unwrap(),
            first,
        );

        assert!(!assignment.is_converted());
        assert!(assignment.mark_converted(first));
        assert!(!assignment.mark_converted(first + chrono::Duration::hours(1)));
        assert_eq!(assignment.converted_at(), Some(first));
    }
}
