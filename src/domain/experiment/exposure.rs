//! Exposure records: a visitor actually saw a variant

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{ExperimentId, ExposureId, VariantId, VisitorId};

/// One observation of a variant by a visitor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Exposure {
    id: ExposureId,
    experiment_id: ExperimentId,
    variant_id: VariantId,
    visitor_id: VisitorId,
    exposed_at: DateTime<Utc>,
    #[serde(default)]
    converted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    converted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conversion_value: Option<f64>,
}

impl Exposure {
    /// Create a new, unconverted exposure with a generated ID
    pub fn new(
        experiment_id: ExperimentId,
        variant_id: VariantId,
        visitor_id: VisitorId,
        exposed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ExposureId::generate(),
            experiment_id,
            variant_id,
            visitor_id,
            exposed_at,
            converted: false,
            converted_at: None,
            conversion_value: None,
        }
    }

    pub fn id(&self) -> ExposureId {
        self.id
    }

    pub fn experiment_id(&self) -> &ExperimentId {
        &self.experiment_id
    }

    pub fn variant_id(&self) -> &VariantId {
        &self.variant_id
    }

    pub fn visitor_id(&self) -> &VisitorId {
        &self.visitor_id
    }

    pub fn exposed_at(&self) -> DateTime<Utc> {
        self.exposed_at
    }

    pub fn is_converted(&self) -> bool {
        self.converted
    }

    pub fn converted_at(&self) -> Option<DateTime<Utc>> {
        self.converted_at
    }

    pub fn conversion_value(&self) -> Option<f64> {
        self.conversion_value
    }

    /// Flip the exposure to converted; later conversions are ignored
    pub fn mark_converted(&mut self, value: Option<f64>, at: DateTime<Utc>) -> bool {
        if self.converted {
            return false;
        }
        self.converted = true;
        self.converted_at = Some(at);
        self.conversion_value = value;
        true
    }
}
