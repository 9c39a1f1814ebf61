use serde::Deserialize;

use super::cargo::{Price, Weight};
use super::error::LifecycleError;

/// Canonical pricing: `weight_kg * rate`. The rate is held in cents per kg.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct PricingRule {
    pub rate_per_kg_cents: u64,
    pub max_weight_kg: f64,
}

impl Default for PricingRule {
    fn default() -> Self {
        Self {
            rate_per_kg_cents: 1_000,
            max_weight_kg: 10_000.0,
        }
    }
}

impl PricingRule {
    pub fn weight(&self, kg: f64) -> Result<Weight, LifecycleError> {
        Weight::new(kg, self.max_weight_kg)
    }

    pub fn quote(&self, weight: Weight) -> Price {
        Price::from_cents((weight.kg() * self.rate_per_kg_cents as f64).round() as u64)
    }
}
