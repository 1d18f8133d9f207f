use serde::{Deserialize, Serialize};

use crate::models::{PackageSize, Weight};

/// Surcharge per kilogram, in currency units.
pub const WEIGHT_RATE: f64 = 10.0;

impl PackageSize {
    pub fn base_price(self) -> f64 {
        match self {
            Self::Small => 100.0,
            Self::Medium => 200.0,
            Self::Large => 300.0,
            Self::ExtraLarge => 500.0,
        }
    }
}

/// Distance band offered by the estimator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Distance {
    #[default]
    Local,
    Regional,
    National,
    International,
}

impl Distance {
    pub fn multiplier(self) -> f64 {
        match self {
            Self::Local => 1.0,
            Self::Regional => 1.5,
            Self::National => 2.5,
            Self::International => 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    #[default]
    Standard,
    Express,
    Overnight,
}

impl Priority {
    pub fn multiplier(self) -> f64 {
        match self {
            Self::Standard => 1.0,
            Self::Express => 1.5,
            Self::Overnight => 2.5,
        }
    }
}

/// Price charged at shipment creation: base for the size plus the weight
/// surcharge. Not rounded.
pub fn price(size: PackageSize, weight: Weight) -> f64 {
    size.base_price() + weight.kg() * WEIGHT_RATE
}

/// Standalone estimate with distance and priority applied, rounded to the
/// nearest whole unit.
pub fn estimate(size: PackageSize, weight: Weight, distance: Distance, priority: Priority) -> f64 {
    (price(size, weight) * distance.multiplier() * priority.multiplier()).round()
}

/// Input of the public estimator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateRequest {
    #[serde(default)]
    pub package_size: PackageSize,
    #[serde(default)]
    pub package_weight: Option<serde_json::Value>,
    #[serde(default)]
    pub distance: Distance,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Estimate {
    pub package_size: PackageSize,
    pub package_weight: Weight,
    pub distance: Distance,
    pub priority: Priority,
    pub price: f64,
}

impl EstimateRequest {
    /// Weight as the estimator reads it; numbers and numeric text are
    /// accepted, everything else counts as zero.
    pub fn weight(&self) -> Weight {
        match &self.package_weight {
            Some(serde_json::Value::Number(n)) => n
                .as_f64()
                .and_then(|kg| Weight::new(kg).ok())
                .unwrap_or(Weight::ZERO),
            Some(serde_json::Value::String(s)) => Weight::lenient(s),
            _ => Weight::ZERO,
        }
    }

    pub fn estimate(&self) -> Estimate {
        let weight = self.weight();
        Estimate {
            package_size: self.package_size,
            package_weight: weight,
            distance: self.distance,
            priority: self.priority,
            price: estimate(self.package_size, weight, self.distance, self.priority),
        }
    }
}
