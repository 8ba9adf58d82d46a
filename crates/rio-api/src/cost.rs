//! ---
//! rio_section: "01-service-model"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Service model types and the service bean contract."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-unit cost accounting for a capability. The effective cost per unit
/// scales with how long the resource has been in use: the multiplier of
/// the highest boundary at or below the usage duration applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCostModel {
    /// Human-readable description of what is being accounted.
    pub description: String,
    /// Base cost per unit of the resource.
    pub cost_per_unit: f64,
    /// Duration boundaries, sorted ascending by `boundary`.
    #[serde(default)]
    pub boundaries: Vec<TimeBoundary>,
}

impl ResourceCostModel {
    /// A flat-rate model with no time boundaries.
    pub fn flat(description: impl Into<String>, cost_per_unit: f64) -> Self {
        Self {
            description: description.into(),
            cost_per_unit,
            boundaries: Vec::new(),
        }
    }

    /// Effective cost per unit after the given usage duration.
    pub fn cost_per_unit_at(&self, duration: Duration) -> f64 {
        let multiplier = self
            .boundaries
            .iter()
            .filter(|boundary| boundary.boundary <= duration)
            .map(|boundary| boundary.multiplier)
            .last()
            .unwrap_or(1.0);
        self.cost_per_unit * multiplier
    }

    /// Total cost for `units` consumed over `duration`.
    pub fn cost(&self, units: f64, duration: Duration) -> f64 {
        units * self.cost_per_unit_at(duration)
    }
}

/// A duration boundary and the multiplier that applies once usage
/// reaches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBoundary {
    /// Usage duration at which the multiplier takes effect.
    #[serde(with = "duration_secs")]
    pub boundary: Duration,
    /// Cost multiplier applied from this boundary onward.
    pub multiplier: f64,
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        value.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ResourceCostModel {
        ResourceCostModel {
            description: "cpu units".into(),
            cost_per_unit: 2.0,
            boundaries: vec![
                TimeBoundary {
                    boundary: Duration::from_secs(60),
                    multiplier: 1.5,
                },
                TimeBoundary {
                    boundary: Duration::from_secs(3600),
                    multiplier: 4.0,
                },
            ],
        }
    }

    #[test]
    fn flat_rate_before_first_boundary() {
        assert_eq!(model().cost_per_unit_at(Duration::from_secs(10)), 2.0);
    }

    #[test]
    fn highest_applicable_boundary_wins() {
        assert_eq!(model().cost_per_unit_at(Duration::from_secs(90)), 3.0);
        assert_eq!(model().cost_per_unit_at(Duration::from_secs(7200)), 8.0);
    }

    #[test]
    fn total_cost_scales_with_units() {
        assert_eq!(model().cost(10.0, Duration::from_secs(90)), 30.0);
    }
}
