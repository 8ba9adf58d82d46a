//! ---
//! rio_section: "04-compute-resource"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Compute resource aggregation and utilization reporting."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use rio_platform::{MeasuredResource, PlatformCapability};
use serde::{Deserialize, Serialize};

/// Utilization across all measured capabilities: the individual
/// measurements plus their unweighted mean (0 when none are present).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ComputeResourceUtilization {
    pub measured: Vec<MeasuredResource>,
    pub mean: f64,
}

impl ComputeResourceUtilization {
    /// Compute the utilization summary for a set of measurements.
    pub fn from_measurements(measured: Vec<MeasuredResource>) -> Self {
        let mean = if measured.is_empty() {
            0.0
        } else {
            measured.iter().map(|m| m.value).sum::<f64>() / measured.len() as f64
        };
        Self { measured, mean }
    }

    /// Whether any measured value crossed its thresholds.
    pub fn any_threshold_crossed(&self) -> bool {
        self.measured.iter().any(|m| m.threshold_crossed)
    }
}

/// Snapshot of a compute resource's capabilities and utilization. The
/// wire contract between a compute resource and its remote monitors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCapability {
    /// Network address of the node.
    pub address: String,
    /// Hostname of the node.
    pub hostname: String,
    /// Whether the node may stage software and resolve artifacts.
    pub persistent_provisioning: bool,
    /// Platform capabilities currently present.
    pub platform_capabilities: Vec<PlatformCapability>,
    /// Current utilization summary.
    pub utilization: ComputeResourceUtilization,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measured(id: &str, value: f64) -> MeasuredResource {
        MeasuredResource {
            id: id.into(),
            value,
            threshold_crossed: false,
        }
    }

    #[test]
    fn mean_is_unweighted() {
        let utilization = ComputeResourceUtilization::from_measurements(vec![
            measured("cpu", 0.2),
            measured("memory", 0.6),
        ]);
        assert!((utilization.mean - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_measurements_mean_zero() {
        let utilization = ComputeResourceUtilization::from_measurements(Vec::new());
        assert_eq!(utilization.mean, 0.0);
        assert!(!utilization.any_threshold_crossed());
    }
}
