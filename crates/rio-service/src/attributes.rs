//! ---
//! rio_section: "06-service-lifecycle"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Service bean lifecycle state machine and advertisement."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

/// An entry advertised alongside a service proxy. The adapter assembles
/// these in a fixed order; sources append and duplicates of the same
/// entry type are intentionally not deduplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "kebab-case")]
pub enum ServiceAttribute {
    /// Names of the watches the service exposes for monitoring UIs.
    WatchDescriptor {
        watches: Vec<String>,
    },
    /// Operational string the service belongs to.
    OperationalString {
        name: String,
    },
    /// Hosting compute-resource information.
    ComputeResourceInfo {
        address: String,
        hostname: String,
        utilization: f64,
    },
    /// Hosting machine entry.
    Host {
        hostname: String,
    },
    /// Advertised service name.
    Name {
        name: String,
    },
    /// Free-form comment.
    Comment {
        comment: String,
    },
    /// Component type of the implementation.
    ServiceType {
        type_name: String,
    },
    /// Service build information.
    ServiceInfo {
        name: String,
        version: String,
        instance_id: Option<u64>,
    },
    /// Entries supplied by context or configuration, appended verbatim.
    Custom {
        value: serde_json::Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_serialize_with_entry_tag() {
        let attribute = ServiceAttribute::Name {
            name: "calc".into(),
        };
        let value = serde_json::to_value(&attribute).unwrap();
        assert_eq!(value["entry"], "name");
        assert_eq!(value["name"], "calc");
    }
}
