//! ---
//! rio_section: "01-service-model"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Service model types and the service bean contract."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use std::path::PathBuf;

use indexmap::IndexMap;
use semver::VersionReq;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::bundle::ComponentBundle;

/// Declarative descriptor of a service: implementation bundle, export
/// bundles advertised to clients, repositories to resolve from, and the
/// service-bean configuration. Immutable once resolved for a given load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceElement {
    /// Name of the operational string the service belongs to.
    pub operational_string: String,
    /// Service-bean configuration block.
    pub service_bean_config: ServiceBeanConfig,
    /// Implementation bundle loaded into the service scope.
    pub component_bundle: ComponentBundle,
    /// Bundles advertised to clients for proxy download.
    #[serde(default)]
    pub export_bundles: Vec<ComponentBundle>,
    /// Remote repositories consulted when resolving this element.
    #[serde(default)]
    pub remote_repositories: Vec<Url>,
    /// Platform capabilities the hosting node must satisfy.
    #[serde(default)]
    pub capability_requirements: Vec<CapabilityRequirement>,
    /// Additional advertisement entries supplied by configuration.
    /// Appended verbatim after the framework-assembled entries.
    #[serde(default)]
    pub config_attributes: Vec<serde_json::Value>,
}

impl ServiceElement {
    /// Shorthand for the element's declared implementation artifact, if any.
    pub fn implementation_artifact(&self) -> Option<&crate::ArtifactCoordinate> {
        self.component_bundle.artifact.as_ref()
    }

    /// The first export bundle declaring an artifact, if any.
    pub fn export_artifact(&self) -> Option<&crate::ArtifactCoordinate> {
        self.export_bundles
            .iter()
            .find_map(|bundle| bundle.artifact.as_ref())
    }
}

/// Per-instance configuration for a service bean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServiceBeanConfig {
    /// Advertised service name.
    pub name: String,
    /// Discovery groups the service joins.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Explicit lookup locators.
    #[serde(default)]
    pub locators: Vec<Url>,
    /// Initialization parameters handed to the bean before `start`.
    #[serde(default)]
    pub init_parameters: IndexMap<String, serde_json::Value>,
    /// Configuration parameters visible to the bean at runtime.
    #[serde(default)]
    pub config_parameters: IndexMap<String, serde_json::Value>,
    /// Logging filter directives installed for the service.
    #[serde(default)]
    pub logger_directives: Vec<String>,
    /// Ordinal instance identifier assigned by the provisioner.
    #[serde(default)]
    pub instance_id: Option<u64>,
    /// Optional per-service policy file layered over the global policy.
    #[serde(default)]
    pub service_policy: Option<PathBuf>,
    /// Free-form comment advertised with the service.
    #[serde(default)]
    pub comment: Option<String>,
}

/// A platform-capability requirement declared by a service element.
/// Matched against the hosting node's capabilities before load; matching
/// capabilities contribute their classpath to the service scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRequirement {
    /// Capability kind name (e.g. `OperatingSystem`, `NativeLibrary`).
    pub kind: String,
    /// Required capability name, when the kind alone is not enough.
    #[serde(default)]
    pub name: Option<String>,
    /// Semver requirement evaluated against the capability version.
    #[serde(default)]
    pub version: Option<VersionReq>,
    /// Attribute values that must all be present and equal.
    #[serde(default)]
    pub attributes: IndexMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ArtifactCoordinate;

    fn element_with_artifact(coordinate: &str) -> ServiceElement {
        ServiceElement {
            operational_string: "demo".into(),
            service_bean_config: ServiceBeanConfig {
                name: "svc".into(),
                ..ServiceBeanConfig::default()
            },
            component_bundle: ComponentBundle::for_artifact(
                "svc",
                coordinate.parse::<ArtifactCoordinate>().unwrap(),
            ),
            export_bundles: Vec::new(),
            remote_repositories: Vec::new(),
            capability_requirements: Vec::new(),
            config_attributes: Vec::new(),
        }
    }

    #[test]
    fn implementation_artifact_accessor() {
        let element = element_with_artifact("com.x:svc:1.0");
        assert_eq!(
            element.implementation_artifact().unwrap().to_string(),
            "com.x:svc:1.0"
        );
        assert!(element.export_artifact().is_none());
    }

    #[test]
    fn export_artifact_picks_first_declared() {
        let mut element = element_with_artifact("com.x:svc:1.0");
        element.export_bundles.push(ComponentBundle::for_libraries(
            "svc-proxy",
            Url::parse("http://repo.invalid/dl/").unwrap(),
            vec!["svc-dl.jar".into()],
        ));
        element.export_bundles.push(ComponentBundle::for_artifact(
            "svc-dl",
            "com.x:svc:1.0:dl".parse::<ArtifactCoordinate>().unwrap(),
        ));
        assert_eq!(
            element.export_artifact().unwrap().to_string(),
            "com.x:svc:1.0:dl"
        );
    }
}
