//! ---
//! rio_section: "01-service-model"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Service model types and the service bean contract."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Service model for the Rio provisioning framework: artifact coordinates,
//! component bundles, declarative service elements, cost accounting value
//! objects, and the `ServiceBean` contract every hosted service implements.

pub mod artifact;
pub mod bean;
pub mod bundle;
pub mod cost;
pub mod element;

pub use artifact::ArtifactCoordinate;
pub use bean::{
    BeanError, ComputeContext, MarshalledProxy, ServiceBean, ServiceBeanContext, ServiceProxy,
};
pub use bundle::{BundleError, ComponentBundle};
pub use cost::{ResourceCostModel, TimeBoundary};
pub use element::{CapabilityRequirement, ServiceBeanConfig, ServiceElement};
