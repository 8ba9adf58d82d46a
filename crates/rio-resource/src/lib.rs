//! ---
//! rio_section: "04-compute-resource"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Compute resource aggregation and utilization reporting."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
//! The per-process compute-resource aggregate: platform and measurable
//! capabilities for the host, capability provisioning and removal, and
//! periodic resource-capability reporting to registered listeners.

pub mod compute;
pub mod snapshot;
pub mod system;

pub use compute::{ComputeResource, ResourceCapabilityChangeListener};
pub use snapshot::{ComputeResourceUtilization, ResourceCapability};
pub use system::{CapabilityLoader, SystemCapabilities};

/// Result alias used throughout the resource crate.
pub type Result<T> = std::result::Result<T, ResourceError>;

/// Error type for the compute-resource subsystem.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    /// Wrapper for platform-capability failures.
    #[error(transparent)]
    Platform(#[from] rio_platform::PlatformError),
    /// Wrapper for IO errors while managing capability state.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The compute resource has been shut down.
    #[error("compute resource is shut down")]
    ShutDown,
}
