//! ---
//! rio_section: "05-provisioning"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Service bean loading, provisioning cache, and isolation scopes."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
//! Dynamic service bean loading: artifact provisioning with a
//! reference-counted process-wide cache, per-service isolation scopes
//! layered on a common scope, split security policies, factory-based
//! instantiation, and the `unload` path that reverses all of it.

use std::path::PathBuf;

pub mod context;
pub mod factory;
pub mod loader;
pub mod provisioned;
pub mod scope;

pub use context::{ExporterFactory, LoaderContext};
pub use factory::{
    BasicProxyPreparer, BeanConstructor, ComponentRegistry, DefaultServiceBeanContextFactory,
    ProxyPreparer, RegistryServiceBeanFactory, ServiceBeanContextFactory, ServiceBeanFactory,
};
pub use loader::{LoaderResult, ServiceBeanLoader, ServiceResources};
pub use provisioned::ProvisionedResources;
pub use scope::{
    current_scope, CommonScope, GlobalPolicy, PolicyRegistry, ScopeGuard, ScopePolicy,
    ServiceScope,
};

/// Result alias for loader-internal operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Error type for provisioning and loading operations.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// The element requires artifact resolution but the container does
    /// not support persistent provisioning. Raised before the resolver
    /// is contacted and before any partial state exists.
    #[error("artifact '{artifact}' requires resolution but persistent provisioning is unsupported")]
    ProvisioningNotSupported {
        /// The artifact that would have required resolution.
        artifact: String,
    },
    /// The resolver failed to resolve an artifact.
    #[error("resolution failed for '{artifact}'")]
    Resolution {
        /// The coordinate that failed.
        artifact: String,
        /// Resolver-level cause.
        #[source]
        source: rio_resolver::ResolverError,
    },
    /// A bundle could not produce its library URLs.
    #[error(transparent)]
    Bundle(#[from] rio_api::BundleError),
    /// No constructor is registered for the element's component.
    #[error("no component registered under '{component}'")]
    UnknownComponent {
        /// The unregistered component name.
        component: String,
    },
    /// A service policy file could not be loaded.
    #[error("failed to load service policy {path}")]
    Policy {
        /// The policy file path.
        path: PathBuf,
        /// IO-level cause.
        #[source]
        source: std::io::Error,
    },
    /// A resolved library path could not be expressed as a URL.
    #[error("library path {path} cannot be expressed as a url")]
    InvalidLibraryPath {
        /// The offending path.
        path: PathBuf,
    },
    /// A codebase URL could not be synthesized from the override.
    #[error("cannot synthesize '{library}' from codebase override")]
    CodebaseSynthesis {
        /// The baseline library that could not be synthesized.
        library: String,
        /// URL join failure.
        #[source]
        source: url::ParseError,
    },
    /// Proxy preparation failed.
    #[error("proxy preparation failed")]
    ProxyPreparation(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Single failure type for `load`: any error during provisioning,
/// scope construction, policy installation, factory construction, or
/// proxy preparation, wrapped with the root cause preserved.
#[derive(Debug, thiserror::Error)]
#[error("service bean instantiation failed for '{service}'")]
pub struct ServiceBeanInstantiationError {
    /// The service whose load failed.
    pub service: String,
    /// Root cause of the failure.
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl ServiceBeanInstantiationError {
    /// Wrap a failure cause for the named service.
    pub fn new(
        service: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self {
            service: service.into(),
            source,
        }
    }

    /// Whether the root cause is the fail-fast provisioning gate.
    pub fn is_provisioning_not_supported(&self) -> bool {
        matches!(
            self.source.downcast_ref::<LoaderError>(),
            Some(LoaderError::ProvisioningNotSupported { .. })
        )
    }
}
