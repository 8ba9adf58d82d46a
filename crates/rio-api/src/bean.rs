//! ---
//! rio_section: "01-service-model"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Service model types and the service bean contract."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::element::ServiceElement;

/// Errors surfaced by service bean lifecycle callbacks.
#[derive(Debug, Error)]
pub enum BeanError {
    /// The bean rejected its initialization parameters.
    #[error("invalid initialization parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The offending parameter name.
        parameter: String,
        /// Why it was rejected.
        reason: String,
    },
    /// A lifecycle callback failed.
    #[error("lifecycle callback '{callback}' failed")]
    Callback {
        /// The callback that failed.
        callback: &'static str,
        /// Underlying cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Proxy marshalling failed.
    #[error("proxy marshalling failed")]
    Marshalling(#[from] serde_json::Error),
}

/// Host information the hosting container exposes to service beans.
/// Implemented by the compute resource.
pub trait ComputeContext: Send + Sync {
    /// Network address of the hosting node.
    fn address(&self) -> String;
    /// Hostname of the hosting node.
    fn hostname(&self) -> String;
    /// Current mean resource utilization across measured capabilities.
    fn utilization(&self) -> f64;
}

/// Context handed to a service bean at initialization: its element, the
/// effective service identity, the export codebase clients download the
/// proxy from, and a handle onto the hosting compute resource.
#[derive(Clone)]
pub struct ServiceBeanContext {
    /// The resolved element this bean was instantiated from.
    pub element: ServiceElement,
    /// Proposed service identity. May be superseded by a referent uuid.
    pub service_id: Uuid,
    /// Export codebase URLs annotated on the service scope.
    pub export_codebase: Vec<Url>,
    /// Hosting node information.
    pub compute: Arc<dyn ComputeContext>,
}

impl std::fmt::Debug for ServiceBeanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBeanContext")
            .field("element", &self.element.service_bean_config.name)
            .field("service_id", &self.service_id)
            .field("export_codebase", &self.export_codebase)
            .finish()
    }
}

/// Contract implemented by every hosted service. Lifecycle callbacks are
/// invoked by the service adapter in state-machine order; all except
/// `initialize` have default no-op implementations.
pub trait ServiceBean: Send + Sync {
    /// Called once, before any other callback, with the bean's context.
    fn initialize(&mut self, context: &ServiceBeanContext) -> Result<(), BeanError>;

    /// Called after initialization completes.
    fn start(&mut self) -> Result<(), BeanError> {
        Ok(())
    }

    /// Called when the service has been advertised to lookups.
    fn advertised(&mut self) {}

    /// Called when the service has been unadvertised.
    fn unadvertised(&mut self) {}

    /// Called during teardown, before the scope is released.
    fn stop(&mut self) {}

    /// A bean that manages its own identity returns it here; the loader
    /// adopts it as the effective service id in place of the proposed one.
    fn referent_uuid(&self) -> Option<Uuid> {
        None
    }

    /// Produce the proxy descriptor advertised to clients.
    fn proxy(&self) -> ServiceProxy;
}

/// Serializable proxy descriptor clients use to reach a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceProxy {
    /// Advertised service name.
    pub name: String,
    /// Effective service identity.
    pub service_id: Uuid,
    /// Endpoint the proxy connects to, when the service exposes one.
    #[serde(default)]
    pub endpoint: Option<Url>,
    /// Free-form proxy properties.
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

/// A marshalled proxy: the serialized descriptor plus the codebase
/// annotations a client needs to reconstruct a download path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarshalledProxy {
    /// JSON-serialized [`ServiceProxy`] payload.
    pub payload: Vec<u8>,
    /// Codebase URLs the proxy was annotated with.
    pub codebase: Vec<Url>,
}

impl MarshalledProxy {
    /// Marshal a proxy descriptor with its codebase annotations.
    pub fn marshal(proxy: &ServiceProxy, codebase: Vec<Url>) -> Result<Self, BeanError> {
        Ok(Self {
            payload: serde_json::to_vec(proxy)?,
            codebase,
        })
    }

    /// Reconstruct the proxy descriptor.
    pub fn unmarshal(&self) -> Result<ServiceProxy, BeanError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}
