//! ---
//! rio_section: "05-provisioning"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Service bean loading, provisioning cache, and isolation scopes."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rio_api::{ComputeContext, ServiceBean, ServiceBeanContext, ServiceElement, ServiceProxy};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::{LoaderError, Result};

/// Constructor closure producing a blank service bean. Configuration
/// happens afterwards through `ServiceBean::initialize`.
pub type BeanConstructor = Arc<dyn Fn() -> Box<dyn ServiceBean> + Send + Sync>;

/// Registry mapping component names to constructors, resolved at
/// startup. Components are statically linked and registered by name;
/// there is no load-arbitrary-code-by-name primitive.
#[derive(Default)]
pub struct ComponentRegistry {
    constructors: Mutex<HashMap<String, BeanConstructor>>,
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.names())
            .finish()
    }
}

impl ComponentRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under a component name. A later
    /// registration under the same name replaces the earlier one.
    pub fn register(&self, component: impl Into<String>, constructor: BeanConstructor) {
        let component = component.into();
        debug!(component = %component, "component registered");
        self.constructors.lock().insert(component, constructor);
    }

    /// Construct the named component.
    pub fn create(&self, component: &str) -> Result<Box<dyn ServiceBean>> {
        let constructors = self.constructors.lock();
        let constructor =
            constructors
                .get(component)
                .ok_or_else(|| LoaderError::UnknownComponent {
                    component: component.to_owned(),
                })?;
        Ok(constructor())
    }

    /// Registered component names.
    pub fn names(&self) -> Vec<String> {
        self.constructors.lock().keys().cloned().collect()
    }
}

/// Builds the context handed to a service bean. Obtained via
/// configuration; the default assembles the context directly from the
/// element and the compute resource.
pub trait ServiceBeanContextFactory: Send + Sync {
    /// Build the bean context for a load.
    fn create(
        &self,
        element: &ServiceElement,
        service_id: Uuid,
        export_codebase: Vec<Url>,
        compute: Arc<dyn ComputeContext>,
    ) -> ServiceBeanContext;
}

/// Default context factory.
#[derive(Debug, Default)]
pub struct DefaultServiceBeanContextFactory;

impl ServiceBeanContextFactory for DefaultServiceBeanContextFactory {
    fn create(
        &self,
        element: &ServiceElement,
        service_id: Uuid,
        export_codebase: Vec<Url>,
        compute: Arc<dyn ComputeContext>,
    ) -> ServiceBeanContext {
        ServiceBeanContext {
            element: element.clone(),
            service_id,
            export_codebase,
            compute,
        }
    }
}

/// Instantiates the service implementation for a context. Obtained via
/// configuration; the default dispatches through the component registry.
pub trait ServiceBeanFactory: Send + Sync {
    /// Construct the bean for the given context.
    fn create(
        &self,
        context: &ServiceBeanContext,
        registry: &ComponentRegistry,
    ) -> Result<Box<dyn ServiceBean>>;
}

/// Default bean factory: looks the element's component up in the
/// registry.
#[derive(Debug, Default)]
pub struct RegistryServiceBeanFactory;

impl ServiceBeanFactory for RegistryServiceBeanFactory {
    fn create(
        &self,
        context: &ServiceBeanContext,
        registry: &ComponentRegistry,
    ) -> Result<Box<dyn ServiceBean>> {
        registry.create(&context.element.component_bundle.component)
    }
}

/// Prepares a proxy before it is marshalled and handed out.
pub trait ProxyPreparer: Send + Sync {
    /// Prepare the proxy, returning the (possibly rewritten) proxy.
    fn prepare(&self, proxy: ServiceProxy) -> Result<ServiceProxy>;
}

/// Default preparer: returns the proxy unchanged.
#[derive(Debug, Default)]
pub struct BasicProxyPreparer;

impl ProxyPreparer for BasicProxyPreparer {
    fn prepare(&self, proxy: ServiceProxy) -> Result<ServiceProxy> {
        Ok(proxy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use rio_api::BeanError;

    struct NullBean;

    impl ServiceBean for NullBean {
        fn initialize(
            &mut self,
            _context: &ServiceBeanContext,
        ) -> std::result::Result<(), BeanError> {
            Ok(())
        }

        fn proxy(&self) -> ServiceProxy {
            ServiceProxy {
                name: "null".into(),
                service_id: Uuid::nil(),
                endpoint: None,
                properties: IndexMap::new(),
            }
        }
    }

    #[test]
    fn registry_creates_registered_components() {
        let registry = ComponentRegistry::new();
        registry.register("null", Arc::new(|| Box::new(NullBean)));
        assert!(registry.create("null").is_ok());
    }

    #[test]
    fn unknown_component_is_an_error() {
        let registry = ComponentRegistry::new();
        assert!(matches!(
            registry.create("missing"),
            Err(LoaderError::UnknownComponent { .. })
        ));
    }

    #[test]
    fn basic_preparer_passes_through() {
        let proxy = NullBean.proxy();
        let prepared = BasicProxyPreparer.prepare(proxy.clone()).unwrap();
        assert_eq!(prepared, proxy);
    }
}
