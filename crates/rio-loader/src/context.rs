//! ---
//! rio_section: "05-provisioning"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Service bean loading, provisioning cache, and isolation scopes."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use std::sync::Arc;

use parking_lot::Mutex;
use rio_common::RioConfig;
use rio_metrics::ProvisionMetrics;
use rio_resolver::Resolver;
use rio_resource::ComputeResource;
use rio_service::{InMemoryAdvertiser, InMemoryExporter, ServiceAdvertiser, ServiceExporter};
use tracing::info;
use url::Url;

use crate::factory::{
    BasicProxyPreparer, ComponentRegistry, DefaultServiceBeanContextFactory, ProxyPreparer,
    RegistryServiceBeanFactory, ServiceBeanContextFactory, ServiceBeanFactory,
};
use crate::provisioned::ProvisionState;
use crate::scope::{CommonScope, GlobalPolicy, PolicyRegistry};

/// Factory producing a fresh exporter per loaded service.
pub type ExporterFactory = Arc<dyn Fn() -> Arc<dyn ServiceExporter> + Send + Sync>;

/// The process-wide loading context: the common scope, the policy
/// registry, the provisioning cache with its counter table, the
/// resolver, and the factories service construction goes through.
///
/// This is explicit state with explicit teardown, injected into every
/// load and unload rather than reached as ambient globals. The
/// provisioning cache sits behind one coarse mutex; `provision_service`
/// holds it across the entire resolve-or-reuse sequence.
pub struct LoaderContext {
    config: RioConfig,
    static_mode: bool,
    compute: ComputeResource,
    resolver: Arc<dyn Resolver>,
    registry: Arc<ComponentRegistry>,
    common_scope: Arc<CommonScope>,
    policy_registry: PolicyRegistry,
    provision_state: Mutex<ProvisionState>,
    context_factory: Arc<dyn ServiceBeanContextFactory>,
    bean_factory: Arc<dyn ServiceBeanFactory>,
    proxy_preparer: Arc<dyn ProxyPreparer>,
    advertiser: Arc<dyn ServiceAdvertiser>,
    exporter_factory: ExporterFactory,
    metrics: Option<ProvisionMetrics>,
}

impl std::fmt::Debug for LoaderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderContext")
            .field("static_mode", &self.static_mode)
            .field("components", &self.registry.names())
            .field("cached_entries", &self.provision_state.lock().len())
            .finish()
    }
}

impl LoaderContext {
    /// Context over the given configuration, compute resource, resolver,
    /// and component registry, with built-in defaults for the factories,
    /// the proxy preparer, the advertiser, and the exporter.
    pub fn new(
        config: RioConfig,
        compute: ComputeResource,
        resolver: Arc<dyn Resolver>,
        registry: Arc<ComponentRegistry>,
        metrics: Option<ProvisionMetrics>,
    ) -> Self {
        let static_mode = config.effective_mode().is_static();
        Self {
            config,
            static_mode,
            compute,
            resolver,
            registry,
            common_scope: Arc::new(CommonScope::new(Vec::new())),
            policy_registry: PolicyRegistry::new(GlobalPolicy::default()),
            provision_state: Mutex::new(ProvisionState::default()),
            context_factory: Arc::new(DefaultServiceBeanContextFactory),
            bean_factory: Arc::new(RegistryServiceBeanFactory),
            proxy_preparer: Arc::new(BasicProxyPreparer),
            advertiser: Arc::new(InMemoryAdvertiser::default()),
            exporter_factory: Arc::new(|| {
                Arc::new(InMemoryExporter::default()) as Arc<dyn ServiceExporter>
            }),
            metrics,
        }
    }

    /// Replace the common scope's shared search path.
    pub fn with_common_search_path(mut self, search_path: Vec<Url>) -> Self {
        self.common_scope = Arc::new(CommonScope::new(search_path));
        self
    }

    /// Replace the global policy.
    pub fn with_global_policy(mut self, global: GlobalPolicy) -> Self {
        self.policy_registry = PolicyRegistry::new(global);
        self
    }

    /// Replace the context factory.
    pub fn with_context_factory(mut self, factory: Arc<dyn ServiceBeanContextFactory>) -> Self {
        self.context_factory = factory;
        self
    }

    /// Replace the bean factory.
    pub fn with_bean_factory(mut self, factory: Arc<dyn ServiceBeanFactory>) -> Self {
        self.bean_factory = factory;
        self
    }

    /// Replace the proxy preparer.
    pub fn with_proxy_preparer(mut self, preparer: Arc<dyn ProxyPreparer>) -> Self {
        self.proxy_preparer = preparer;
        self
    }

    /// Replace the advertiser services register with.
    pub fn with_advertiser(mut self, advertiser: Arc<dyn ServiceAdvertiser>) -> Self {
        self.advertiser = advertiser;
        self
    }

    /// Replace the per-service exporter factory.
    pub fn with_exporter_factory(mut self, factory: ExporterFactory) -> Self {
        self.exporter_factory = factory;
        self
    }

    /// The runtime configuration.
    pub fn config(&self) -> &RioConfig {
        &self.config
    }

    /// Whether the context runs in static mode (bundled libraries used
    /// verbatim, resolver never consulted).
    pub fn static_mode(&self) -> bool {
        self.static_mode
    }

    /// Whether artifact resolution is permitted at all.
    pub fn supports_persistent_provisioning(&self) -> bool {
        self.config.persistent_provisioning
    }

    /// Override used to synthesize missing baseline download URLs.
    pub fn codebase_override(&self) -> Option<&Url> {
        self.config.codebase_override.as_ref()
    }

    /// The hosting compute resource.
    pub fn compute(&self) -> &ComputeResource {
        &self.compute
    }

    /// The artifact resolver.
    pub fn resolver(&self) -> Arc<dyn Resolver> {
        self.resolver.clone()
    }

    /// The component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// The process-wide common scope.
    pub fn common_scope(&self) -> &Arc<CommonScope> {
        &self.common_scope
    }

    /// The scope-policy registry.
    pub fn policy_registry(&self) -> &PolicyRegistry {
        &self.policy_registry
    }

    /// The provisioning cache and counter table, behind the coarse lock.
    pub fn provision_state(&self) -> &Mutex<ProvisionState> {
        &self.provision_state
    }

    /// The context factory.
    pub fn context_factory(&self) -> &Arc<dyn ServiceBeanContextFactory> {
        &self.context_factory
    }

    /// The bean factory.
    pub fn bean_factory(&self) -> &Arc<dyn ServiceBeanFactory> {
        &self.bean_factory
    }

    /// The proxy preparer.
    pub fn proxy_preparer(&self) -> &Arc<dyn ProxyPreparer> {
        &self.proxy_preparer
    }

    /// The advertiser services register with.
    pub fn advertiser(&self) -> Arc<dyn ServiceAdvertiser> {
        self.advertiser.clone()
    }

    /// A fresh exporter for a service being loaded.
    pub fn new_exporter(&self) -> Arc<dyn ServiceExporter> {
        (self.exporter_factory)()
    }

    /// Provisioning metrics, when wired.
    pub fn metrics(&self) -> Option<&ProvisionMetrics> {
        self.metrics.as_ref()
    }

    /// Drop all cached provisioning state and installed policies.
    pub fn teardown(&self) {
        self.provision_state.lock().clear();
        self.policy_registry.clear();
        info!("loader context torn down");
    }
}
