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

use rio_api::{ArtifactCoordinate, MarshalledProxy, ServiceBeanContext, ServiceElement};
use rio_service::{ServiceBeanAdapter, ServiceBeanManager};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::context::LoaderContext;
use crate::provisioned::{ProvisionState, ProvisionedResources};
use crate::scope::{path_to_url, ScopeGuard, ScopePolicy, ServiceScope};
use crate::{LoaderError, Result, ServiceBeanInstantiationError};

/// Baseline download libraries every non-artifact service must expose so
/// remote clients can reconstruct the framework and lookup stubs.
const BASELINE_DOWNLOAD_LIBRARIES: &[&str] = &["rio-api-dl.jar", "rio-lookup-dl.jar"];

/// Resolved resource pair for a service: its implementation resources
/// and its export ("dl") resources.
#[derive(Debug, Clone)]
pub struct ServiceResources {
    /// Resources backing the implementation scope.
    pub implementation: Arc<ProvisionedResources>,
    /// Resources advertised to clients for proxy download.
    pub export: Arc<ProvisionedResources>,
}

/// Everything a successful load produces: the bean context, the running
/// adapter, the marshalled proxy, the effective service identity, and
/// the service scope to hand back to `unload`.
pub struct LoaderResult {
    /// The context the bean was initialized with.
    pub context: ServiceBeanContext,
    /// The lifecycle adapter wrapping the bean; already `Started`.
    pub adapter: Arc<ServiceBeanAdapter>,
    /// The prepared, marshalled proxy.
    pub marshalled_proxy: MarshalledProxy,
    /// Effective service identity (referent identity when supplied).
    pub service_id: Uuid,
    /// The service's isolation scope.
    pub scope: Arc<ServiceScope>,
}

impl std::fmt::Debug for LoaderResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderResult")
            .field("service_id", &self.service_id)
            .field("scope", &self.scope.name())
            .finish()
    }
}

/// Loads service beans into isolated scopes and reverses the process on
/// unload.
pub struct ServiceBeanLoader;

impl ServiceBeanLoader {
    /// Load a service: provision its resources, build its isolation
    /// scope, install its policy, construct and start the bean, and
    /// prepare and marshal its proxy.
    ///
    /// Any failure is wrapped into a single
    /// [`ServiceBeanInstantiationError`] with the root cause preserved;
    /// the thread's current scope is restored on every exit path.
    pub fn load(
        element: &ServiceElement,
        proposed_id: Uuid,
        manager: Arc<dyn ServiceBeanManager>,
        container: &LoaderContext,
    ) -> std::result::Result<LoaderResult, ServiceBeanInstantiationError> {
        let service = element.service_bean_config.name.clone();
        Self::load_inner(element, proposed_id, manager, container).map_err(|source| {
            if let Some(metrics) = container.metrics() {
                metrics.inc_instantiation_failure();
            }
            ServiceBeanInstantiationError::new(service, source)
        })
    }

    fn load_inner(
        element: &ServiceElement,
        proposed_id: Uuid,
        manager: Arc<dyn ServiceBeanManager>,
        container: &LoaderContext,
    ) -> std::result::Result<LoaderResult, Box<dyn std::error::Error + Send + Sync>> {
        let resources = Self::provision_service(container, element)?;

        // Classpath: implementation jars plus the classpath of every
        // platform capability matching the element, deduplicated by URL.
        let mut search_path: Vec<Url> = Vec::new();
        for url in resources.implementation.jars() {
            if !search_path.contains(url) {
                search_path.push(url.clone());
            }
        }
        for capability in container
            .compute()
            .matching_capabilities(&element.capability_requirements)
        {
            for path in &capability.classpath {
                match path_to_url(path) {
                    Some(url) => {
                        if !search_path.contains(&url) {
                            search_path.push(url);
                        }
                    }
                    None => {
                        debug!(path = %path.display(), "capability classpath entry skipped");
                    }
                }
            }
        }

        let export_annotations = resources.export.jars().to_vec();
        let scope = Arc::new(ServiceScope::new(
            &element.service_bean_config.name,
            container.common_scope().clone(),
            search_path,
            export_annotations.clone(),
        ));

        // The scope is current for the duration of construction; the
        // guard restores the previous scope on every exit path.
        let _guard = ScopeGuard::enter(scope.clone());

        if let Some(policy_file) = &element.service_bean_config.service_policy {
            let policy = ScopePolicy::load(policy_file, container.policy_registry().global())
                .map_err(|source| LoaderError::Policy {
                    path: policy_file.clone(),
                    source,
                })?;
            container.policy_registry().install(scope.id(), policy);
        }

        let context = container.context_factory().create(
            element,
            proposed_id,
            export_annotations.clone(),
            Arc::new(container.compute().clone()),
        );
        let bean = container.bean_factory().create(&context, container.registry())?;
        let adapter = Arc::new(ServiceBeanAdapter::new(
            bean,
            context.clone(),
            manager,
            container.advertiser(),
            container.new_exporter(),
            container.config().unexport.clone(),
            Some(container.compute().clone()),
        ));

        let proxy = adapter.start()?;
        let proxy = container.proxy_preparer().prepare(proxy)?;
        let service_id = adapter.service_id();
        let marshalled_proxy = MarshalledProxy::marshal(&proxy, export_annotations)?;

        if let Some(metrics) = container.metrics() {
            metrics.inc_loaded();
        }
        info!(
            service = %element.service_bean_config.name,
            %service_id,
            scope = %scope.id(),
            "service bean loaded"
        );
        Ok(LoaderResult {
            context,
            adapter,
            marshalled_proxy,
            service_id,
            scope,
        })
    }

    /// Reverse a load: remove the scope's policy entry, decrement the
    /// reference counts for the service's provisioned resources (evicting
    /// cache entries that reach zero), and release the resolver's caches
    /// for the involved artifacts without blocking the caller.
    pub fn unload(scope: &ServiceScope, element: &ServiceElement, container: &LoaderContext) {
        if !container.policy_registry().remove(scope.id()) {
            debug!(scope = %scope.id(), "no policy entry for scope");
        }

        let mut release = Vec::new();
        {
            let mut state = container.provision_state().lock();
            for key in Self::provision_keys(container, element) {
                match key {
                    ProvisionKey::Counted(key) => {
                        let evicted = state.decrement(&key);
                        release.push(key.clone());
                        debug!(key = %key, evicted, "provisioning count decremented");
                    }
                    ProvisionKey::Ephemeral(key) => {
                        // Snapshot entries were never cached or counted.
                        release.push(key);
                    }
                }
            }
        }

        if !release.is_empty() {
            let resolver = container.resolver();
            std::thread::spawn(move || resolver.release_caches(&release));
        }

        if let Some(metrics) = container.metrics() {
            metrics.inc_unloaded();
        }
        info!(scope = %scope.id(), service = %element.service_bean_config.name, "service bean unloaded");
    }

    /// Resolve (or reuse) the implementation and export resources for an
    /// element. The entire sequence, including resolution I/O, runs under
    /// the context's coarse provisioning lock so concurrent loads of the
    /// same fresh artifact cannot double-resolve or double-register.
    pub fn provision_service(
        container: &LoaderContext,
        element: &ServiceElement,
    ) -> Result<ServiceResources> {
        let mut state = container.provision_state().lock();

        if container.static_mode() {
            // Bundled libraries verbatim; the resolver is never
            // consulted and export resolution is empty.
            let implementation = Self::reuse_or_insert_static(
                &mut state,
                static_impl_key(element),
                element.component_bundle.library_urls()?,
            );
            let export = Self::reuse_or_insert_static(
                &mut state,
                static_export_key(element),
                Vec::new(),
            );
            return Ok(ServiceResources {
                implementation,
                export,
            });
        }

        let implementation = match element.implementation_artifact() {
            Some(artifact) => {
                Self::resolve_or_reuse(&mut state, container, element, artifact)?
            }
            None => Self::reuse_or_insert_static(
                &mut state,
                static_impl_key(element),
                element.component_bundle.library_urls()?,
            ),
        };

        let export = match (element.export_artifact(), element.implementation_artifact()) {
            (Some(artifact), _) => {
                let artifact = artifact.clone();
                Self::resolve_or_reuse(&mut state, container, element, &artifact)?
            }
            (None, Some(_)) => {
                // An implementation artifact with no export artifact
                // defaults to the framework API artifact at the running
                // version, resolved through the same path.
                let artifact = ArtifactCoordinate::rio_api();
                Self::resolve_or_reuse(&mut state, container, element, &artifact)?
            }
            (None, None) => {
                let jars = Self::export_library_urls(container, element)?;
                Self::reuse_or_insert_static(&mut state, static_export_key(element), jars)
            }
        };

        Ok(ServiceResources {
            implementation,
            export,
        })
    }

    /// Resolve an artifact, or reuse its cached resources. Snapshot
    /// artifacts bypass the cache entirely: resolved fresh on every load,
    /// never registered, never counted.
    fn resolve_or_reuse(
        state: &mut ProvisionState,
        container: &LoaderContext,
        element: &ServiceElement,
        artifact: &ArtifactCoordinate,
    ) -> Result<Arc<ProvisionedResources>> {
        // Resolution is gated before the resolver (or the cache) is
        // consulted; no partial state exists when this fires.
        if !container.supports_persistent_provisioning() {
            return Err(LoaderError::ProvisioningNotSupported {
                artifact: artifact.to_string(),
            });
        }

        let repositories = if element.remote_repositories.is_empty() {
            container.config().repositories.clone()
        } else {
            element.remote_repositories.clone()
        };
        let key = artifact.key();

        if artifact.is_snapshot() {
            let jars = Self::resolve_jars(container, artifact, &repositories)?;
            let resources = Arc::new(ProvisionedResources::new(
                key,
                Some(artifact.clone()),
                jars,
            ));
            resources.add_repositories(&repositories);
            if let Some(metrics) = container.metrics() {
                metrics.inc_resolution("snapshot");
            }
            return Ok(resources);
        }

        if let Some(existing) = state.get(&key) {
            state.increment(&key);
            existing.add_repositories(&repositories);
            if let Some(metrics) = container.metrics() {
                metrics.inc_resolution("cached");
            }
            debug!(artifact = %key, count = state.count(&key), "provisioned resources reused");
            return Ok(existing);
        }

        let jars = Self::resolve_jars(container, artifact, &repositories)?;
        let resources = Arc::new(ProvisionedResources::new(
            key.clone(),
            Some(artifact.clone()),
            jars,
        ));
        resources.add_repositories(&repositories);
        state.register(resources.clone());
        if let Some(metrics) = container.metrics() {
            metrics.inc_resolution("resolved");
        }
        debug!(artifact = %key, "provisioned resources registered");
        Ok(resources)
    }

    fn resolve_jars(
        container: &LoaderContext,
        artifact: &ArtifactCoordinate,
        repositories: &[Url],
    ) -> Result<Vec<Url>> {
        let paths = container
            .resolver()
            .resolve(artifact, repositories)
            .map_err(|source| LoaderError::Resolution {
                artifact: artifact.to_string(),
                source,
            })?;
        paths
            .iter()
            .map(|path| {
                path_to_url(path).ok_or_else(|| LoaderError::InvalidLibraryPath {
                    path: path.clone(),
                })
            })
            .collect()
    }

    fn reuse_or_insert_static(
        state: &mut ProvisionState,
        key: String,
        jars: Vec<Url>,
    ) -> Arc<ProvisionedResources> {
        if let Some(existing) = state.get(&key) {
            state.increment(&key);
            return existing;
        }
        let resources = Arc::new(ProvisionedResources::new(key, None, jars));
        state.register(resources.clone());
        resources
    }

    /// Export URLs for a non-artifact service: the declared export
    /// bundles, with the baseline download libraries synthesized from
    /// the codebase override when missing.
    fn export_library_urls(
        container: &LoaderContext,
        element: &ServiceElement,
    ) -> Result<Vec<Url>> {
        let mut jars = Vec::new();
        for bundle in &element.export_bundles {
            for url in bundle.library_urls()? {
                if !jars.contains(&url) {
                    jars.push(url);
                }
            }
        }
        for baseline in BASELINE_DOWNLOAD_LIBRARIES {
            let present = jars.iter().any(|url| url.path().ends_with(baseline));
            if present {
                continue;
            }
            match container.codebase_override() {
                Some(codebase) => {
                    let url = codebase.join(baseline).map_err(|source| {
                        LoaderError::CodebaseSynthesis {
                            library: (*baseline).to_owned(),
                            source,
                        }
                    })?;
                    debug!(library = baseline, url = %url, "baseline download library synthesized");
                    jars.push(url);
                }
                None => {
                    warn!(
                        service = %element.service_bean_config.name,
                        library = baseline,
                        "baseline download library missing and no codebase override configured"
                    );
                }
            }
        }
        Ok(jars)
    }

    /// The cache keys a load of this element touches, mirroring the key
    /// selection of `provision_service`.
    fn provision_keys(container: &LoaderContext, element: &ServiceElement) -> Vec<ProvisionKey> {
        if container.static_mode() {
            return vec![
                ProvisionKey::Counted(static_impl_key(element)),
                ProvisionKey::Counted(static_export_key(element)),
            ];
        }
        let mut keys = Vec::new();
        keys.push(match element.implementation_artifact() {
            Some(artifact) if artifact.is_snapshot() => ProvisionKey::Ephemeral(artifact.key()),
            Some(artifact) => ProvisionKey::Counted(artifact.key()),
            None => ProvisionKey::Counted(static_impl_key(element)),
        });
        keys.push(
            match (element.export_artifact(), element.implementation_artifact()) {
                (Some(artifact), _) if artifact.is_snapshot() => {
                    ProvisionKey::Ephemeral(artifact.key())
                }
                (Some(artifact), _) => ProvisionKey::Counted(artifact.key()),
                (None, Some(_)) => ProvisionKey::Counted(ArtifactCoordinate::rio_api().key()),
                (None, None) => ProvisionKey::Counted(static_export_key(element)),
            },
        );
        keys
    }
}

enum ProvisionKey {
    /// Registered in the cache and reference counted.
    Counted(String),
    /// Snapshot resolution: never cached, never counted.
    Ephemeral(String),
}

fn static_impl_key(element: &ServiceElement) -> String {
    format!("static:{}", element.component_bundle.component)
}

fn static_export_key(element: &ServiceElement) -> String {
    format!("static-dl:{}", element.component_bundle.component)
}
