//! ---
//! rio_section: "05-provisioning"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Service bean loading, provisioning cache, and isolation scopes."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use rio_api::{
    ArtifactCoordinate, BeanError, ComponentBundle, ServiceBean, ServiceBeanConfig,
    ServiceBeanContext, ServiceElement, ServiceProxy,
};
use rio_common::{Mode, RioConfig};
use rio_loader::{
    current_scope, ComponentRegistry, LoaderContext, LoaderError, ServiceBeanLoader, ServiceScope,
};
use rio_resolver::{LocalRepositoryResolver, Resolver, ResolverError};
use rio_resource::ComputeResource;
use rio_service::ServiceBeanManager;
use tempfile::TempDir;
use url::Url;
use uuid::Uuid;

struct CalcBean;

impl ServiceBean for CalcBean {
    fn initialize(&mut self, _context: &ServiceBeanContext) -> Result<(), BeanError> {
        Ok(())
    }

    fn proxy(&self) -> ServiceProxy {
        ServiceProxy {
            name: "calc".into(),
            service_id: Uuid::nil(),
            endpoint: None,
            properties: IndexMap::new(),
        }
    }
}

struct NullManager;

impl ServiceBeanManager for NullManager {
    fn service_discarded(&self, _service_id: Uuid) {}
}

/// Resolver wrapper counting how often the underlying resolver is hit.
struct CountingResolver {
    inner: LocalRepositoryResolver,
    calls: AtomicUsize,
}

impl CountingResolver {
    fn new(root: &std::path::Path) -> Self {
        Self {
            inner: LocalRepositoryResolver::new(root),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Resolver for CountingResolver {
    fn resolve(
        &self,
        artifact: &ArtifactCoordinate,
        repositories: &[Url],
    ) -> Result<Vec<PathBuf>, ResolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve(artifact, repositories)
    }

    fn classpath_for(&self, artifact: &ArtifactCoordinate) -> Result<Vec<PathBuf>, ResolverError> {
        self.inner.classpath_for(artifact)
    }

    fn release_caches(&self, artifacts: &[String]) {
        self.inner.release_caches(artifacts)
    }
}

struct Fixture {
    _repo: TempDir,
    resolver: Arc<CountingResolver>,
    container: LoaderContext,
}

fn fixture_with(config: RioConfig) -> Fixture {
    let repo = TempDir::new().unwrap();
    let resolver = Arc::new(CountingResolver::new(repo.path()));
    // The framework API artifact backs default export resolution.
    resolver
        .inner
        .install(&ArtifactCoordinate::rio_api(), b"rio-api")
        .unwrap();
    resolver
        .inner
        .install(&"com.x:svc:1.0".parse().unwrap(), b"svc-1.0")
        .unwrap();
    resolver
        .inner
        .install(&"com.x:svc:1.0:dl".parse().unwrap(), b"svc-1.0-dl")
        .unwrap();
    resolver
        .inner
        .install(&"com.x:svc:2.0-SNAPSHOT".parse().unwrap(), b"svc-snap")
        .unwrap();

    let registry = Arc::new(ComponentRegistry::new());
    registry.register("calc", Arc::new(|| Box::new(CalcBean)));

    let compute = ComputeResource::new(&config);
    let container = LoaderContext::new(config, compute, resolver.clone(), registry, None);
    Fixture {
        _repo: repo,
        resolver,
        container,
    }
}

fn fixture() -> Fixture {
    fixture_with(RioConfig::default())
}

fn element(name: &str, artifact: Option<&str>) -> ServiceElement {
    let bundle = match artifact {
        Some(coordinate) => {
            ComponentBundle::for_artifact("calc", coordinate.parse().unwrap())
        }
        None => ComponentBundle::for_libraries(
            "calc",
            Url::parse("http://repo.invalid/bundles/").unwrap(),
            vec!["calc.jar".into()],
        ),
    };
    ServiceElement {
        operational_string: "demo".into(),
        service_bean_config: ServiceBeanConfig {
            name: name.into(),
            ..ServiceBeanConfig::default()
        },
        component_bundle: bundle,
        export_bundles: Vec::new(),
        remote_repositories: Vec::new(),
        capability_requirements: Vec::new(),
        config_attributes: Vec::new(),
    }
}

fn element_with_export(name: &str, artifact: &str, export: &str) -> ServiceElement {
    let mut element = element(name, Some(artifact));
    element
        .export_bundles
        .push(ComponentBundle::for_artifact("calc-dl", export.parse().unwrap()));
    element
}

#[test]
fn non_snapshot_artifact_is_shared_and_reference_counted() {
    let fixture = fixture();
    let element_a = element_with_export("svc-a", "com.x:svc:1.0", "com.x:svc:1.0:dl");
    let element_b = element_with_export("svc-b", "com.x:svc:1.0", "com.x:svc:1.0:dl");

    let first = ServiceBeanLoader::provision_service(&fixture.container, &element_a).unwrap();
    let second = ServiceBeanLoader::provision_service(&fixture.container, &element_b).unwrap();

    assert!(Arc::ptr_eq(&first.implementation, &second.implementation));
    assert!(Arc::ptr_eq(&first.export, &second.export));
    // One resolver hit per artifact; the second load reused the cache.
    assert_eq!(fixture.resolver.calls(), 2);

    let state = fixture.container.provision_state();
    assert_eq!(state.lock().count("com.x:svc:1.0"), 2);
    assert_eq!(state.lock().count("com.x:svc:1.0:dl"), 2);

    // First unload drops the counts without evicting.
    let scope_a = dummy_scope(&fixture.container, "svc-a");
    ServiceBeanLoader::unload(&scope_a, &element_a, &fixture.container);
    assert_eq!(state.lock().count("com.x:svc:1.0"), 1);
    assert!(state.lock().get("com.x:svc:1.0").is_some());

    // Second unload evicts.
    let scope_b = dummy_scope(&fixture.container, "svc-b");
    ServiceBeanLoader::unload(&scope_b, &element_b, &fixture.container);
    assert_eq!(state.lock().count("com.x:svc:1.0"), 0);
    assert!(state.lock().get("com.x:svc:1.0").is_none());
    assert!(state.lock().get("com.x:svc:1.0:dl").is_none());
}

#[test]
fn snapshot_artifacts_resolve_independently() {
    let fixture = fixture();
    let element_a = element_with_export("svc-a", "com.x:svc:2.0-SNAPSHOT", "com.x:svc:1.0:dl");
    let element_b = element_with_export("svc-b", "com.x:svc:2.0-SNAPSHOT", "com.x:svc:1.0:dl");

    let first = ServiceBeanLoader::provision_service(&fixture.container, &element_a).unwrap();
    let second = ServiceBeanLoader::provision_service(&fixture.container, &element_b).unwrap();

    assert!(!Arc::ptr_eq(&first.implementation, &second.implementation));
    let state = fixture.container.provision_state();
    assert_eq!(state.lock().count("com.x:svc:2.0-SNAPSHOT"), 0);
    assert!(state.lock().get("com.x:svc:2.0-SNAPSHOT").is_none());
}

#[test]
fn load_restores_scope_and_unload_removes_policy() {
    let policy_dir = TempDir::new().unwrap();
    let policy_file = policy_dir.path().join("svc.policy");
    std::fs::write(&policy_file, "net:7001\n").unwrap();

    let fixture = fixture();
    let mut element = element_with_export("svc-a", "com.x:svc:1.0", "com.x:svc:1.0:dl");
    element.service_bean_config.service_policy = Some(policy_file);

    assert!(current_scope().is_none());
    let result = ServiceBeanLoader::load(
        &element,
        Uuid::new_v4(),
        Arc::new(NullManager),
        &fixture.container,
    )
    .unwrap();

    // The scope was only current for the construction window.
    assert!(current_scope().is_none());
    assert!(fixture.container.policy_registry().contains(result.scope.id()));

    ServiceBeanLoader::unload(&result.scope, &element, &fixture.container);
    assert!(!fixture.container.policy_registry().contains(result.scope.id()));
    assert!(fixture.container.policy_registry().is_empty());
}

#[test]
fn export_artifact_defaults_to_framework_api() {
    let fixture = fixture();
    let element = element("svc-a", Some("com.x:svc:1.0"));
    assert!(element.export_artifact().is_none());

    let resources = ServiceBeanLoader::provision_service(&fixture.container, &element).unwrap();
    let api = ArtifactCoordinate::rio_api();
    assert_eq!(resources.export.artifact(), Some(&api));
    assert_eq!(resources.export.jars().len(), 1);
    assert_eq!(
        fixture.container.provision_state().lock().count(&api.key()),
        1
    );
}

#[test]
fn resolution_disallowed_fails_before_resolver_contact() {
    let mut config = RioConfig::default();
    config.persistent_provisioning = false;
    let fixture = fixture_with(config);
    let element = element("svc-a", Some("com.x:svc:1.0"));

    let err = ServiceBeanLoader::provision_service(&fixture.container, &element).unwrap_err();
    assert!(matches!(err, LoaderError::ProvisioningNotSupported { .. }));
    assert_eq!(fixture.resolver.calls(), 0);
    assert!(fixture.container.provision_state().lock().is_empty());
}

#[test]
fn load_failure_wraps_cause_and_restores_scope() {
    let mut config = RioConfig::default();
    config.persistent_provisioning = false;
    let fixture = fixture_with(config);
    let element = element("svc-a", Some("com.x:svc:1.0"));

    let err = ServiceBeanLoader::load(
        &element,
        Uuid::new_v4(),
        Arc::new(NullManager),
        &fixture.container,
    )
    .unwrap_err();
    assert!(err.is_provisioning_not_supported());
    assert!(current_scope().is_none());
}

#[test]
fn static_mode_bypasses_resolver_with_empty_export() {
    let mut config = RioConfig::default();
    config.mode = Mode::Static;
    let fixture = fixture_with(config);
    let element = element("svc-a", None);

    let resources = ServiceBeanLoader::provision_service(&fixture.container, &element).unwrap();
    assert_eq!(fixture.resolver.calls(), 0);
    assert_eq!(resources.implementation.jars().len(), 1);
    assert_eq!(
        resources.implementation.jars()[0].as_str(),
        "http://repo.invalid/bundles/calc.jar"
    );
    assert!(resources.export.jars().is_empty());
}

#[test]
fn baseline_download_libraries_synthesized_from_override() {
    let mut config = RioConfig::default();
    config.codebase_override = Some(Url::parse("http://codebase.invalid/dl/").unwrap());
    let fixture = fixture_with(config);
    let element = element("svc-a", None);

    let resources = ServiceBeanLoader::provision_service(&fixture.container, &element).unwrap();
    let jars: Vec<&str> = resources.export.jars().iter().map(Url::as_str).collect();
    assert!(jars.contains(&"http://codebase.invalid/dl/rio-api-dl.jar"));
    assert!(jars.contains(&"http://codebase.invalid/dl/rio-lookup-dl.jar"));
}

#[test]
fn unknown_component_fails_instantiation_with_cause() {
    let fixture = fixture();
    let mut element = element_with_export("svc-a", "com.x:svc:1.0", "com.x:svc:1.0:dl");
    element.component_bundle.component = "unregistered".into();

    let err = ServiceBeanLoader::load(
        &element,
        Uuid::new_v4(),
        Arc::new(NullManager),
        &fixture.container,
    )
    .unwrap_err();
    assert_eq!(err.service, "svc-a");
    assert!(matches!(
        err.source.downcast_ref::<LoaderError>(),
        Some(LoaderError::UnknownComponent { .. })
    ));
    assert!(current_scope().is_none());
}

fn dummy_scope(container: &LoaderContext, name: &str) -> ServiceScope {
    ServiceScope::new(
        name,
        container.common_scope().clone(),
        Vec::new(),
        Vec::new(),
    )
}
