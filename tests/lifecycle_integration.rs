//! ---
//! rio_section: "08-testing-qa"
//! rio_subsection: "integration-tests"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Integration and validation tests for the Rio stack."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
//! Full service lifecycle through the loader: load, advertise,
//! unadvertise, destroy, unload, with the discard notification reaching
//! the owning manager.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use rio_api::{
    ArtifactCoordinate, BeanError, ComponentBundle, ServiceBean, ServiceBeanConfig,
    ServiceBeanContext, ServiceElement, ServiceProxy,
};
use rio_common::RioConfig;
use rio_loader::{ComponentRegistry, LoaderContext, ServiceBeanLoader};
use rio_resolver::LocalRepositoryResolver;
use rio_resource::ComputeResource;
use rio_service::{InMemoryAdvertiser, ServiceBeanManager, ServiceState};
use tempfile::TempDir;
use uuid::Uuid;

struct LifecycleBean {
    callbacks: Arc<Mutex<Vec<&'static str>>>,
}

impl ServiceBean for LifecycleBean {
    fn initialize(&mut self, _context: &ServiceBeanContext) -> Result<(), BeanError> {
        self.callbacks.lock().push("initialize");
        Ok(())
    }

    fn start(&mut self) -> Result<(), BeanError> {
        self.callbacks.lock().push("start");
        Ok(())
    }

    fn advertised(&mut self) {
        self.callbacks.lock().push("advertised");
    }

    fn unadvertised(&mut self) {
        self.callbacks.lock().push("unadvertised");
    }

    fn stop(&mut self) {
        self.callbacks.lock().push("stop");
    }

    fn proxy(&self) -> ServiceProxy {
        ServiceProxy {
            name: "lifecycle".into(),
            service_id: Uuid::nil(),
            endpoint: None,
            properties: IndexMap::new(),
        }
    }
}

struct RecordingManager {
    discards: AtomicUsize,
    last: Mutex<Option<Uuid>>,
}

impl RecordingManager {
    fn new() -> Self {
        Self {
            discards: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }
}

impl ServiceBeanManager for RecordingManager {
    fn service_discarded(&self, service_id: Uuid) {
        self.discards.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = Some(service_id);
    }
}

struct Stack {
    _dirs: TempDir,
    container: LoaderContext,
    advertiser: Arc<InMemoryAdvertiser>,
    callbacks: Arc<Mutex<Vec<&'static str>>>,
}

#[allow(clippy::field_reassign_with_default)]
fn stack() -> Stack {
    let dirs = TempDir::new().unwrap();
    let mut config = RioConfig::default();
    config.platform_dir = dirs.path().join("platform");
    config.provision_root = dirs.path().join("provision");
    config.local_repository = dirs.path().join("repository");
    config.unexport.max_unexport_delay = std::time::Duration::from_millis(100);
    config.unexport.unexport_retry_delay = std::time::Duration::from_millis(10);

    let resolver = Arc::new(LocalRepositoryResolver::new(&config.local_repository));
    resolver
        .install(&"com.x:lifecycle:1.0".parse().unwrap(), b"lifecycle")
        .unwrap();
    resolver
        .install(&ArtifactCoordinate::rio_api(), b"rio-api")
        .unwrap();

    let callbacks = Arc::new(Mutex::new(Vec::new()));
    let registry = Arc::new(ComponentRegistry::new());
    let bean_callbacks = callbacks.clone();
    registry.register(
        "lifecycle",
        Arc::new(move || {
            Box::new(LifecycleBean {
                callbacks: bean_callbacks.clone(),
            })
        }),
    );

    let advertiser = Arc::new(InMemoryAdvertiser::default());
    let compute = ComputeResource::new(&config);
    let container = LoaderContext::new(config, compute, resolver, registry, None)
        .with_advertiser(advertiser.clone());
    Stack {
        _dirs: dirs,
        container,
        advertiser,
        callbacks,
    }
}

fn element() -> ServiceElement {
    ServiceElement {
        operational_string: "demo".into(),
        service_bean_config: ServiceBeanConfig {
            name: "lifecycle".into(),
            ..ServiceBeanConfig::default()
        },
        component_bundle: ComponentBundle::for_artifact(
            "lifecycle",
            "com.x:lifecycle:1.0".parse().unwrap(),
        ),
        export_bundles: Vec::new(),
        remote_repositories: Vec::new(),
        capability_requirements: Vec::new(),
        config_attributes: Vec::new(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_lifecycle_with_discard_notification() {
    let stack = stack();
    let manager = Arc::new(RecordingManager::new());
    let svc = element();

    let result = ServiceBeanLoader::load(
        &svc,
        Uuid::new_v4(),
        manager.clone(),
        &stack.container,
    )
    .unwrap();
    assert_eq!(result.adapter.state(), ServiceState::Started);

    result.adapter.advertise().unwrap();
    assert_eq!(stack.advertiser.registration_count(), 1);

    // A second advertise is a no-op, not a duplicate registration.
    result.adapter.advertise().unwrap();
    assert_eq!(stack.advertiser.registration_count(), 1);

    result.adapter.destroy().await;
    assert_eq!(stack.advertiser.registration_count(), 0);
    assert_eq!(manager.discards.load(Ordering::SeqCst), 1);
    assert_eq!(*manager.last.lock(), Some(result.service_id));

    ServiceBeanLoader::unload(&result.scope, &svc, &stack.container);
    assert!(stack.container.provision_state().lock().is_empty());

    let callbacks = stack.callbacks.lock().clone();
    assert_eq!(
        callbacks,
        vec!["initialize", "start", "advertised", "unadvertised", "stop"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn destroy_twice_notifies_manager_once() {
    let stack = stack();
    let manager = Arc::new(RecordingManager::new());
    let svc = element();

    let result = ServiceBeanLoader::load(
        &svc,
        Uuid::new_v4(),
        manager.clone(),
        &stack.container,
    )
    .unwrap();
    result.adapter.destroy().await;
    result.adapter.destroy().await;
    assert_eq!(manager.discards.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unadvertise_then_readvertise_registers_again() {
    let stack = stack();
    let svc = element();

    let result = ServiceBeanLoader::load(
        &svc,
        Uuid::new_v4(),
        Arc::new(RecordingManager::new()),
        &stack.container,
    )
    .unwrap();

    result.adapter.advertise().unwrap();
    result.adapter.unadvertise().unwrap();
    assert_eq!(stack.advertiser.registration_count(), 0);
    assert_eq!(result.adapter.state(), ServiceState::Unadvertised);

    result.adapter.advertise().unwrap();
    assert_eq!(stack.advertiser.registration_count(), 1);
    assert_eq!(result.adapter.state(), ServiceState::Advertised);
}
