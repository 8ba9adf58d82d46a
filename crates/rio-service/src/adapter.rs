//! ---
//! rio_section: "06-service-lifecycle"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Service bean lifecycle state machine and advertisement."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rio_api::{ServiceBean, ServiceBeanContext, ServiceProxy};
use rio_common::UnexportConfig;
use rio_common::VersionInfo;
use rio_platform::PlatformCapability;
use rio_resource::ComputeResource;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::attributes::ServiceAttribute;
use crate::state::{verify_transition, ServiceState};
use crate::{Result, ServiceError};

/// Lifecycle callbacks toward the component managing this service.
pub trait ServiceBeanManager: Send + Sync {
    /// The service has been destroyed and should be discarded.
    fn service_discarded(&self, service_id: Uuid);
}

/// Registration seam toward lookup services.
pub trait ServiceAdvertiser: Send + Sync {
    /// Register the proxy and its advertisement attributes.
    fn register(&self, proxy: &ServiceProxy, attributes: &[ServiceAttribute]) -> Result<()>;
    /// Remove the registration for the given service.
    fn unregister(&self, service_id: Uuid);
}

/// Export seam for the service's remote endpoint.
pub trait ServiceExporter: Send + Sync {
    /// Export the proxy. Called once during `start`.
    fn export(&self, proxy: &ServiceProxy) -> Result<()>;
    /// Attempt to unexport; with `force` the endpoint is torn down even
    /// with calls in flight. Returns whether the unexport completed.
    fn unexport(&self, force: bool) -> bool;
}

/// In-memory advertiser used by default and in tests.
#[derive(Debug, Default)]
pub struct InMemoryAdvertiser {
    registrations: Mutex<Vec<(Uuid, Vec<ServiceAttribute>)>>,
}

impl InMemoryAdvertiser {
    /// Number of currently registered services.
    pub fn registration_count(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Attributes registered for a service, if registered.
    pub fn attributes_for(&self, service_id: Uuid) -> Option<Vec<ServiceAttribute>> {
        self.registrations
            .lock()
            .iter()
            .find(|(id, _)| *id == service_id)
            .map(|(_, attributes)| attributes.clone())
    }
}

impl ServiceAdvertiser for InMemoryAdvertiser {
    fn register(&self, proxy: &ServiceProxy, attributes: &[ServiceAttribute]) -> Result<()> {
        self.registrations
            .lock()
            .push((proxy.service_id, attributes.to_vec()));
        Ok(())
    }

    fn unregister(&self, service_id: Uuid) {
        self.registrations.lock().retain(|(id, _)| *id != service_id);
    }
}

/// In-memory exporter used by default and in tests. `failing_unexports`
/// makes the first N non-forced unexport attempts fail, for exercising
/// the bounded retry loop.
#[derive(Debug, Default)]
pub struct InMemoryExporter {
    exported: AtomicBool,
    forced: AtomicBool,
    failing_unexports: Mutex<usize>,
}

impl InMemoryExporter {
    /// Exporter whose first `n` plain unexport attempts fail.
    pub fn failing(n: usize) -> Self {
        Self {
            exported: AtomicBool::new(false),
            forced: AtomicBool::new(false),
            failing_unexports: Mutex::new(n),
        }
    }

    /// Whether the endpoint is currently exported.
    pub fn is_exported(&self) -> bool {
        self.exported.load(Ordering::SeqCst)
    }

    /// Whether a forced unexport happened.
    pub fn was_forced(&self) -> bool {
        self.forced.load(Ordering::SeqCst)
    }
}

impl ServiceExporter for InMemoryExporter {
    fn export(&self, _proxy: &ServiceProxy) -> Result<()> {
        self.exported.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unexport(&self, force: bool) -> bool {
        if force {
            self.forced.store(true, Ordering::SeqCst);
            self.exported.store(false, Ordering::SeqCst);
            return true;
        }
        let mut failing = self.failing_unexports.lock();
        if *failing > 0 {
            *failing -= 1;
            return false;
        }
        self.exported.store(false, Ordering::SeqCst);
        true
    }
}

/// Runs a service bean through its lifecycle, coordinating the bean,
/// the exporter, the advertiser, and the hosting compute resource.
pub struct ServiceBeanAdapter {
    bean: Mutex<Box<dyn ServiceBean>>,
    context: ServiceBeanContext,
    state: Mutex<ServiceState>,
    manager: Arc<dyn ServiceBeanManager>,
    advertiser: Arc<dyn ServiceAdvertiser>,
    exporter: Arc<dyn ServiceExporter>,
    unexport: UnexportConfig,
    compute: Option<ComputeResource>,
    in_shutdown: AtomicBool,
    effective_id: Mutex<Uuid>,
    proxy: Mutex<Option<ServiceProxy>>,
    watches: Mutex<Vec<String>>,
    context_attributes: Mutex<Vec<ServiceAttribute>>,
    session_capabilities: Mutex<Vec<PlatformCapability>>,
}

impl std::fmt::Debug for ServiceBeanAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBeanAdapter")
            .field("service", &self.context.element.service_bean_config.name)
            .field("state", &*self.state.lock())
            .field("service_id", &*self.effective_id.lock())
            .finish()
    }
}

impl ServiceBeanAdapter {
    /// Wrap a constructed (not yet initialized) bean.
    pub fn new(
        bean: Box<dyn ServiceBean>,
        context: ServiceBeanContext,
        manager: Arc<dyn ServiceBeanManager>,
        advertiser: Arc<dyn ServiceAdvertiser>,
        exporter: Arc<dyn ServiceExporter>,
        unexport: UnexportConfig,
        compute: Option<ComputeResource>,
    ) -> Self {
        let proposed = context.service_id;
        Self {
            bean: Mutex::new(bean),
            context,
            state: Mutex::new(ServiceState::Uninitialized),
            manager,
            advertiser,
            exporter,
            unexport,
            compute,
            in_shutdown: AtomicBool::new(false),
            effective_id: Mutex::new(proposed),
            proxy: Mutex::new(None),
            watches: Mutex::new(Vec::new()),
            context_attributes: Mutex::new(Vec::new()),
            session_capabilities: Mutex::new(Vec::new()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    /// Effective service identity. Equals the proposed id unless the
    /// bean supplied a referent identity during `start`.
    pub fn service_id(&self) -> Uuid {
        *self.effective_id.lock()
    }

    /// The exported proxy, available after `start`.
    pub fn proxy(&self) -> Option<ServiceProxy> {
        self.proxy.lock().clone()
    }

    /// Register a watch name advertised through the watch descriptor.
    pub fn add_watch(&self, name: impl Into<String>) {
        self.watches.lock().push(name.into());
    }

    /// Append a context-supplied advertisement attribute.
    pub fn add_attribute(&self, attribute: ServiceAttribute) {
        self.context_attributes.lock().push(attribute);
    }

    /// Record a platform capability added on behalf of this service; it
    /// is removed from the compute resource when the service is destroyed.
    pub fn add_session_capability(&self, capability: PlatformCapability) {
        self.session_capabilities.lock().push(capability);
    }

    fn transition(&self, to: ServiceState) -> Result<()> {
        let mut state = self.state.lock();
        verify_transition(*state, to)?;
        debug!(service = %self.context.element.service_bean_config.name, from = ?*state, to = ?to, "lifecycle transition");
        *state = to;
        Ok(())
    }

    fn abort(&self) {
        let mut state = self.state.lock();
        if verify_transition(*state, ServiceState::Aborted).is_ok() {
            *state = ServiceState::Aborted;
        }
    }

    /// Drive the bean through initialization and export, returning the
    /// exported proxy: `UNINITIALIZED → STARTING → INITIALIZED → STARTED`.
    pub fn start(&self) -> Result<ServiceProxy> {
        self.transition(ServiceState::Starting)?;

        if let Err(err) = self.bean.lock().initialize(&self.context) {
            self.abort();
            return Err(err.into());
        }
        self.transition(ServiceState::Initialized)?;

        if let Err(err) = self.bean.lock().start() {
            self.abort();
            return Err(err.into());
        }

        // A bean that manages its own identity supersedes the proposed id.
        if let Some(referent) = self.bean.lock().referent_uuid() {
            debug!(service = %self.context.element.service_bean_config.name, %referent, "adopting referent identity");
            *self.effective_id.lock() = referent;
        }

        let mut proxy = self.bean.lock().proxy();
        proxy.service_id = self.service_id();
        self.exporter.export(&proxy)?;
        self.transition(ServiceState::Started)?;
        *self.proxy.lock() = Some(proxy.clone());
        info!(service = %self.context.element.service_bean_config.name, service_id = %proxy.service_id, "service started");
        Ok(proxy)
    }

    /// Advertise the service to lookups. Idempotent: a second call while
    /// advertised is a warning-level no-op, not a duplicate registration.
    pub fn advertise(&self) -> Result<()> {
        if self.state() == ServiceState::Advertised {
            warn!(service = %self.context.element.service_bean_config.name, "already advertised; ignoring");
            return Ok(());
        }
        let proxy = self.proxy().ok_or(ServiceError::NotStarted)?;
        let previous = self.state();
        self.transition(ServiceState::Advertised)?;
        let attributes = self.assemble_attributes();
        if let Err(err) = self.advertiser.register(&proxy, &attributes) {
            // Roll the state back; the registration did not happen.
            *self.state.lock() = previous;
            return Err(err);
        }
        self.bean.lock().advertised();
        info!(service = %self.context.element.service_bean_config.name, attributes = attributes.len(), "service advertised");
        Ok(())
    }

    /// Remove the lookup registration.
    pub fn unadvertise(&self) -> Result<()> {
        self.transition(ServiceState::Unadvertised)?;
        self.advertiser.unregister(self.service_id());
        self.bean.lock().unadvertised();
        info!(service = %self.context.element.service_bean_config.name, "service unadvertised");
        Ok(())
    }

    /// Stop the service, unadvertising first when necessary.
    pub fn stop(&self) -> Result<()> {
        if self.state() == ServiceState::Advertised {
            self.unadvertise()?;
        }
        self.transition(ServiceState::Stopped)?;
        self.bean.lock().stop();
        info!(service = %self.context.element.service_bean_config.name, "service stopped");
        Ok(())
    }

    /// Tear the service down. Idempotent; a second call is a no-op.
    /// Teardown is best-effort and ordered: watches, advertisement,
    /// session platform capabilities, bean stop, service export (with
    /// bounded unexport retry), and finally the discard notification.
    pub async fn destroy(&self) {
        if self.in_shutdown.swap(true, Ordering::SeqCst) {
            debug!(service = %self.context.element.service_bean_config.name, "destroy already in progress");
            return;
        }
        let service = self.context.element.service_bean_config.name.clone();
        info!(service = %service, "destroying service");

        self.watches.lock().clear();

        if self.state() == ServiceState::Advertised {
            if let Err(err) = self.unadvertise() {
                warn!(service = %service, error = %err, "unadvertise failed during destroy");
            }
        }

        if let Some(compute) = &self.compute {
            for capability in self.session_capabilities.lock().drain(..) {
                if !compute.remove_platform_capability(&capability, true) {
                    warn!(service = %service, capability = %capability.identifier(), "session capability removal failed");
                }
            }
        }

        {
            let mut state = self.state.lock();
            if verify_transition(*state, ServiceState::Stopped).is_ok() {
                *state = ServiceState::Stopped;
                self.bean.lock().stop();
            }
        }

        self.unexport_with_retry(&service).await;

        self.manager.service_discarded(self.service_id());
        info!(service = %service, "service destroyed");
    }

    /// Bounded unexport retry: plain attempts every `unexport_retry_delay`
    /// until `max_unexport_delay` elapses, then a forced unexport.
    async fn unexport_with_retry(&self, service: &str) {
        let deadline = Instant::now() + self.unexport.max_unexport_delay;
        loop {
            if self.exporter.unexport(false) {
                debug!(service = %service, "service unexported");
                return;
            }
            if Instant::now() >= deadline {
                warn!(service = %service, "unexport retries exhausted; forcing");
                self.exporter.unexport(true);
                return;
            }
            tokio::time::sleep(self.unexport.unexport_retry_delay).await;
        }
    }

    /// Advertisement attributes in their fixed assembly order: watch
    /// descriptor, operational string, compute-resource info, host, name,
    /// comment, service type, service info, context-supplied entries,
    /// config-supplied entries. Sources append; duplicates of an entry
    /// type are not deduplicated.
    fn assemble_attributes(&self) -> Vec<ServiceAttribute> {
        let config = &self.context.element.service_bean_config;
        let mut attributes = Vec::new();
        attributes.push(ServiceAttribute::WatchDescriptor {
            watches: self.watches.lock().clone(),
        });
        attributes.push(ServiceAttribute::OperationalString {
            name: self.context.element.operational_string.clone(),
        });
        attributes.push(ServiceAttribute::ComputeResourceInfo {
            address: self.context.compute.address(),
            hostname: self.context.compute.hostname(),
            utilization: self.context.compute.utilization(),
        });
        attributes.push(ServiceAttribute::Host {
            hostname: self.context.compute.hostname(),
        });
        attributes.push(ServiceAttribute::Name {
            name: config.name.clone(),
        });
        if let Some(comment) = &config.comment {
            attributes.push(ServiceAttribute::Comment {
                comment: comment.clone(),
            });
        }
        attributes.push(ServiceAttribute::ServiceType {
            type_name: self.context.element.component_bundle.component.clone(),
        });
        attributes.push(ServiceAttribute::ServiceInfo {
            name: config.name.clone(),
            version: VersionInfo::current().semver,
            instance_id: config.instance_id,
        });
        attributes.extend(self.context_attributes.lock().iter().cloned());
        attributes.extend(
            self.context
                .element
                .config_attributes
                .iter()
                .map(|value| ServiceAttribute::Custom {
                    value: value.clone(),
                }),
        );
        attributes
    }
}
