//! ---
//! rio_section: "04-compute-resource"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Compute resource aggregation and utilization reporting."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rio_common::RioConfig;
use rio_platform::{
    CapabilityDocument, CapabilityKind, DownloadManager, DownloadRecord, MeasurableCapability,
    MeasuredResource, MeasuredResourceSink, PlatformCapability, StagedSoftware,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::snapshot::{ComputeResourceUtilization, ResourceCapability};
use crate::system::CapabilityLoader;
use crate::Result;

/// Smallest accepted reporting interval.
pub const MIN_REPORT_INTERVAL: Duration = Duration::from_secs(1);

const PENDING_POLL: Duration = Duration::from_millis(500);

/// Receiver for periodic resource-capability reports.
pub trait ResourceCapabilityChangeListener: Send + Sync {
    /// Called with a freshly computed snapshot whenever capability
    /// membership or measured values change.
    fn resource_capability_changed(&self, capability: &ResourceCapability);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceState {
    Constructed,
    Booting,
    Active,
    Shutdown,
}

struct Inner {
    address: String,
    hostname: String,
    persistent_provisioning: bool,
    platform_dir: PathBuf,
    download_manager: DownloadManager,
    state: Mutex<ResourceState>,
    report_interval: Mutex<Duration>,
    platform_capabilities: Mutex<Vec<PlatformCapability>>,
    measurables: Mutex<Vec<Arc<MeasurableCapability>>>,
    pending_installs: Mutex<HashSet<String>>,
    removals: Mutex<HashSet<String>>,
    listeners: Mutex<Vec<Arc<dyn ResourceCapabilityChangeListener>>>,
    last_reported: Mutex<Option<ResourceCapability>>,
    reporter: Mutex<Option<JoinHandle<()>>>,
}

/// Single per-process aggregate of the host's platform and measurable
/// capabilities. Cheap to clone; all clones share state.
///
/// Lifecycle: `constructed → booting → active → shutdown`. While booting,
/// listener notification is suppressed so boot-time batch changes do not
/// spam listeners.
#[derive(Clone)]
pub struct ComputeResource {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ComputeResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeResource")
            .field("address", &self.inner.address)
            .field("hostname", &self.inner.hostname)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

impl ComputeResource {
    /// Build the compute resource for this process from configuration.
    pub fn new(config: &RioConfig) -> Self {
        let address = std::env::var("RIO_ADDRESS").unwrap_or_else(|_| "127.0.0.1".to_owned());
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_owned());
        Self {
            inner: Arc::new(Inner {
                address,
                hostname,
                persistent_provisioning: config.persistent_provisioning,
                platform_dir: config.platform_dir.clone(),
                download_manager: DownloadManager::new(&config.provision_root),
                state: Mutex::new(ResourceState::Constructed),
                report_interval: Mutex::new(config.report_interval.max(MIN_REPORT_INTERVAL)),
                platform_capabilities: Mutex::new(Vec::new()),
                measurables: Mutex::new(Vec::new()),
                pending_installs: Mutex::new(HashSet::new()),
                removals: Mutex::new(HashSet::new()),
                listeners: Mutex::new(Vec::new()),
                last_reported: Mutex::new(None),
                reporter: Mutex::new(None),
            }),
        }
    }

    /// Network address of the node.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Hostname of the node.
    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    /// Whether this node may stage software and resolve artifacts.
    pub fn persistent_provisioning(&self) -> bool {
        self.inner.persistent_provisioning
    }

    /// Discover and install capabilities through the given loader and
    /// start measurement and reporting. Discovery failures are logged by
    /// the loader; boot proceeds with whatever capabilities succeeded.
    pub fn boot(&self, loader: &dyn CapabilityLoader) {
        *self.inner.state.lock() = ResourceState::Booting;

        for capability in loader.platform_capabilities() {
            self.add_platform_capability(capability);
        }

        let measurables = loader.measurable_capabilities();
        for measurable in &measurables {
            // Disk and memory measurements replicate into the matching
            // platform capability so remote monitors see both views.
            let mirrored = match measurable.id() {
                "disk" => Some(CapabilityKind::Storage),
                "memory" => Some(CapabilityKind::Memory),
                _ => None,
            };
            if let Some(kind) = mirrored {
                measurable.add_sink(Arc::new(CapabilityTelemetrySink {
                    inner: Arc::downgrade(&self.inner),
                    kind,
                }));
            }
            if let Err(err) = measurable.measure_once() {
                warn!(capability = %measurable.id(), error = %err, "initial measurement failed");
            }
            measurable.start();
        }
        *self.inner.measurables.lock() = measurables;

        *self.inner.state.lock() = ResourceState::Active;
        self.start_reporting();
        // Single post-boot notification covering the batched changes.
        self.notify_listeners();
        info!(
            address = %self.inner.address,
            capabilities = self.inner.platform_capabilities.lock().len(),
            "compute resource active"
        );
    }

    /// Add a platform capability unless an equal one is already present.
    /// Returns whether the capability set changed; listeners are notified
    /// only on an actual structural change.
    pub fn add_platform_capability(&self, capability: PlatformCapability) -> bool {
        let added = {
            let mut list = self.inner.platform_capabilities.lock();
            if list.contains(&capability) {
                debug!(capability = %capability.identifier(), "capability already present");
                false
            } else {
                debug!(capability = %capability.identifier(), "capability added");
                list.push(capability);
                true
            }
        };
        if added {
            self.notify_if_active();
        }
        added
    }

    /// Current platform capabilities.
    pub fn platform_capabilities(&self) -> Vec<PlatformCapability> {
        self.inner.platform_capabilities.lock().clone()
    }

    /// Platform capabilities matching any of the element's requirements.
    pub fn matching_capabilities(
        &self,
        requirements: &[rio_api::CapabilityRequirement],
    ) -> Vec<PlatformCapability> {
        self.inner
            .platform_capabilities
            .lock()
            .iter()
            .filter(|capability| requirements.iter().any(|req| capability.supports(req)))
            .cloned()
            .collect()
    }

    /// Whether an equal capability is currently installed.
    pub fn has_capability(&self, capability: &PlatformCapability) -> bool {
        self.inner.platform_capabilities.lock().contains(capability)
    }

    /// Provision a capability, downloading its staged software when
    /// supplied. Concurrent provisioning attempts for the same capability
    /// are de-duplicated through a pending set polled every 500ms.
    ///
    /// Returns an empty record list when the capability already exists or
    /// no staged software was supplied.
    pub async fn provision(
        &self,
        capability: PlatformCapability,
        staged: Option<StagedSoftware>,
    ) -> Result<Vec<DownloadRecord>> {
        if self.has_capability(&capability) {
            debug!(capability = %capability.identifier(), "provision no-op: capability exists");
            return Ok(Vec::new());
        }
        let id = capability.identifier();
        loop {
            {
                let mut pending = self.inner.pending_installs.lock();
                if !pending.contains(&id) {
                    pending.insert(id.clone());
                    break;
                }
            }
            debug!(capability = %id, "provision pending elsewhere; polling");
            tokio::time::sleep(PENDING_POLL).await;
        }
        let result = self.provision_locked(capability, staged).await;
        self.inner.pending_installs.lock().remove(&id);
        result
    }

    async fn provision_locked(
        &self,
        mut capability: PlatformCapability,
        staged: Option<StagedSoftware>,
    ) -> Result<Vec<DownloadRecord>> {
        // The concurrent holder of the pending slot may have installed it.
        if self.has_capability(&capability) {
            return Ok(Vec::new());
        }
        let Some(staged) = staged else {
            self.add_platform_capability(capability);
            return Ok(Vec::new());
        };

        let record = self
            .inner
            .download_manager
            .download(&capability.name, &staged)
            .await?;
        if staged.use_as_classpath {
            capability.classpath.push(record.path.clone());
        }
        capability.download_records.push(record.clone());

        if !staged.remove_on_destroy {
            let path = CapabilityDocument::new(capability.clone()).save(&self.inner.platform_dir)?;
            capability.config_file = Some(path);
        }

        self.add_platform_capability(capability);
        Ok(vec![record])
    }

    /// Remove a platform capability. With `clean`, downloaded artifacts
    /// and the backing configuration file are deleted from disk before
    /// the capability leaves the live set. Returns whether a capability
    /// was removed.
    pub fn remove_platform_capability(&self, capability: &PlatformCapability, clean: bool) -> bool {
        let id = capability.identifier();
        if !self.inner.removals.lock().insert(id.clone()) {
            debug!(capability = %id, "removal already in process");
            return false;
        }

        let found = {
            let list = self.inner.platform_capabilities.lock();
            list.iter().find(|c| *c == capability).cloned()
        };
        let removed = match found {
            Some(installed) => {
                if clean {
                    for record in &installed.download_records {
                        record.clean();
                    }
                    if let Some(config) = &installed.config_file {
                        if let Err(err) = std::fs::remove_file(config) {
                            if err.kind() != std::io::ErrorKind::NotFound {
                                warn!(path = %config.display(), error = %err, "failed to remove capability config");
                            }
                        }
                    }
                }
                let mut list = self.inner.platform_capabilities.lock();
                if let Some(index) = list.iter().position(|c| c == capability) {
                    list.remove(index);
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        self.inner.removals.lock().remove(&id);
        if removed {
            info!(capability = %id, clean, "capability removed");
            self.notify_if_active();
        } else {
            debug!(capability = %id, "capability not present; removal no-op");
        }
        removed
    }

    /// Whether a removal for this capability is currently in process.
    pub fn removal_in_process(&self, capability: &PlatformCapability) -> bool {
        self.inner.removals.lock().contains(&capability.identifier())
    }

    /// Register a listener for resource-capability reports.
    pub fn register_listener(&self, listener: Arc<dyn ResourceCapabilityChangeListener>) {
        self.inner.listeners.lock().push(listener);
    }

    /// The configured reporting interval.
    pub fn report_interval(&self) -> Duration {
        *self.inner.report_interval.lock()
    }

    /// Change the reporting interval (clamped to the 1s minimum),
    /// cancelling and rescheduling the reporting task.
    pub fn set_report_interval(&self, interval: Duration) {
        let interval = interval.max(MIN_REPORT_INTERVAL);
        *self.inner.report_interval.lock() = interval;
        info!(interval_ms = interval.as_millis() as u64, "report interval changed");
        if *self.inner.state.lock() == ResourceState::Active {
            self.start_reporting();
        }
    }

    /// A freshly computed capability snapshot.
    pub fn resource_capability(&self) -> ResourceCapability {
        compute_snapshot(&self.inner)
    }

    /// Unweighted mean of all measured-resource values; 0 with none.
    pub fn utilization(&self) -> f64 {
        current_utilization(&self.inner).mean
    }

    /// Stop measurement and reporting. Terminal.
    pub fn shutdown(&self) {
        *self.inner.state.lock() = ResourceState::Shutdown;
        if let Some(task) = self.inner.reporter.lock().take() {
            task.abort();
        }
        for measurable in self.inner.measurables.lock().iter() {
            measurable.stop();
        }
        info!("compute resource shut down");
    }

    fn start_reporting(&self) {
        let mut reporter = self.inner.reporter.lock();
        if let Some(task) = reporter.take() {
            task.abort();
        }
        let interval = *self.inner.report_interval.lock();
        let inner = self.inner.clone();
        *reporter = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; the first report
            // should land one full interval after (re)scheduling.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snapshot = compute_snapshot(&inner);
                let changed = {
                    let last = inner.last_reported.lock();
                    last.as_ref() != Some(&snapshot)
                };
                if changed {
                    push_to_listeners(&inner, snapshot);
                }
            }
        }));
    }

    fn notify_if_active(&self) {
        if *self.inner.state.lock() == ResourceState::Active {
            self.notify_listeners();
        }
    }

    fn notify_listeners(&self) {
        push_to_listeners(&self.inner, compute_snapshot(&self.inner));
    }
}

impl rio_api::ComputeContext for ComputeResource {
    fn address(&self) -> String {
        self.inner.address.clone()
    }

    fn hostname(&self) -> String {
        self.inner.hostname.clone()
    }

    fn utilization(&self) -> f64 {
        current_utilization(&self.inner).mean
    }
}

fn current_utilization(inner: &Inner) -> ComputeResourceUtilization {
    let measured: Vec<MeasuredResource> = inner
        .measurables
        .lock()
        .iter()
        .filter_map(|m| m.last_measured())
        .collect();
    ComputeResourceUtilization::from_measurements(measured)
}

fn compute_snapshot(inner: &Inner) -> ResourceCapability {
    ResourceCapability {
        address: inner.address.clone(),
        hostname: inner.hostname.clone(),
        persistent_provisioning: inner.persistent_provisioning,
        platform_capabilities: inner.platform_capabilities.lock().clone(),
        utilization: current_utilization(inner),
    }
}

fn push_to_listeners(inner: &Inner, snapshot: ResourceCapability) {
    *inner.last_reported.lock() = Some(snapshot.clone());
    let listeners = inner.listeners.lock().clone();
    for listener in listeners {
        listener.resource_capability_changed(&snapshot);
    }
}

/// Mirrors measured values into the telemetry map of the corresponding
/// platform capability.
struct CapabilityTelemetrySink {
    inner: Weak<Inner>,
    kind: CapabilityKind,
}

impl MeasuredResourceSink for CapabilityTelemetrySink {
    fn report(&self, resource: &MeasuredResource) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut list = inner.platform_capabilities.lock();
        if let Some(capability) = list.iter_mut().find(|c| c.kind == self.kind) {
            capability
                .telemetry
                .insert("observed-utilization".into(), format!("{:.4}", resource.value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener(AtomicUsize);

    impl ResourceCapabilityChangeListener for CountingListener {
        fn resource_capability_changed(&self, _capability: &ResourceCapability) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn active_resource() -> ComputeResource {
        let resource = ComputeResource::new(&RioConfig::default());
        *resource.inner.state.lock() = ResourceState::Active;
        resource
    }

    fn capability(name: &str) -> PlatformCapability {
        PlatformCapability::new(CapabilityKind::NativeLibrary, name).with_version("1.0")
    }

    #[test]
    fn duplicate_add_notifies_once() {
        let resource = active_resource();
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        resource.register_listener(listener.clone());

        assert!(resource.add_platform_capability(capability("libjerq")));
        assert!(!resource.add_platform_capability(capability("libjerq")));
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn notifications_suppressed_while_booting() {
        let resource = ComputeResource::new(&RioConfig::default());
        *resource.inner.state.lock() = ResourceState::Booting;
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        resource.register_listener(listener.clone());

        assert!(resource.add_platform_capability(capability("libjerq")));
        assert_eq!(listener.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn removal_cleans_disk_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RioConfig::default();
        config.platform_dir = dir.path().join("platform");
        let resource = ComputeResource::new(&config);
        *resource.inner.state.lock() = ResourceState::Active;

        let mut cap = capability("libjerq");
        let artifact = dir.path().join("libjerq.so");
        std::fs::write(&artifact, b"payload").unwrap();
        cap.download_records.push(DownloadRecord {
            source: url::Url::parse("file:///libjerq.so").unwrap(),
            path: artifact.clone(),
            size: 7,
            sha256: String::new(),
            downloaded_at: chrono::Utc::now(),
        });
        let config_file = CapabilityDocument::new(cap.clone())
            .save(&config.platform_dir)
            .unwrap();
        cap.config_file = Some(config_file.clone());

        assert!(resource.add_platform_capability(cap.clone()));
        assert!(resource.remove_platform_capability(&cap, true));
        assert!(!artifact.exists());
        assert!(!config_file.exists());
        assert!(!resource.has_capability(&cap));
        assert!(!resource.removal_in_process(&cap));
    }

    #[test]
    fn report_interval_clamped_to_minimum() {
        let resource = ComputeResource::new(&RioConfig::default());
        resource.set_report_interval(Duration::from_millis(10));
        assert_eq!(resource.report_interval(), MIN_REPORT_INTERVAL);
    }

    #[tokio::test]
    async fn provision_without_staged_software_adds_capability() {
        let resource = active_resource();
        let records = resource.provision(capability("libjerq"), None).await.unwrap();
        assert!(records.is_empty());
        assert!(resource.has_capability(&capability("libjerq")));
    }

    #[tokio::test]
    async fn provision_existing_capability_is_noop() {
        let resource = active_resource();
        resource.add_platform_capability(capability("libjerq"));
        let records = resource.provision(capability("libjerq"), None).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn snapshot_reflects_capability_membership() {
        let resource = active_resource();
        resource.add_platform_capability(capability("libjerq"));
        let snapshot = resource.resource_capability();
        assert_eq!(snapshot.platform_capabilities.len(), 1);
        assert_eq!(snapshot.utilization.mean, 0.0);
        assert_eq!(snapshot.address, resource.address());
    }
}
