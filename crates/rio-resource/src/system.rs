//! ---
//! rio_section: "04-compute-resource"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Compute resource aggregation and utilization reporting."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use std::path::Path;
use std::sync::Arc;

use rio_common::{RioConfig, VersionInfo};
use rio_platform::monitors::{memory_info, CpuLoadMonitor, DiskMonitor, MemoryMonitor};
use rio_platform::{
    CapabilityDocument, CapabilityKind, MeasurableCapability, PlatformCapability, ThresholdValues,
};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Default upper threshold for measured utilization values.
const DEFAULT_HIGH_THRESHOLD: f64 = 0.9;

/// Strategy for discovering the capabilities a compute resource boots
/// with. The default implementation is [`SystemCapabilities`].
pub trait CapabilityLoader: Send + Sync {
    /// Qualitative capabilities of the node.
    fn platform_capabilities(&self) -> Vec<PlatformCapability>;
    /// Quantitative capabilities, not yet started.
    fn measurable_capabilities(&self) -> Vec<Arc<MeasurableCapability>>;
}

/// Discovers default and configured capabilities at boot: operating
/// system, processor architecture, runtime support, memory and storage,
/// native libraries found under the configured directories, and any
/// capabilities persisted to the platform-config directory by an earlier
/// provisioning run.
#[derive(Debug, Clone)]
pub struct SystemCapabilities {
    config: RioConfig,
}

impl SystemCapabilities {
    /// Loader over the given configuration.
    pub fn new(config: RioConfig) -> Self {
        Self { config }
    }

    fn defaults(&self) -> Vec<PlatformCapability> {
        let mut capabilities = Vec::new();

        capabilities.push(
            PlatformCapability::new(CapabilityKind::OperatingSystem, std::env::consts::OS)
                .with_attribute("family", std::env::consts::FAMILY),
        );

        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        capabilities.push(
            PlatformCapability::new(
                CapabilityKind::ProcessorArchitecture,
                std::env::consts::ARCH,
            )
            .with_attribute("cores", cores.to_string()),
        );

        capabilities.push(
            PlatformCapability::new(CapabilityKind::RuntimeSupport, "rio")
                .with_version(VersionInfo::current().semver),
        );

        let mut memory = PlatformCapability::new(CapabilityKind::Memory, "memory");
        if let Some((total_kb, _)) = memory_info() {
            memory = memory.with_attribute("capacity-kb", total_kb.to_string());
        }
        capabilities.push(memory);

        capabilities.push(
            PlatformCapability::new(CapabilityKind::Storage, "provision-root")
                .with_attribute("root", self.config.provision_root.display().to_string())
                .with_attribute(
                    "capacity-bytes",
                    self.config.measurement.disk_capacity_bytes.to_string(),
                ),
        );

        capabilities
    }

    fn native_libraries(&self) -> Vec<PlatformCapability> {
        let mut capabilities = Vec::new();
        for dir in &self.config.native_library_dirs {
            if !dir.exists() {
                debug!(dir = %dir.display(), "native library directory missing; skipped");
                continue;
            }
            for entry in WalkDir::new(dir).into_iter().filter_map(|entry| entry.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                if !is_native_library(path) {
                    continue;
                }
                let name = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(|stem| stem.strip_prefix("lib").unwrap_or(stem).to_owned())
                    .unwrap_or_default();
                if name.is_empty() {
                    continue;
                }
                let mut capability =
                    PlatformCapability::new(CapabilityKind::NativeLibrary, name);
                capability.classpath.push(path.to_path_buf());
                capabilities.push(capability);
            }
        }
        if !capabilities.is_empty() {
            info!(count = capabilities.len(), "native libraries discovered");
        }
        capabilities
    }
}

impl CapabilityLoader for SystemCapabilities {
    fn platform_capabilities(&self) -> Vec<PlatformCapability> {
        let mut capabilities = self.defaults();
        capabilities.extend(self.native_libraries());
        // Capabilities provisioned in an earlier run come back from their
        // persisted configuration files, without re-downloading.
        let persisted = CapabilityDocument::load_all(&self.config.platform_dir);
        if !persisted.is_empty() {
            info!(count = persisted.len(), "persisted capabilities rediscovered");
        }
        capabilities.extend(persisted);
        capabilities
    }

    fn measurable_capabilities(&self) -> Vec<Arc<MeasurableCapability>> {
        let interval = self.config.measurement.sample_interval;
        let thresholds = ThresholdValues {
            low: 0.0,
            high: DEFAULT_HIGH_THRESHOLD,
        };
        vec![
            Arc::new(MeasurableCapability::new(
                "cpu",
                interval,
                thresholds,
                Arc::new(CpuLoadMonitor),
            )),
            Arc::new(MeasurableCapability::new(
                "memory",
                interval,
                thresholds,
                Arc::new(MemoryMonitor),
            )),
            Arc::new(MeasurableCapability::new(
                "disk",
                interval,
                thresholds,
                Arc::new(DiskMonitor::new(
                    &self.config.provision_root,
                    self.config.measurement.disk_capacity_bytes,
                )),
            )),
        ]
    }
}

fn is_native_library(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("so") | Some("dylib") | Some("dll")
    )
}
