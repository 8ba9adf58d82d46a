//! ---
//! rio_section: "03-platform-capability"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Platform and measurable capability model."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rio_api::{CapabilityRequirement, ResourceCostModel};
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::staged::DownloadRecord;
use crate::{PlatformError, Result};

/// Version of the persisted capability document schema.
pub const CAPABILITY_DOCUMENT_VERSION: u16 = 1;

/// The kind of a platform capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityKind {
    OperatingSystem,
    ProcessorArchitecture,
    RuntimeSupport,
    Memory,
    Storage,
    NativeLibrary,
    Custom(String),
}

impl CapabilityKind {
    /// Canonical kind name, matched against requirement declarations.
    pub fn name(&self) -> &str {
        match self {
            CapabilityKind::OperatingSystem => "OperatingSystem",
            CapabilityKind::ProcessorArchitecture => "ProcessorArchitecture",
            CapabilityKind::RuntimeSupport => "RuntimeSupport",
            CapabilityKind::Memory => "Memory",
            CapabilityKind::Storage => "Storage",
            CapabilityKind::NativeLibrary => "NativeLibrary",
            CapabilityKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Named, versioned qualitative descriptor of something a compute node
/// provides. Compared by its defining attributes (kind, name, version,
/// manufacturer, attribute map); installation bookkeeping (classpath,
/// download records, backing config file) does not participate in
/// equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformCapability {
    /// Capability kind.
    pub kind: CapabilityKind,
    /// Capability name (e.g. `Linux`, `x86_64`, `libjerq`).
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Capability version, when versioned.
    #[serde(default)]
    pub version: Option<String>,
    /// Manufacturer / vendor attribute.
    #[serde(default)]
    pub manufacturer: Option<String>,
    /// Additional defining attributes.
    #[serde(default)]
    pub attributes: IndexMap<String, String>,
    /// Observed values mirrored from a measurable capability. Not part
    /// of capability identity.
    #[serde(default)]
    pub telemetry: IndexMap<String, String>,
    /// Cost model applied when the capability is consumed.
    #[serde(default)]
    pub cost_model: Option<ResourceCostModel>,
    /// Classpath entries services matching this capability inherit.
    #[serde(default)]
    pub classpath: Vec<PathBuf>,
    /// Records of staged software downloaded for this capability.
    #[serde(default)]
    pub download_records: Vec<DownloadRecord>,
    /// Backing configuration file, for capabilities rediscovered at boot.
    #[serde(default)]
    pub config_file: Option<PathBuf>,
}

impl PlatformCapability {
    /// A minimal capability of the given kind and name.
    pub fn new(kind: CapabilityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            description: String::new(),
            version: None,
            manufacturer: None,
            attributes: IndexMap::new(),
            telemetry: IndexMap::new(),
            cost_model: None,
            classpath: Vec::new(),
            download_records: Vec::new(),
            config_file: None,
        }
    }

    /// Builder-style version setter.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Stable identifier used by pending-install and removal tracking.
    pub fn identifier(&self) -> String {
        match &self.version {
            Some(version) => format!("{}:{}:{}", self.kind, self.name, version),
            None => format!("{}:{}", self.kind, self.name),
        }
    }

    /// Whether this capability satisfies a service requirement.
    pub fn supports(&self, requirement: &CapabilityRequirement) -> bool {
        if requirement.kind != self.kind.name() {
            return false;
        }
        if let Some(name) = &requirement.name {
            if name != &self.name {
                return false;
            }
        }
        if let Some(required) = &requirement.version {
            let Some(version) = self.version.as_deref().and_then(lenient_version) else {
                return false;
            };
            if !required.matches(&version) {
                return false;
            }
        }
        requirement
            .attributes
            .iter()
            .all(|(key, value)| self.attributes.get(key) == Some(value))
    }
}

impl PartialEq for PlatformCapability {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.name == other.name
            && self.version == other.version
            && self.manufacturer == other.manufacturer
            && self.attributes == other.attributes
    }
}

impl Eq for PlatformCapability {}

/// Parse a possibly short version string (`1`, `1.0`, `1.0.3`) into a
/// semver version, padding missing components with zeros.
fn lenient_version(raw: &str) -> Option<Version> {
    if let Ok(version) = Version::parse(raw) {
        return Some(version);
    }
    let mut parts = raw.splitn(3, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    let patch = parts.next().unwrap_or("0").parse().ok()?;
    Some(Version::new(major, minor, patch))
}

/// Envelope persisted to the platform-config directory, one file per
/// provisioned capability, re-read at next boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDocument {
    /// Document schema version.
    pub version: u16,
    /// Timestamp the document was written.
    pub written_at: DateTime<Utc>,
    /// The persisted capability.
    pub capability: PlatformCapability,
}

impl CapabilityDocument {
    /// Wrap a capability for persistence.
    pub fn new(capability: PlatformCapability) -> Self {
        Self {
            version: CAPABILITY_DOCUMENT_VERSION,
            written_at: Utc::now(),
            capability,
        }
    }

    /// Write the document under `platform_dir`, deriving the file name
    /// from the capability identifier. Returns the written path.
    pub fn save(&self, platform_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(platform_dir)?;
        let file_name = self
            .capability
            .identifier()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect::<String>();
        let path = platform_dir.join(format!("{file_name}.json"));
        fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }

    /// Read a document back, rejecting unsupported schema versions.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path)?;
        let document: Self = serde_json::from_slice(&raw)?;
        if document.version != CAPABILITY_DOCUMENT_VERSION {
            return Err(PlatformError::DocumentVersion {
                found: document.version,
                expected: CAPABILITY_DOCUMENT_VERSION,
            });
        }
        Ok(document)
    }

    /// Load every capability document under `platform_dir`, skipping
    /// unreadable files with a warning.
    pub fn load_all(platform_dir: &Path) -> Vec<PlatformCapability> {
        let Ok(entries) = fs::read_dir(platform_dir) else {
            return Vec::new();
        };
        let mut capabilities = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::load(&path) {
                Ok(document) => {
                    let mut capability = document.capability;
                    capability.config_file = Some(path);
                    capabilities.push(capability);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable capability document");
                }
            }
        }
        capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use semver::VersionReq;

    fn requirement(kind: &str) -> CapabilityRequirement {
        CapabilityRequirement {
            kind: kind.into(),
            name: None,
            version: None,
            attributes: IndexMap::new(),
        }
    }

    #[test]
    fn equality_ignores_installation_bookkeeping() {
        let mut a = PlatformCapability::new(CapabilityKind::NativeLibrary, "libjerq")
            .with_version("2.1");
        let mut b = a.clone();
        a.classpath.push(PathBuf::from("/opt/libjerq"));
        b.config_file = Some(PathBuf::from("/tmp/cap.json"));
        assert_eq!(a, b);
    }

    #[test]
    fn equality_considers_defining_attributes() {
        let a = PlatformCapability::new(CapabilityKind::OperatingSystem, "Linux")
            .with_attribute("kernel", "6.1");
        let b = PlatformCapability::new(CapabilityKind::OperatingSystem, "Linux")
            .with_attribute("kernel", "6.8");
        assert_ne!(a, b);
    }

    #[test]
    fn supports_matches_kind_name_and_version() {
        let capability = PlatformCapability::new(CapabilityKind::NativeLibrary, "libjerq")
            .with_version("2.1");
        let mut req = requirement("NativeLibrary");
        assert!(capability.supports(&req));

        req.name = Some("libjerq".into());
        req.version = Some(VersionReq::parse(">=2.0").unwrap());
        assert!(capability.supports(&req));

        req.version = Some(VersionReq::parse(">=3.0").unwrap());
        assert!(!capability.supports(&req));

        req.version = None;
        req.name = Some("libother".into());
        assert!(!capability.supports(&req));
    }

    #[test]
    fn supports_requires_attribute_subset() {
        let capability = PlatformCapability::new(CapabilityKind::OperatingSystem, "Linux")
            .with_attribute("arch", "x86_64");
        let mut req = requirement("OperatingSystem");
        req.attributes.insert("arch".into(), "x86_64".into());
        assert!(capability.supports(&req));
        req.attributes.insert("arch".into(), "aarch64".into());
        assert!(!capability.supports(&req));
    }

    #[test]
    fn document_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let capability = PlatformCapability::new(CapabilityKind::NativeLibrary, "libjerq")
            .with_version("2.1");
        let path = CapabilityDocument::new(capability.clone())
            .save(dir.path())
            .unwrap();
        assert!(path.exists());

        let loaded = CapabilityDocument::load_all(dir.path());
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], capability);
        assert_eq!(loaded[0].config_file.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn document_rejects_future_schema() {
        let dir = tempfile::tempdir().unwrap();
        let capability = PlatformCapability::new(CapabilityKind::Storage, "disk");
        let mut document = CapabilityDocument::new(capability);
        document.version = 99;
        let path = dir.path().join("future.json");
        fs::write(&path, serde_json::to_vec(&document).unwrap()).unwrap();
        assert!(matches!(
            CapabilityDocument::load(&path),
            Err(PlatformError::DocumentVersion { found: 99, .. })
        ));
    }
}
