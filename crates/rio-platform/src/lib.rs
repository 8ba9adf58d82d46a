//! ---
//! rio_section: "03-platform-capability"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Platform and measurable capability model."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
//! Qualitative and quantitative descriptors of a compute node: platform
//! capabilities (what the node is), measurable capabilities (how loaded
//! it currently is), and the staged-software machinery that installs
//! capability-backing software on demand.

use std::path::PathBuf;

use url::Url;

pub mod capability;
pub mod measurable;
pub mod monitors;
pub mod staged;

pub use capability::{
    CapabilityDocument, CapabilityKind, PlatformCapability, CAPABILITY_DOCUMENT_VERSION,
};
pub use measurable::{
    MeasurableCapability, MeasuredResource, MeasuredResourceSink, ResourceMonitor, ThresholdValues,
};
pub use monitors::{CpuLoadMonitor, DiskMonitor, MemoryMonitor};
pub use staged::{DownloadManager, DownloadRecord, StagedSoftware};

/// Result alias used throughout the platform crate.
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Error type for the platform capability subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// Wrapper for IO errors while reading or writing capability state.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// A staged-software download failed.
    #[error("download failed for {url}")]
    Download {
        /// The location that failed to download.
        url: Url,
        /// Transport-level cause.
        #[source]
        source: reqwest::Error,
    },
    /// The staged-software location uses a scheme the download manager
    /// does not handle.
    #[error("unsupported download scheme '{scheme}' for {url}")]
    UnsupportedScheme {
        /// The rejected scheme.
        scheme: String,
        /// The full location.
        url: Url,
    },
    /// Downloaded content did not match the declared checksum.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Path of the downloaded file.
        path: PathBuf,
        /// Declared checksum.
        expected: String,
        /// Computed checksum.
        actual: String,
    },
    /// A resource measurement could not be taken.
    #[error("measurement unavailable: {0}")]
    Measurement(String),
    /// A persisted capability document carries an unsupported version.
    #[error("capability document version {found} unsupported (expected {expected})")]
    DocumentVersion {
        /// Version found in the document.
        found: u16,
        /// Version this build understands.
        expected: u16,
    },
}
