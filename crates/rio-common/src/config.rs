//! ---
//! rio_section: "02-runtime-foundation"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Shared primitives and utilities for the Rio runtime."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_mode() -> Mode {
    Mode::Dynamic
}

fn default_persistent_provisioning() -> bool {
    true
}

fn default_platform_dir() -> PathBuf {
    PathBuf::from("target/rio/platform")
}

fn default_provision_root() -> PathBuf {
    PathBuf::from("target/rio/provision")
}

fn default_local_repository() -> PathBuf {
    PathBuf::from("target/rio/repository")
}

fn default_report_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_sample_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_disk_capacity_bytes() -> u64 {
    8 * 1024 * 1024 * 1024
}

fn default_max_unexport_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_unexport_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    "0.0.0.0:9897"
        .parse()
        .expect("valid default metrics address")
}

/// Primary configuration object for the Rio runtime.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RioConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    /// Whether this node may stage software and resolve artifacts on demand.
    #[serde(default = "default_persistent_provisioning")]
    pub persistent_provisioning: bool,
    /// Directory holding persisted platform-capability configuration files.
    #[serde(default = "default_platform_dir")]
    pub platform_dir: PathBuf,
    /// Root directory for staged-software installation.
    #[serde(default = "default_provision_root")]
    pub provision_root: PathBuf,
    /// Directories scanned for native libraries at boot.
    #[serde(default)]
    pub native_library_dirs: Vec<PathBuf>,
    /// Local artifact repository root.
    #[serde(default = "default_local_repository")]
    pub local_repository: PathBuf,
    /// Remote repositories consulted when an element declares none.
    #[serde(default)]
    pub repositories: Vec<Url>,
    /// Override used to synthesize baseline download URLs for
    /// non-artifact services.
    #[serde(default)]
    pub codebase_override: Option<Url>,
    /// Interval between resource-capability reports.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_report_interval")]
    pub report_interval: Duration,
    #[serde(default)]
    pub measurement: MeasurementConfig,
    #[serde(default)]
    pub unexport: UnexportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for RioConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            persistent_provisioning: default_persistent_provisioning(),
            platform_dir: default_platform_dir(),
            provision_root: default_provision_root(),
            native_library_dirs: Vec::new(),
            local_repository: default_local_repository(),
            repositories: Vec::new(),
            codebase_override: None,
            report_interval: default_report_interval(),
            measurement: MeasurementConfig::default(),
            unexport: UnexportConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Metadata describing where a [`RioConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedRioConfig {
    pub config: RioConfig,
    pub source: PathBuf,
}

impl RioConfig {
    pub const ENV_CONFIG_PATH: &'static str = "RIO_CONFIG";
    pub const ENV_STATIC: &'static str = "RIO_STATIC";

    /// Load configuration from disk, respecting the `RIO_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedRioConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            let path = PathBuf::from(env_path);
            let config = Self::from_path(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))?;
            return Ok(LoadedRioConfig {
                config,
                source: path,
            });
        }
        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                debug!(path = %path.display(), "loading configuration candidate");
                let config = Self::from_path(path)
                    .with_context(|| format!("failed to load config from {}", path.display()))?;
                return Ok(LoadedRioConfig {
                    config,
                    source: path.to_path_buf(),
                });
            }
        }
        debug!("no configuration file found; using built-in defaults");
        Ok(LoadedRioConfig {
            config: Self::default(),
            source: PathBuf::from("<defaults>"),
        })
    }

    /// Parse a configuration file, dispatching on the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("unable to read {}", path.display()))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&raw).map_err(|err| anyhow!("invalid yaml config: {err}"))
            }
            Some("toml") => toml::from_str(&raw).map_err(|err| anyhow!("invalid toml config: {err}")),
            other => Err(anyhow!(
                "unsupported config extension {:?} for {}",
                other,
                path.display()
            )),
        }
    }

    /// Effective operating mode, honoring the `RIO_STATIC` environment flag.
    pub fn effective_mode(&self) -> Mode {
        if std::env::var(Self::ENV_STATIC).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            == Ok(true)
        {
            return Mode::Static;
        }
        self.mode
    }
}

/// Operating mode for artifact handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Artifacts are resolved through the configured resolver.
    #[default]
    Dynamic,
    /// Bundled libraries are used verbatim; the resolver is never consulted.
    Static,
}

impl Mode {
    pub fn is_static(&self) -> bool {
        matches!(self, Mode::Static)
    }
}

/// Measurable-capability sampling settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementConfig {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_sample_interval")]
    pub sample_interval: Duration,
    /// Capacity assumed for the provision-root disk accounting.
    #[serde(default = "default_disk_capacity_bytes")]
    pub disk_capacity_bytes: u64,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            sample_interval: default_sample_interval(),
            disk_capacity_bytes: default_disk_capacity_bytes(),
        }
    }
}

/// Bounds for the service unexport retry loop.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnexportConfig {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_max_unexport_delay")]
    pub max_unexport_delay: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_unexport_retry_delay")]
    pub unexport_retry_delay: Duration,
}

impl Default for UnexportConfig {
    fn default() -> Self {
        Self {
            max_unexport_delay: default_max_unexport_delay(),
            unexport_retry_delay: default_unexport_retry_delay(),
        }
    }
}

/// Logging sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            file_prefix: None,
            format: default_log_format(),
        }
    }
}

/// Metrics exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}
