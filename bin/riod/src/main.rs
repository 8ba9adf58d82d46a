//! ---
//! rio_section: "02-runtime-foundation"
//! rio_subsection: "binary"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Binary entrypoint for the Rio provisioning daemon."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use rio_common::config::RioConfig;
use rio_common::logging::init_tracing;
use rio_common::{Mode, VersionInfo};
use rio_loader::{ComponentRegistry, LoaderContext};
use rio_metrics::{new_registry, spawn_http_server, ProvisionMetrics, ResourceMetrics};
use rio_resolver::LocalRepositoryResolver;
use rio_resource::{
    ComputeResource, ResourceCapability, ResourceCapabilityChangeListener, SystemCapabilities,
};
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    version = concat!("Rio ", env!("CARGO_PKG_VERSION")),
    about = "Rio provisioning daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[arg(long, value_enum, help = "Override artifact handling mode")]
    mode: Option<CliMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Dynamic,
    Static,
}

impl From<CliMode> for Mode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Dynamic => Mode::Dynamic,
            CliMode::Static => Mode::Static,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the provisioning daemon")]
    Run,
}

/// Bridges resource-capability reports into the metrics registry.
struct MetricsListener {
    metrics: ResourceMetrics,
}

impl ResourceCapabilityChangeListener for MetricsListener {
    fn resource_capability_changed(&self, capability: &ResourceCapability) {
        self.metrics
            .set_capability_count(capability.platform_capabilities.len());
        self.metrics.set_utilization(capability.utilization.mean);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let version = VersionInfo::current();
    if cli.version {
        println!("{}", version.extended());
        return Ok(());
    }

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/riod.yaml"));
    candidates.push(PathBuf::from("configs/riod.toml"));

    let loaded = RioConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }
    init_tracing("riod", &config.logging)?;
    info!(source = %loaded.source.display(), version = %version.cli_string(), "configuration loaded");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await,
    }
}

async fn run_daemon(config: RioConfig) -> Result<()> {
    let registry = new_registry();
    let provision_metrics = ProvisionMetrics::new(registry.clone())?;
    let resource_metrics = ResourceMetrics::new(registry.clone())?;

    let compute = ComputeResource::new(&config);
    compute.register_listener(Arc::new(MetricsListener {
        metrics: resource_metrics.clone(),
    }));
    compute.boot(&SystemCapabilities::new(config.clone()));

    let resolver = Arc::new(LocalRepositoryResolver::new(&config.local_repository));
    let components = Arc::new(ComponentRegistry::new());
    let container = LoaderContext::new(
        config.clone(),
        compute.clone(),
        resolver,
        components,
        Some(provision_metrics),
    );
    info!(
        mode = ?config.effective_mode(),
        persistent_provisioning = config.persistent_provisioning,
        "loader context ready"
    );

    let metrics_server = if config.metrics.enabled {
        match spawn_http_server(registry, config.metrics.listen) {
            Ok(server) => {
                info!(address = %server.addr(), "metrics exporter enabled");
                Some(server)
            }
            Err(err) => {
                warn!(error = %err, "failed to start metrics exporter");
                None
            }
        }
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    compute.shutdown();
    container.teardown();
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}
