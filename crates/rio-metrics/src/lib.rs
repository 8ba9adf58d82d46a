//! ---
//! rio_section: "07-observability"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Metrics collection and export utilities."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across Rio components.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the service provisioning path.
#[derive(Clone)]
pub struct ProvisionMetrics {
    registry: SharedRegistry,
    services_loaded: IntCounter,
    services_unloaded: IntCounter,
    artifacts_resolved: IntCounterVec,
    instantiation_failures: IntCounter,
}

impl ProvisionMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let services_loaded = IntCounter::with_opts(Opts::new(
            "rio_services_loaded_total",
            "Total number of service beans loaded",
        ))?;
        registry.register(Box::new(services_loaded.clone()))?;

        let services_unloaded = IntCounter::with_opts(Opts::new(
            "rio_services_unloaded_total",
            "Total number of service beans unloaded",
        ))?;
        registry.register(Box::new(services_unloaded.clone()))?;

        let artifacts_resolved = IntCounterVec::new(
            Opts::new(
                "rio_artifacts_resolved_total",
                "Artifact resolutions by cache outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(artifacts_resolved.clone()))?;

        let instantiation_failures = IntCounter::with_opts(Opts::new(
            "rio_instantiation_failures_total",
            "Service bean instantiation failures",
        ))?;
        registry.register(Box::new(instantiation_failures.clone()))?;

        Ok(Self {
            registry,
            services_loaded,
            services_unloaded,
            artifacts_resolved,
            instantiation_failures,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_loaded(&self) {
        self.services_loaded.inc();
    }

    pub fn inc_unloaded(&self) {
        self.services_unloaded.inc();
    }

    /// `outcome` is `resolved` for a fresh resolution, `cached` for a
    /// cache hit.
    pub fn inc_resolution(&self, outcome: &str) {
        self.artifacts_resolved.with_label_values(&[outcome]).inc();
    }

    pub fn inc_instantiation_failure(&self) {
        self.instantiation_failures.inc();
    }
}

/// Metrics recorded by the compute resource.
#[derive(Clone)]
pub struct ResourceMetrics {
    registry: SharedRegistry,
    capability_count: IntGauge,
    utilization: Gauge,
    provisions: IntCounter,
}

impl ResourceMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let capability_count = IntGauge::with_opts(Opts::new(
            "rio_platform_capabilities",
            "Number of platform capabilities currently installed",
        ))?;
        registry.register(Box::new(capability_count.clone()))?;

        let utilization = Gauge::with_opts(Opts::new(
            "rio_resource_utilization",
            "Mean measured utilization across capabilities",
        ))?;
        registry.register(Box::new(utilization.clone()))?;

        let provisions = IntCounter::with_opts(Opts::new(
            "rio_capability_provisions_total",
            "Capability provisioning operations completed",
        ))?;
        registry.register(Box::new(provisions.clone()))?;

        Ok(Self {
            registry,
            capability_count,
            utilization,
            provisions,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn set_capability_count(&self, count: usize) {
        self.capability_count.set(count as i64);
    }

    pub fn set_utilization(&self, value: f64) {
        self.utilization.set(value);
    }

    pub fn inc_provision(&self) {
        self.provisions.inc();
    }
}

pub use prometheus;
