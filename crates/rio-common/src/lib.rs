//! ---
//! rio_section: "02-runtime-foundation"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Shared primitives and utilities for the Rio runtime."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
//! Core shared primitives for the Rio provisioning workspace.
//! This crate exposes configuration loading, logging, and version
//! metadata utilities consumed across the workspace.

pub mod config;
pub mod logging;
pub mod version;

pub use config::{
    LoggingConfig, MeasurementConfig, MetricsConfig, Mode, RioConfig, UnexportConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use version::VersionInfo;
