//! ---
//! rio_section: "06-service-lifecycle"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Service bean lifecycle state machine and advertisement."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
//! The lifecycle adapter every hosted service bean runs through:
//! `start → initialize → advertise ⇄ unadvertise → stop → destroy`,
//! with validated transitions, fixed-order advertisement attributes, and
//! ordered best-effort teardown.

pub mod adapter;
pub mod attributes;
pub mod state;

pub use adapter::{
    InMemoryAdvertiser, InMemoryExporter, ServiceAdvertiser, ServiceBeanAdapter,
    ServiceBeanManager, ServiceExporter,
};
pub use attributes::ServiceAttribute;
pub use state::{verify_transition, ServiceState, TransitionError};

/// Result alias used throughout the service crate.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Error type for service lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// A lifecycle method was invoked out of order.
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// A bean callback failed.
    #[error("bean callback failed")]
    Bean(#[from] rio_api::BeanError),
    /// Lookup registration failed.
    #[error("advertisement failed")]
    Advertise(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Proxy export failed.
    #[error("export failed")]
    Export(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// An operation needed the service proxy before `start` produced it.
    #[error("service has not been started")]
    NotStarted,
}
