//! ---
//! rio_section: "06-service-lifecycle"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Service bean lifecycle state machine and advertisement."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle states of a hosted service bean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceState {
    Uninitialized,
    Starting,
    Initialized,
    Started,
    Advertised,
    Unadvertised,
    Stopped,
    Aborted,
}

/// Raised when a lifecycle method is invoked out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal service transition {from:?} -> {to:?}")]
pub struct TransitionError {
    /// State the service was in.
    pub from: ServiceState,
    /// State the caller attempted to move to.
    pub to: ServiceState,
}

/// Validate a lifecycle transition against the state-machine table.
/// Callers inspect the result; illegal transitions are an error value,
/// never a panic.
pub fn verify_transition(from: ServiceState, to: ServiceState) -> Result<(), TransitionError> {
    use ServiceState::*;
    let allowed = match (from, to) {
        (Uninitialized, Starting) => true,
        (Starting, Initialized) | (Starting, Aborted) => true,
        (Initialized, Started) | (Initialized, Aborted) => true,
        (Started, Advertised) | (Started, Stopped) => true,
        (Advertised, Unadvertised) => true,
        (Unadvertised, Advertised) | (Unadvertised, Stopped) => true,
        _ => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ServiceState::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        for (from, to) in [
            (Uninitialized, Starting),
            (Starting, Initialized),
            (Initialized, Started),
            (Started, Advertised),
            (Advertised, Unadvertised),
            (Unadvertised, Advertised),
            (Unadvertised, Stopped),
        ] {
            assert!(verify_transition(from, to).is_ok(), "{from:?} -> {to:?}");
        }
    }

    #[test]
    fn skipping_states_is_illegal() {
        assert!(verify_transition(Uninitialized, Started).is_err());
        assert!(verify_transition(Starting, Advertised).is_err());
        assert!(verify_transition(Stopped, Advertised).is_err());
    }

    #[test]
    fn advertised_cannot_stop_without_unadvertising() {
        let err = verify_transition(Advertised, Stopped).unwrap_err();
        assert_eq!(err.from, Advertised);
        assert_eq!(err.to, Stopped);
    }

    #[test]
    fn failures_abort_from_construction_states() {
        assert!(verify_transition(Starting, Aborted).is_ok());
        assert!(verify_transition(Initialized, Aborted).is_ok());
        assert!(verify_transition(Started, Aborted).is_err());
    }
}
