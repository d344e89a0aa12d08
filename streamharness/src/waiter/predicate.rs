//! Conditions a state waiter can wait for.

use std::fmt;
use std::sync::Arc;

use super::probe::StageProbe;

type CheckFn = dyn Fn(&dyn StageProbe) -> bool + Send + Sync;

/// A condition on a stage's observable state.
#[derive(Clone)]
pub enum StatePredicate {
    /// The stage reports running.
    ReachedRunning,
    /// The stage reports stopped, and so does its collaborator if any.
    ReachedStopped {
        /// An ordering or splicing stage that must also have stopped.
        collaborator: Option<Arc<dyn StageProbe>>,
    },
    /// Any other condition.
    Custom {
        /// Shown in timeout errors.
        description: String,
        /// The check itself.
        check: Arc<CheckFn>,
    },
}

impl StatePredicate {
    /// Waits for the running state.
    #[must_use]
    pub fn running() -> Self {
        Self::ReachedRunning
    }

    /// Waits for a terminal state.
    #[must_use]
    pub fn stopped() -> Self {
        Self::ReachedStopped { collaborator: None }
    }

    /// Waits for a terminal state on both the stage and `collaborator`.
    #[must_use]
    pub fn stopped_with(collaborator: Arc<dyn StageProbe>) -> Self {
        Self::ReachedStopped {
            collaborator: Some(collaborator),
        }
    }

    /// Waits for an arbitrary condition.
    pub fn custom<F>(description: impl Into<String>, check: F) -> Self
    where
        F: Fn(&dyn StageProbe) -> bool + Send + Sync + 'static,
    {
        Self::Custom {
            description: description.into(),
            check: Arc::new(check),
        }
    }

    /// Evaluates the predicate once.
    #[must_use]
    pub fn is_satisfied(&self, probe: &dyn StageProbe) -> bool {
        match self {
            Self::ReachedRunning => probe.is_running(),
            Self::ReachedStopped { collaborator } => {
                probe.is_stopped() && collaborator.as_ref().map_or(true, |c| c.is_stopped())
            }
            Self::Custom { check, .. } => check(probe),
        }
    }

    /// Description of the awaited state.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::ReachedRunning => "running".to_string(),
            Self::ReachedStopped { collaborator: None } => "stopped".to_string(),
            Self::ReachedStopped {
                collaborator: Some(c),
            } => format!("stopped (with {})", c.name()),
            Self::Custom { description, .. } => description.clone(),
        }
    }

    /// State string reported when the wait times out.
    pub(crate) fn observed_state(&self, probe: &dyn StageProbe) -> String {
        match self {
            Self::ReachedStopped {
                collaborator: Some(c),
            } if probe.is_stopped() => format!(
                "{}; {} is {}",
                probe.current_state(),
                c.name(),
                c.current_state()
            ),
            _ => probe.current_state(),
        }
    }
}

impl fmt::Debug for StatePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StatePredicate")
            .field(&self.describe())
            .finish()
    }
}
