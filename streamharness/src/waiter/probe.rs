//! What the harness needs to observe about a stage under test.

use std::sync::Arc;

use crate::core::ProgressSnapshot;

/// Read-only view of a running stage.
///
/// Implementations must be cheap to call from a polling loop and must not
/// block on the stage's own work.
#[cfg_attr(test, mockall::automock)]
pub trait StageProbe: Send + Sync {
    /// Stage name used in logs and errors.
    fn name(&self) -> String;

    /// Returns true once the stage is processing records.
    fn is_running(&self) -> bool;

    /// Returns true once the stage has reached a terminal state.
    fn is_stopped(&self) -> bool;

    /// Human-readable lifecycle state.
    fn current_state(&self) -> String;

    /// Current progress counters.
    fn progress(&self) -> ProgressSnapshot;
}

impl<T: StageProbe + ?Sized> StageProbe for Arc<T> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn is_running(&self) -> bool {
        (**self).is_running()
    }

    fn is_stopped(&self) -> bool {
        (**self).is_stopped()
    }

    fn current_state(&self) -> String {
        (**self).current_state()
    }

    fn progress(&self) -> ProgressSnapshot {
        (**self).progress()
    }
}
