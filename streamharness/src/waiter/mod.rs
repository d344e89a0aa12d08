//! Waiting for stage lifecycle transitions.
//!
//! Stages start and stop asynchronously without notifying anyone, so the
//! harness polls them with a bounded number of checks.

mod predicate;
mod probe;
mod wait;

#[cfg(test)]
pub use probe::MockStageProbe;
pub use predicate::StatePredicate;
pub use probe::StageProbe;
pub use wait::{wait_for_running, wait_for_stopped, wait_until, WaitOutcome};
