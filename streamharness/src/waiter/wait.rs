//! Bounded polling for stage lifecycle transitions.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::predicate::StatePredicate;
use super::probe::StageProbe;
use crate::config::WaitConfig;
use crate::errors::StateTimeoutError;

/// A successful wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitOutcome {
    /// Checks performed, including the one that succeeded.
    pub polls: u32,
    /// Time spent waiting.
    pub elapsed: Duration,
    /// State observed on the successful check.
    pub state: String,
}

/// Polls `predicate` against `probe` until it holds.
///
/// The first check happens immediately; later checks are `poll_interval`
/// apart. At most `max_polls` checks are made (at least one).
pub async fn wait_until(
    probe: &dyn StageProbe,
    predicate: &StatePredicate,
    poll_interval: Duration,
    max_polls: u32,
) -> Result<WaitOutcome, StateTimeoutError> {
    let max_polls = max_polls.max(1);
    let started = Instant::now();
    let stage = probe.name();
    let target = predicate.describe();

    for poll in 1..=max_polls {
        if predicate.is_satisfied(probe) {
            debug!(stage = %stage, target = %target, polls = poll, "Stage reached target state");
            return Ok(WaitOutcome {
                polls: poll,
                elapsed: started.elapsed(),
                state: probe.current_state(),
            });
        }
        if poll < max_polls {
            tokio::time::sleep(poll_interval).await;
        }
    }

    let last_state = predicate.observed_state(probe);
    warn!(
        stage = %stage,
        target = %target,
        polls = max_polls,
        last_state = %last_state,
        "Stage did not reach target state"
    );
    Err(StateTimeoutError {
        stage,
        target,
        polls: max_polls,
        last_state,
    })
}

/// Waits for `probe` to report running.
pub async fn wait_for_running(
    probe: &dyn StageProbe,
    config: &WaitConfig,
) -> Result<WaitOutcome, StateTimeoutError> {
    wait_until(
        probe,
        &StatePredicate::running(),
        config.poll_interval(),
        config.max_polls,
    )
    .await
}

/// Waits for `probe`, and `collaborator` if given, to report stopped.
pub async fn wait_for_stopped(
    probe: &dyn StageProbe,
    collaborator: Option<Arc<dyn StageProbe>>,
    config: &WaitConfig,
) -> Result<WaitOutcome, StateTimeoutError> {
    let predicate = match collaborator {
        Some(c) => StatePredicate::stopped_with(c),
        None => StatePredicate::stopped(),
    };
    wait_until(probe, &predicate, config.poll_interval(), config.max_polls).await
}
