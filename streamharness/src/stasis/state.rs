//! Per-stage idle tracking.

use serde::Serialize;

use crate::core::ProgressSnapshot;

/// What the detector remembers about one stage between polls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StasisState {
    /// Stage name.
    pub stage: String,
    /// Counters seen on the previous poll.
    pub last: ProgressSnapshot,
    /// Consecutive polls without any counter increase.
    pub idle_polls: u32,
    /// Set once the stage is confirmed stopped; its counters are no longer compared.
    pub stopped: bool,
    /// Whether the stage has been seen running.
    pub seen_running: bool,
}

impl StasisState {
    /// Starts tracking from a baseline snapshot.
    #[must_use]
    pub fn new(stage: impl Into<String>, baseline: ProgressSnapshot) -> Self {
        Self {
            stage: stage.into(),
            last: baseline,
            idle_polls: 0,
            stopped: false,
            seen_running: false,
        }
    }

    /// Folds one poll's observation in. Returns true if a counter advanced.
    ///
    /// A stage that is not running yet is simply idle while its counters
    /// stay put. A stage reporting stopped is frozen on the first poll on
    /// which its counters did not move.
    pub fn observe(&mut self, snapshot: ProgressSnapshot, running: bool, stopped: bool) -> bool {
        if self.stopped {
            self.idle_polls = self.idle_polls.saturating_add(1);
            return false;
        }

        self.seen_running |= running;
        let advanced = snapshot.advanced_since(&self.last);
        self.last = snapshot;
        if advanced {
            self.idle_polls = 0;
        } else {
            self.idle_polls = self.idle_polls.saturating_add(1);
            self.stopped = stopped;
        }
        advanced
    }

    /// Returns true if the stage no longer blocks quiescence.
    #[must_use]
    pub fn is_settled(&self, threshold: u32) -> bool {
        self.stopped || self.idle_polls >= threshold
    }
}
