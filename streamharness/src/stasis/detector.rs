//! Polling detector that decides when a pipeline has stopped making progress.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::state::StasisState;
use crate::config::StasisConfig;
use crate::errors::StasisTimeoutError;
use crate::waiter::StageProbe;

/// Final per-stage view in a [`StasisReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageStasis {
    /// Stage name.
    pub stage: String,
    /// Consecutive idle polls at the end.
    pub idle_polls: u32,
    /// Whether the stage was confirmed stopped.
    pub stopped: bool,
    /// Records the stage had sent.
    pub sent: u64,
}

/// A pipeline that reached quiescence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StasisReport {
    /// Polls performed, baseline excluded.
    pub polls: u32,
    /// Time spent polling.
    pub elapsed: Duration,
    /// Per-stage state at the end.
    pub stages: Vec<StageStasis>,
    /// Records sent by the output stages.
    pub output_total: u64,
}

/// Result of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollVerdict {
    /// One-based poll number.
    pub poll: u32,
    /// Every stage idle for the threshold or stopped.
    pub all_settled: bool,
    /// Records sent by the output stages.
    pub output_total: u64,
    /// The completion policy is satisfied.
    pub complete: bool,
}

struct Monitored {
    probe: Arc<dyn StageProbe>,
    is_output: bool,
    state: Option<StasisState>,
}

/// Watches stage counters until none of them move.
///
/// Each poll compares every stage's counters against the previous poll.
/// Any increase resets that stage's idle count; otherwise it grows by one.
/// The pipeline is quiescent once every stage has been idle for
/// `idle_threshold` consecutive polls (or has stopped), combined with the
/// output target according to the completion policy.
pub struct StasisDetector {
    config: StasisConfig,
    stages: Vec<Monitored>,
    polls: u32,
}

impl StasisDetector {
    /// Creates a detector with no stages.
    #[must_use]
    pub fn new(config: StasisConfig) -> Self {
        Self {
            config,
            stages: Vec::new(),
            polls: 0,
        }
    }

    /// Adds a stage to watch.
    #[must_use]
    pub fn monitor(mut self, probe: Arc<dyn StageProbe>) -> Self {
        self.add(probe, false);
        self
    }

    /// Adds a stage whose `sent` counter counts toward the output target.
    #[must_use]
    pub fn monitor_output(mut self, probe: Arc<dyn StageProbe>) -> Self {
        self.add(probe, true);
        self
    }

    /// Adds a stage in place.
    pub fn add(&mut self, probe: Arc<dyn StageProbe>, is_output: bool) {
        self.stages.push(Monitored {
            probe,
            is_output,
            state: None,
        });
    }

    /// Number of watched stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Polls performed so far.
    #[must_use]
    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Current per-stage states; empty before the baseline.
    #[must_use]
    pub fn states(&self) -> Vec<StasisState> {
        self.stages.iter().filter_map(|m| m.state.clone()).collect()
    }

    fn threshold(&self) -> u32 {
        self.config.idle_threshold.max(1)
    }

    /// Records every stage's starting counters, resetting idle counts.
    pub fn baseline(&mut self) {
        for m in &mut self.stages {
            m.state = Some(StasisState::new(m.probe.name(), m.probe.progress()));
        }
        self.polls = 0;
    }

    /// Samples every stage once, taking the baseline first if needed.
    pub fn poll_once(&mut self) -> PollVerdict {
        if self.stages.iter().any(|m| m.state.is_none()) {
            self.baseline();
        }
        self.polls += 1;

        let threshold = self.threshold();
        let mut all_settled = true;
        let mut output_total = 0u64;
        for m in &mut self.stages {
            let snapshot = m.probe.progress();
            let running = m.probe.is_running();
            let stopped = m.probe.is_stopped();
            let Some(state) = m.state.as_mut() else {
                continue;
            };
            if state.observe(snapshot, running, stopped) {
                debug!(stage = %state.stage, poll = self.polls, "Stage advanced");
            }
            all_settled &= state.is_settled(threshold);
            if m.is_output {
                output_total = output_total.saturating_add(state.last.sent);
            }
        }

        PollVerdict {
            poll: self.polls,
            all_settled,
            output_total,
            complete: self.config.completion.is_complete(all_settled, output_total),
        }
    }

    /// Polls until quiescent or out of budget.
    ///
    /// Takes a fresh baseline, then sleeps `poll_interval` before each of at
    /// most `max_polls` polls.
    pub async fn run(&mut self) -> Result<StasisReport, StasisTimeoutError> {
        let interval = self.config.poll_interval();
        let started = Instant::now();
        self.baseline();
        debug!(
            stages = self.stages.len(),
            threshold = self.threshold(),
            max_polls = self.config.max_polls,
            "Waiting for stasis"
        );

        let mut last = None;
        for _ in 0..self.config.max_polls {
            tokio::time::sleep(interval).await;
            let verdict = self.poll_once();
            if verdict.complete {
                let report = self.report(started.elapsed(), verdict.output_total);
                info!(
                    polls = report.polls,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    output_total = report.output_total,
                    "Pipeline quiescent"
                );
                return Ok(report);
            }
            last = Some(verdict);
        }

        let err = StasisTimeoutError {
            polls: self.polls,
            stages: self
                .stages
                .iter()
                .filter_map(|m| m.state.as_ref())
                .map(|s| (s.stage.clone(), s.idle_polls))
                .collect(),
            output_total: last.map_or(0, |v| v.output_total),
            target: self.config.completion.target(),
        };
        warn!(polls = err.polls, "{}", err);
        Err(err)
    }

    fn report(&self, elapsed: Duration, output_total: u64) -> StasisReport {
        StasisReport {
            polls: self.polls,
            elapsed,
            stages: self
                .stages
                .iter()
                .filter_map(|m| m.state.as_ref())
                .map(|s| StageStasis {
                    stage: s.stage.clone(),
                    idle_polls: s.idle_polls,
                    stopped: s.stopped,
                    sent: s.last.sent,
                })
                .collect(),
            output_total,
        }
    }
}

impl std::fmt::Debug for StasisDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StasisDetector")
            .field("config", &self.config)
            .field("stages", &self.stages.len())
            .field("polls", &self.polls)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompletionPolicy;
    use crate::core::ProgressSnapshot;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    /// Sends one more record on each of its first `moves` progress reads.
    struct ScriptedProbe {
        name: &'static str,
        reads: AtomicU64,
        moves: u64,
        running: AtomicBool,
        stopped: AtomicBool,
    }

    impl ScriptedProbe {
        fn new(name: &'static str, moves: u64) -> Arc<Self> {
            Arc::new(Self {
                name,
                reads: AtomicU64::new(0),
                moves,
                running: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
            })
        }
    }

    impl StageProbe for ScriptedProbe {
        fn name(&self) -> String {
            self.name.to_string()
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        fn is_stopped(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }

        fn current_state(&self) -> String {
            "running".to_string()
        }

        fn progress(&self) -> ProgressSnapshot {
            let reads = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            ProgressSnapshot::new(0, 0, reads.min(self.moves))
        }
    }

    fn config(threshold: u32, max_polls: u32) -> StasisConfig {
        StasisConfig::new()
            .with_poll_interval_ms(100)
            .with_idle_threshold(threshold)
            .with_max_polls(max_polls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiescent_after_exactly_threshold_idle_polls() {
        let mut detector = StasisDetector::new(config(10, 50))
            .monitor(ScriptedProbe::new("source", 0))
            .monitor(ScriptedProbe::new("sink", 0));

        let report = detector.run().await.unwrap();
        assert_eq!(report.polls, 10);
        assert!(report.elapsed >= Duration::from_millis(1000));
        assert!(report.elapsed < Duration::from_millis(1100));
        assert!(report.stages.iter().all(|s| s.idle_polls == 10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_advancing_stage_delays_quiescence() {
        // Baseline reads 1; polls 1..=4 see 2..=5; idle from poll 5 on.
        let mut detector =
            StasisDetector::new(config(3, 50)).monitor_output(ScriptedProbe::new("filter", 5));

        let report = detector.run().await.unwrap();
        assert_eq!(report.polls, 7);
        assert_eq!(report.output_total, 5);
    }

    #[test]
    fn test_never_quiescent_while_advancing() {
        let mut detector =
            StasisDetector::new(config(1, 50)).monitor(ScriptedProbe::new("busy", u64::MAX));
        for _ in 0..20 {
            assert!(!detector.poll_once().complete);
        }
        assert_eq!(detector.polls(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_stages_are_settled() {
        let stopped = ScriptedProbe::new("done", 0);
        stopped.running.store(false, Ordering::SeqCst);
        stopped.stopped.store(true, Ordering::SeqCst);

        let mut detector = StasisDetector::new(config(10, 50)).monitor(stopped);
        let report = detector.run().await.unwrap();
        assert_eq!(report.polls, 1);
        assert!(report.stages[0].stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_not_reached_times_out() {
        let cfg = config(2, 6).with_completion(CompletionPolicy::IdleAndTarget(10));
        let mut detector = StasisDetector::new(cfg).monitor_output(ScriptedProbe::new("sink", 3));

        let err = detector.run().await.unwrap_err();
        assert_eq!(err.polls, 6);
        assert_eq!(err.output_total, 3);
        assert_eq!(err.target, Some(10));
        assert_eq!(err.stages, vec![("sink".to_string(), 4)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_reached_ends_early() {
        let cfg = config(50, 100).with_completion(CompletionPolicy::IdleOrTarget(4));
        let mut detector =
            StasisDetector::new(cfg).monitor_output(ScriptedProbe::new("sink", u64::MAX));

        let report = detector.run().await.unwrap();
        // Baseline reads 1, so poll 3 sees 4.
        assert_eq!(report.polls, 3);
        assert_eq!(report.output_total, 4);
    }
}
