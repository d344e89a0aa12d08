//! Stasis detection and lifecycle waits against hand-driven stages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamharness::config::{CompletionPolicy, StasisConfig, WaitConfig};
use streamharness::core::ProgressSnapshot;
use streamharness::errors::HarnessError;
use streamharness::stasis::StasisDetector;
use streamharness::testing::assert_quiescent;
use streamharness::waiter::{wait_for_running, wait_for_stopped, StageProbe};

/// A stage whose state and counters are set by the test.
#[derive(Debug)]
struct ManualStage {
    name: String,
    state: parking_lot::Mutex<String>,
    sent: AtomicU64,
}

impl ManualStage {
    fn new(name: &str, state: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: parking_lot::Mutex::new(state.to_string()),
            sent: AtomicU64::new(0),
        })
    }

    fn set_state(&self, state: &str) {
        *self.state.lock() = state.to_string();
    }
}

impl StageProbe for ManualStage {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_running(&self) -> bool {
        *self.state.lock() == "running"
    }

    fn is_stopped(&self) -> bool {
        *self.state.lock() == "stopped"
    }

    fn current_state(&self) -> String {
        self.state.lock().clone()
    }

    fn progress(&self) -> ProgressSnapshot {
        let sent = self.sent.load(Ordering::SeqCst);
        ProgressSnapshot::new(sent, sent, sent)
    }
}

fn config(threshold: u32, max_polls: u32) -> StasisConfig {
    StasisConfig::new()
        .with_poll_interval_ms(100)
        .with_idle_threshold(threshold)
        .with_max_polls(max_polls)
}

#[tokio::test(start_paused = true)]
async fn test_still_pipeline_settles_after_exactly_threshold_polls() {
    let a = ManualStage::new("filter", "running");
    let b = ManualStage::new("sink", "running");
    a.sent.store(40, Ordering::SeqCst);
    b.sent.store(40, Ordering::SeqCst);

    let mut detector = StasisDetector::new(config(10, 600))
        .monitor(a)
        .monitor_output(b);
    let report = detector.run().await.unwrap();

    assert_eq!(report.polls, 10);
    assert_eq!(report.output_total, 40);
    assert!(report.elapsed >= Duration::from_millis(1_000));
    assert!(report.elapsed < Duration::from_millis(1_100));
    assert_quiescent(&report, 10);
}

#[tokio::test(start_paused = true)]
async fn test_late_burst_restarts_the_idle_count() {
    let stage = ManualStage::new("aggregator", "running");
    let driver = stage.clone();
    tokio::spawn(async move {
        // Quiet for four polls, then one more record.
        tokio::time::sleep(Duration::from_millis(450)).await;
        driver.sent.fetch_add(1, Ordering::SeqCst);
    });

    let mut detector = StasisDetector::new(config(5, 100)).monitor_output(stage);
    let report = detector.run().await.unwrap();

    // The fifth poll sees the increase; five idle polls follow it.
    assert_eq!(report.polls, 10);
    assert_eq!(report.output_total, 1);
}

#[tokio::test(start_paused = true)]
async fn test_busy_pipeline_times_out_with_per_stage_detail() {
    let stage = ManualStage::new("source", "running");
    let driver = stage.clone();
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(50));
        loop {
            interval.tick().await;
            driver.sent.fetch_add(1, Ordering::SeqCst);
        }
    });

    let mut detector = StasisDetector::new(config(3, 20)).monitor(stage);
    let err = detector.run().await.unwrap_err();
    ticker.abort();

    assert_eq!(err.polls, 20);
    assert_eq!(err.stages, vec![("source".to_string(), 0)]);
    assert!(HarnessError::from(err).is_timeout());
}

#[tokio::test(start_paused = true)]
async fn test_target_policy_waits_for_output() {
    let sink = ManualStage::new("sink", "running");
    let driver = sink.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1_550)).await;
        driver.sent.store(50, Ordering::SeqCst);
    });

    let stasis = config(3, 100).with_completion(CompletionPolicy::IdleAndTarget(50));
    let mut detector = StasisDetector::new(stasis).monitor_output(sink);
    let report = detector.run().await.unwrap();

    // Idle from the start, but the target is only met at poll 16.
    assert_eq!(report.polls, 19);
    assert_eq!(report.output_total, 50);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_reports_last_state_when_never_running() {
    let stage = ManualStage::new("aggregator", "starting");
    let wait = WaitConfig::new().with_poll_interval_ms(50).with_max_polls(8);

    let err = wait_for_running(&*stage, &wait).await.unwrap_err();
    assert_eq!(err.stage, "aggregator");
    assert_eq!(err.target, "running");
    assert_eq!(err.polls, 8);
    assert_eq!(err.last_state, "starting");
}

#[tokio::test(start_paused = true)]
async fn test_stop_wait_names_the_pending_collaborator() {
    let stage = ManualStage::new("aggregator", "stopped");
    let upstream = ManualStage::new("filter", "running");
    let collaborator: Arc<dyn StageProbe> = upstream.clone();
    let wait = WaitConfig::new().with_poll_interval_ms(50).with_max_polls(4);

    let err = wait_for_stopped(&*stage, Some(collaborator.clone()), &wait)
        .await
        .unwrap_err();
    assert!(err.last_state.contains("filter is running"), "{}", err.last_state);

    upstream.set_state("stopped");
    let outcome = wait_for_stopped(&*stage, Some(collaborator), &wait)
        .await
        .unwrap();
    assert_eq!(outcome.polls, 1);
}
