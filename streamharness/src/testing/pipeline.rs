//! Wires producers, stages, links and sinks into one harness run.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use super::logic::StageLogic;
use super::sink::{spawn_sink, CountingSink};
use super::stage::SimulatedStage;
use crate::cancellation::CleanupRegistry;
use crate::channel::{ChannelLink, LinkRegistry, LinkStatsSnapshot};
use crate::codec::Record;
use crate::config::HarnessConfig;
use crate::core::{SourceId, StageRole};
use crate::errors::{HarnessError, Result, ValidationFailure};
use crate::generator::spawn_producer;
use crate::observability::{PhaseTimer, RunAttributes};
use crate::stasis::{StasisDetector, StasisReport};
use crate::validation::{ValidationAggregator, ValidationSummary};
use crate::waiter::{wait_for_running, StageProbe};

/// Default time each component gets to finish on its own at teardown.
pub const DEFAULT_TEARDOWN_GRACE: Duration = Duration::from_secs(1);

/// What one completed run observed.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRunReport {
    /// Run name from the config.
    pub run_name: String,
    /// Unique id of the run.
    pub run_id: Uuid,
    /// How the pipeline reached quiescence.
    pub stasis: StasisReport,
    /// Per-link counters at quiescence.
    pub links: BTreeMap<String, LinkStatsSnapshot>,
    /// Validation counts across every link.
    pub validation: ValidationSummary,
    /// Every rejected record.
    pub failures: Vec<ValidationFailure>,
    /// Lifecycle state of every component after teardown.
    pub final_states: BTreeMap<String, String>,
    /// Teardown actions that failed, timed out or reported an error.
    pub teardown_errors: Vec<String>,
}

impl PipelineRunReport {
    /// Fails with the first validation failure, if any.
    pub fn assert_clean(&self) -> Result<()> {
        match self.failures.first() {
            None => Ok(()),
            Some(first) => Err(HarnessError::ValidationFailed {
                count: self.failures.len(),
                first: Box::new(first.clone()),
            }),
        }
    }

    /// Counters for one link.
    #[must_use]
    pub fn link(&self, name: &str) -> Option<&LinkStatsSnapshot> {
        self.links.get(name)
    }
}

/// One harness run: the pipeline under test plus its teardown.
///
/// Components are added first, then linked, then [`run`](Self::run) waits
/// for stasis and tears everything down whether or not stasis was reached.
/// Validation failures are only reported once teardown has finished.
pub struct TestPipeline {
    config: HarnessConfig,
    attributes: RunAttributes,
    aggregator: Arc<ValidationAggregator>,
    links: Arc<LinkRegistry>,
    cleanup: CleanupRegistry,
    detector: StasisDetector,
    probes: Vec<Arc<dyn StageProbe>>,
    stages: Vec<Arc<dyn StageProbe>>,
    teardown_errors: Arc<Mutex<Vec<String>>>,
    teardown_grace: Duration,
}

impl TestPipeline {
    /// Creates an empty run after validating `config`.
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        let aggregator = Arc::new(ValidationAggregator::new());
        let links = Arc::new(LinkRegistry::new(config.link.clone(), aggregator.clone()));
        Ok(Self {
            attributes: RunAttributes::new(config.run_name.clone()),
            detector: StasisDetector::new(config.stasis.clone()),
            config,
            aggregator,
            links,
            cleanup: CleanupRegistry::new(),
            probes: Vec::new(),
            stages: Vec::new(),
            teardown_errors: Arc::new(Mutex::new(Vec::new())),
            teardown_grace: DEFAULT_TEARDOWN_GRACE,
        })
    }

    /// Sets how long each component gets to finish before being stopped.
    #[must_use]
    pub fn with_teardown_grace(mut self, grace: Duration) -> Self {
        self.teardown_grace = grace;
        self
    }

    /// Unique id of this run.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.attributes.run_id
    }

    /// The run's validation aggregator.
    #[must_use]
    pub fn aggregator(&self) -> &Arc<ValidationAggregator> {
        &self.aggregator
    }

    /// The run's link registry.
    #[must_use]
    pub fn links(&self) -> &Arc<LinkRegistry> {
        &self.links
    }

    fn is_output(&self, source: SourceId) -> bool {
        self.config.roles.role_of(source) == Some(StageRole::Sink)
    }

    fn track(&mut self, probe: Arc<dyn StageProbe>, is_output: bool) {
        self.detector.add(probe.clone(), is_output);
        self.probes.push(probe);
    }

    /// Adds a producer writing `count` records from `generator` as `source`.
    pub fn add_producer<G>(
        &mut self,
        source: SourceId,
        generator: G,
        count: u64,
        send_stop: bool,
    ) -> Result<()>
    where
        G: Iterator<Item = Record> + Send + 'static,
    {
        let writer = self.links.producer_endpoint(source)?;
        let handle = spawn_producer(
            format!("producer-{source}"),
            generator,
            writer,
            count,
            send_stop,
        );
        let probe = handle.probe();
        let is_output = self.is_output(source);
        self.track(probe, is_output);

        let errors = self.teardown_errors.clone();
        self.cleanup.register(format!("producer-{source}"), move || async move {
            if !handle.is_finished() {
                handle.abort();
            }
            if let Err(e) = handle.join().await {
                errors.lock().push(format!("producer-{source}: {e}"));
            }
        });
        Ok(())
    }

    /// Adds an in-process stage owning both of `source`'s endpoints.
    pub fn add_stage<L>(&mut self, stage: SimulatedStage, source: SourceId, logic: L) -> Result<()>
    where
        L: StageLogic + 'static,
    {
        let endpoints = self.links.stage_endpoints(source)?;
        let handle = stage.spawn(logic, endpoints.input, endpoints.output);
        let probe: Arc<dyn StageProbe> = handle.stage();
        let is_output = self.is_output(source);
        self.track(probe.clone(), is_output);
        self.stages.push(probe);

        let grace = self.teardown_grace;
        let errors = self.teardown_errors.clone();
        let name = handle.stage().name().to_string();
        self.cleanup.register(name.clone(), move || async move {
            if let Err(e) = handle.stop_within(grace, "teardown").await {
                errors.lock().push(format!("{name}: {e}"));
            }
        });
        Ok(())
    }

    /// Adds a terminal sink reading `source`'s input endpoint.
    ///
    /// The sink always counts toward the output target.
    pub fn add_sink(&mut self, source: SourceId, sink: Arc<CountingSink>) -> Result<()> {
        let input = self.links.consumer_endpoint(source)?;
        let task = spawn_sink(sink.clone(), input);
        self.track(sink.clone(), true);

        let grace = self.teardown_grace;
        let errors = self.teardown_errors.clone();
        let name = sink.name();
        self.cleanup.register(name.clone(), move || async move {
            let mut task = task;
            match tokio::time::timeout(grace, &mut task).await {
                Ok(Ok(Ok(_))) => {}
                Ok(Ok(Err(e))) => errors.lock().push(format!("{name}: {e}")),
                Ok(Err(e)) => errors.lock().push(format!("{name}: {e}")),
                Err(_) => {
                    task.abort();
                    errors.lock().push(format!("{name}: did not drain within {grace:?}"));
                }
            }
        });
        Ok(())
    }

    /// Starts `link` from `from`'s output to `to`'s input.
    pub fn connect(&self, link: ChannelLink, from: SourceId, to: SourceId) -> Result<()> {
        self.links.connect(link, from, to)
    }

    /// Waits until every simulated stage reports running.
    pub async fn wait_running(&self) -> Result<()> {
        for stage in &self.stages {
            wait_for_running(&**stage, &self.config.wait).await?;
        }
        Ok(())
    }

    /// Waits for stasis, tears everything down and reports.
    ///
    /// Teardown runs even when stasis times out; the timeout is returned
    /// afterwards.
    pub async fn run(self) -> Result<PipelineRunReport> {
        let attributes = self
            .attributes
            .clone()
            .with_topology(self.probes.len(), self.links.link_count());
        let span = attributes.span();
        self.run_inner(attributes).instrument(span).await
    }

    async fn run_inner(mut self, attributes: RunAttributes) -> Result<PipelineRunReport> {
        info!(
            stages = attributes.stages,
            links = attributes.links,
            "Harness run started"
        );

        let timer = PhaseTimer::start("stasis");
        let stasis = self.detector.run().await;
        timer.finish();
        let link_stats = self.links.all_stats();

        let timer = PhaseTimer::start("teardown");
        let links = self.links.clone();
        self.cleanup.register("links", move || async move {
            for (name, outcome) in links.close_all("teardown").await {
                if outcome.is_failure() {
                    warn!(link = %name, outcome = %outcome, "Link ended with failure");
                }
            }
        });
        let per_action = self.teardown_grace * 2;
        let failed_actions = self.cleanup.run_all(per_action).await;
        timer.finish();

        let mut teardown_errors = std::mem::take(&mut *self.teardown_errors.lock());
        teardown_errors.extend(
            failed_actions
                .into_iter()
                .map(|(name, msg)| format!("{name}: {msg}")),
        );

        let stasis = stasis?;
        let report = PipelineRunReport {
            run_name: attributes.run_name,
            run_id: attributes.run_id,
            stasis,
            links: link_stats,
            validation: self.aggregator.summary(),
            failures: self.aggregator.failures(),
            final_states: self
                .probes
                .iter()
                .map(|p| (p.name(), p.current_state()))
                .collect(),
            teardown_errors,
        };
        info!(
            polls = report.stasis.polls,
            output_total = report.stasis.output_total,
            failures = report.failures.len(),
            "Harness run finished"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for TestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestPipeline")
            .field("run", &self.attributes.run_name)
            .field("run_id", &self.attributes.run_id)
            .field("components", &self.probes.len())
            .field("links", &self.links)
            .field("cleanup", &self.cleanup)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompletionPolicy, StasisConfig};
    use crate::core::SourceRoles;
    use crate::generator::HitGenerator;
    use crate::testing::PassThroughLogic;

    fn fast_config(name: &str) -> HarnessConfig {
        HarnessConfig::new(name).with_stasis(
            StasisConfig::new()
                .with_poll_interval_ms(10)
                .with_idle_threshold(3)
                .with_max_polls(200),
        )
    }

    #[tokio::test]
    async fn test_producer_to_sink() {
        let mut pipeline = TestPipeline::new(fast_config("direct")).unwrap();
        let sink = Arc::new(CountingSink::new("sink"));
        pipeline
            .add_producer(SourceId::new(1), HitGenerator::seeded(1), 100, true)
            .unwrap();
        pipeline.add_sink(SourceId::new(2), sink.clone()).unwrap();
        pipeline
            .connect(ChannelLink::new("1->2"), SourceId::new(1), SourceId::new(2))
            .unwrap();

        let report = pipeline.run().await.unwrap();
        assert_eq!(sink.received(), 100);
        assert!(sink.stop_seen());
        assert_eq!(report.stasis.output_total, 100);
        let link = report.link("1->2").unwrap();
        assert_eq!(link.records, 100);
        assert!(link.stop_forwarded);
        assert!(report.teardown_errors.is_empty(), "{:?}", report.teardown_errors);
        report.assert_clean().unwrap();
    }

    #[tokio::test]
    async fn test_stage_role_marks_output() {
        let roles = SourceRoles::new().with(SourceId::new(2), StageRole::Sink);
        let config = fast_config("roles")
            .with_roles(roles)
            .with_stasis(
                StasisConfig::new()
                    .with_poll_interval_ms(10)
                    .with_idle_threshold(3)
                    .with_max_polls(200)
                    .with_completion(CompletionPolicy::IdleAndTarget(20)),
            );
        let mut pipeline = TestPipeline::new(config).unwrap();
        pipeline
            .add_producer(SourceId::new(1), HitGenerator::sequential(), 20, true)
            .unwrap();
        pipeline
            .add_stage(SimulatedStage::new("relay"), SourceId::new(2), PassThroughLogic)
            .unwrap();
        let _downstream = pipeline.links().consumer_endpoint(SourceId::new(3)).unwrap();
        pipeline
            .connect(ChannelLink::new("1->2"), SourceId::new(1), SourceId::new(2))
            .unwrap();
        pipeline
            .connect(ChannelLink::new("2->3"), SourceId::new(2), SourceId::new(3))
            .unwrap();
        pipeline.wait_running().await.unwrap();

        let report = pipeline.run().await.unwrap();
        assert_eq!(report.stasis.output_total, 20);
        assert_eq!(report.final_states.get("relay").map(String::as_str), Some("stopped"));
    }

    #[tokio::test]
    async fn test_unmet_target_still_tears_down() {
        let config = fast_config("short").with_stasis(
            StasisConfig::new()
                .with_poll_interval_ms(5)
                .with_idle_threshold(2)
                .with_max_polls(20)
                .with_completion(CompletionPolicy::IdleAndTarget(1_000)),
        );
        let mut pipeline = TestPipeline::new(config).unwrap();
        let sink = Arc::new(CountingSink::new("sink"));
        pipeline
            .add_producer(SourceId::new(1), HitGenerator::seeded(9), 10, true)
            .unwrap();
        pipeline.add_sink(SourceId::new(2), sink.clone()).unwrap();
        pipeline
            .connect(ChannelLink::new("1->2"), SourceId::new(1), SourceId::new(2))
            .unwrap();
        let links = pipeline.links().clone();

        let err = pipeline.run().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(matches!(err, HarnessError::StasisTimeout(ref e) if e.target == Some(1_000)));
        assert_eq!(links.link_count(), 0);
        assert!(sink.is_stopped());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = HarnessConfig::new("bad")
            .with_stasis(StasisConfig::new().with_idle_threshold(0));
        assert!(TestPipeline::new(config).is_err());
    }
}
