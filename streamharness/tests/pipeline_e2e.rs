//! Whole harness runs: producer, links, simulated stages and sink.

use anyhow::Result;
use std::time::Duration;
use streamharness::errors::HarnessError;
use streamharness::observability::init_test_logging;
use streamharness::prelude::*;
use streamharness::testing::{
    assert_link_clean, assert_quiescent, assert_received_count, FilterLogic, WindowAggregatorLogic,
};

const PRODUCER: SourceId = SourceId::new(1);
const STAGE: SourceId = SourceId::new(2);
const SINK: SourceId = SourceId::new(3);

fn config(name: &str, target: u64) -> HarnessConfig {
    HarnessConfig::new(name)
        .with_roles(
            SourceRoles::new()
                .with(PRODUCER, StageRole::Source)
                .with(STAGE, StageRole::Aggregator)
                .with(SINK, StageRole::Sink),
        )
        .with_stasis(
            StasisConfig::new()
                .with_poll_interval_ms(20)
                .with_idle_threshold(5)
                .with_max_polls(500)
                .with_completion(CompletionPolicy::IdleAndTarget(target)),
        )
}

#[tokio::test]
async fn test_hits_aggregate_into_ordered_composites() -> Result<()> {
    init_test_logging();
    let mut pipeline = TestPipeline::new(config("aggregate", 30))?;
    let sink = Arc::new(CountingSink::new("sink"));

    // Timestamps 0, 10, ..., 2990: thirty windows of ten hits.
    pipeline.add_producer(PRODUCER, HitGenerator::sequential(), 300, true)?;
    pipeline.add_stage(
        SimulatedStage::new("aggregator"),
        STAGE,
        WindowAggregatorLogic::new(100, STAGE),
    )?;
    pipeline.add_sink(SINK, sink.clone())?;
    pipeline.connect(
        ChannelLink::bridge("hits", HitRangeValidator::new(0..=63)),
        PRODUCER,
        STAGE,
    )?;
    pipeline.connect(
        ChannelLink::bridge("composites", CompositeOrderValidator::new()),
        STAGE,
        SINK,
    )?;
    pipeline.wait_running().await?;

    let report = pipeline.run().await?;
    report.assert_clean()?;
    assert_quiescent(&report.stasis, 5);
    assert_link_clean(&report, "hits", 300);
    assert_link_clean(&report, "composites", 30);
    assert_received_count(&sink, 30);
    assert_eq!(report.validation.failed, 0);
    assert_eq!(report.validation.passed, 330);
    assert_eq!(report.final_states.get("aggregator").map(String::as_str), Some("stopped"));

    let Some(Record::CompositeResult(last)) = sink.last_record() else {
        panic!("sink did not end on a composite result");
    };
    assert_eq!(last.window, TimeWindow::new(2_900, 3_000));
    assert_eq!(last.children.len(), 10);
    assert_eq!(last.unique_id, 30);
    Ok(())
}

#[tokio::test]
async fn test_failures_are_reported_after_teardown() -> Result<()> {
    init_test_logging();
    let mut pipeline = TestPipeline::new(config("filtered", 160))?;
    let sink = Arc::new(CountingSink::new("sink"));

    pipeline.add_producer(PRODUCER, HitGenerator::sequential(), 300, true)?;
    pipeline.add_stage(SimulatedStage::new("filter"), STAGE, FilterLogic::detectors(0, 31))?;
    pipeline.add_sink(SINK, sink.clone())?;
    pipeline.connect(ChannelLink::new("raw"), PRODUCER, STAGE)?;
    pipeline.connect(
        ChannelLink::bridge("filtered", HitRangeValidator::new(0..=15)),
        STAGE,
        SINK,
    )?;

    let report = pipeline.run().await?;
    // Rejected records are still forwarded.
    assert_received_count(&sink, 160);
    assert_eq!(report.link("raw").map(|s| s.records), Some(300));
    assert_eq!(report.failures.len(), 80);
    assert!(report.failures.iter().all(|f| f.link == "filtered"));

    let first = &report.failures[0];
    assert_eq!(first.validator, "hit_range");
    assert_eq!(first.record_index, 16);
    assert_eq!(first.byte_offset, 16 * 32);

    match report.assert_clean() {
        Err(HarnessError::ValidationFailed { count, first }) => {
            assert_eq!(count, 80);
            assert_eq!(first.record_index, 16);
        }
        other => panic!("expected a validation failure, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_stream_without_stop_marker_is_torn_down() -> Result<()> {
    init_test_logging();
    let mut pipeline =
        TestPipeline::new(config("no-stop", 32))?.with_teardown_grace(Duration::from_millis(100));
    let sink = Arc::new(CountingSink::new("sink"));

    pipeline.add_producer(PRODUCER, HitGenerator::sequential(), 50, false)?;
    pipeline.add_stage(SimulatedStage::new("filter"), STAGE, FilterLogic::detectors(0, 31))?;
    pipeline.add_sink(SINK, sink.clone())?;
    pipeline.connect(ChannelLink::new("raw"), PRODUCER, STAGE)?;
    pipeline.connect(ChannelLink::new("filtered"), STAGE, SINK)?;

    let report = pipeline.run().await?;
    assert_eq!(sink.received(), 32);
    assert!(!sink.stop_seen());
    assert!(report.link("filtered").is_some_and(|s| !s.stop_forwarded));
    assert_eq!(report.final_states.get("filter").map(String::as_str), Some("stopped"));
    assert_eq!(report.final_states.get("sink").map(String::as_str), Some("stopped"));
    assert!(report.teardown_errors.is_empty(), "{:?}", report.teardown_errors);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_target_times_out_after_teardown() {
    init_test_logging();
    let mut config = config("starved", 1_000);
    config.stasis = config.stasis.with_max_polls(30);
    let mut pipeline = TestPipeline::new(config).unwrap();
    let sink = Arc::new(CountingSink::new("sink"));

    pipeline
        .add_producer(PRODUCER, HitGenerator::seeded(5), 40, true)
        .unwrap();
    pipeline.add_sink(SINK, sink.clone()).unwrap();
    pipeline
        .connect(ChannelLink::new("direct"), PRODUCER, SINK)
        .unwrap();
    let links = pipeline.links().clone();

    let err = pipeline.run().await.unwrap_err();
    let timeout = match err {
        HarnessError::StasisTimeout(timeout) => timeout,
        other => panic!("expected a stasis timeout, got {other:?}"),
    };
    assert_eq!(timeout.polls, 30);
    assert_eq!(timeout.output_total, 40);
    assert_eq!(timeout.target, Some(1_000));
    assert_eq!(links.link_count(), 0);
    assert_received_count(&sink, 40);
}
