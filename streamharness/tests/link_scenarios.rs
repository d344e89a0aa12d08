//! End-to-end behaviour of links between real byte streams.

use anyhow::Result;
use std::sync::Arc;
use streamharness::channel::{duplex_channel, ChannelLink};
use streamharness::codec::{decode, Record, RecordReader, RecordWriter};
use streamharness::generator::{spawn_producer, CompositeResultGenerator, HitGenerator};
use streamharness::testing::{assert_received_count, spawn_sink, CountingSink, StreamFingerprint};
use streamharness::validation::{CompositeOrderValidator, ValidationAggregator};

#[tokio::test]
async fn test_pass_through_delivers_every_hit() -> Result<()> {
    let expected: Vec<Record> = HitGenerator::seeded(7).take(5_000).collect();
    let fingerprint = StreamFingerprint::of_stream(&expected)?;

    let (producer_tx, link_rx) = duplex_channel(4 * 1024);
    let (link_tx, sink_rx) = duplex_channel(4 * 1024);
    let sink = Arc::new(CountingSink::new("sink"));

    let sink_task = spawn_sink(sink.clone(), sink_rx);
    let link = ChannelLink::new("hits").spawn(link_rx, link_tx);
    let producer = spawn_producer("hits", HitGenerator::seeded(7), producer_tx, 5_000, true);

    let summary = producer.join().await?;
    assert_eq!(summary.records, 5_000);
    assert!(link.join().await.is_stopped());
    sink_task.await??;

    assert_received_count(&sink, 5_000);
    assert_eq!(sink.last_timestamp(), expected.last().and_then(Record::timestamp));
    assert_eq!(sink.last_timestamp(), summary.last_timestamp);
    assert_eq!(sink.fingerprint(), fingerprint.hex());
    Ok(())
}

#[tokio::test]
async fn test_stop_marker_follows_last_record() -> Result<()> {
    let (producer_tx, link_rx) = duplex_channel(1024);
    let (link_tx, downstream) = duplex_channel(1024);
    let link = ChannelLink::new("short").spawn(link_rx, link_tx);
    let producer = spawn_producer("short", HitGenerator::sequential(), producer_tx, 12, true);

    let mut reader = RecordReader::new(downstream);
    let mut records = 0u64;
    let mut stop = None;
    while let Some(frame) = reader.next_frame().await? {
        if frame.is_stop_marker() {
            stop = Some(frame);
            break;
        }
        assert!(matches!(decode(&frame.bytes)?, Record::Hit(_)));
        records += 1;
    }

    let stop = stop.expect("stream ended without a stop marker");
    assert_eq!(records, 12);
    assert_eq!(&stop.bytes[..], &[0, 0, 0, 4]);
    assert_eq!(stop.offset, 12 * 32);
    // The link shuts its downstream after forwarding the marker.
    assert!(reader.next_frame().await?.is_none());

    producer.join().await?;
    let outcome = link.join().await;
    assert!(outcome.is_stopped(), "{outcome}");
    Ok(())
}

#[tokio::test]
async fn test_bridge_reports_bad_composite_and_keeps_forwarding() -> Result<()> {
    let aggregator = Arc::new(ValidationAggregator::new());
    let (upstream, link_rx) = duplex_channel(8 * 1024);
    let (link_tx, sink_rx) = duplex_channel(8 * 1024);
    let sink = Arc::new(CountingSink::new("sink"));
    let sink_task = spawn_sink(sink.clone(), sink_rx);
    let link = ChannelLink::bridge("composites", CompositeOrderValidator::new())
        .with_aggregator(aggregator.clone())
        .spawn(link_rx, link_tx);

    let mut generator = CompositeResultGenerator::seeded(11).with_children(2..=4);
    let mut writer = RecordWriter::new(upstream);
    for i in 0..20 {
        let mut result = generator.next_result();
        if i == 13 {
            let end = result.window.end;
            if let Some(last) = result.children.last_mut() {
                last.timestamp = end;
            }
        }
        writer.write_record(&result.into()).await?;
    }
    writer.write_stop().await?;

    assert!(link.join().await.is_stopped());
    sink_task.await??;

    assert_received_count(&sink, 20);
    assert_eq!(aggregator.failure_count(), 1);
    assert_eq!(aggregator.pass_count(), 19);
    let failure = aggregator.first_failure().expect("one failure");
    assert_eq!(failure.link, "composites");
    assert_eq!(failure.validator, "composite_order");
    assert_eq!(failure.record_index, 13);
    assert!(failure.reason.contains("outside window"), "{}", failure.reason);
    assert!(aggregator.assert_clean().is_err());
    Ok(())
}
