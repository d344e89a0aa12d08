//! Panicking assertions over harness results.

use super::pipeline::PipelineRunReport;
use super::sink::CountingSink;
use crate::stasis::StasisReport;

/// Asserts that every stage ended idle for at least `threshold` polls or stopped.
pub fn assert_quiescent(report: &StasisReport, threshold: u32) {
    for stage in &report.stages {
        assert!(
            stage.stopped || stage.idle_polls >= threshold,
            "Expected stage '{}' to be quiescent, got {} idle poll(s) (threshold {})",
            stage.stage,
            stage.idle_polls,
            threshold
        );
    }
}

/// Asserts that a link forwarded `expected` records without rejecting any.
pub fn assert_link_clean(report: &PipelineRunReport, link: &str, expected: u64) {
    let Some(stats) = report.link(link) else {
        panic!(
            "Expected link '{}' in report, have: {:?}",
            link,
            report.links.keys().collect::<Vec<_>>()
        );
    };
    assert_eq!(
        stats.records, expected,
        "Expected {} record(s) on link '{}', got {}",
        expected, link, stats.records
    );
    assert_eq!(
        stats.validation_failures, 0,
        "Expected no validation failures on link '{}', first: {:?}",
        link,
        report.failures.iter().find(|f| f.link == link)
    );
}

/// Asserts that a sink received exactly `expected` records and the stop marker.
pub fn assert_received_count(sink: &CountingSink, expected: u64) {
    assert_eq!(
        sink.received(),
        expected,
        "Expected sink to receive {} record(s), got {}",
        expected,
        sink.received()
    );
    assert!(sink.stop_seen(), "Expected sink to see the stop marker");
}
