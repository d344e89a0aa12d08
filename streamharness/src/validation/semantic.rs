//! Validators that understand one record kind's domain rules.
//!
//! Each accepts every record kind it does not cover.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use super::ordering::compare_timestamps;
use super::validator::Validator;
use crate::codec::{Record, TimeWindow};
use crate::core::SourceId;

fn check_window(window: TimeWindow) -> Result<(), String> {
    if window.is_empty() {
        return Err(format!(
            "empty time window [{}, {})",
            window.start, window.end
        ));
    }
    Ok(())
}

/// Aggregation requests must cover a non-empty window containing every
/// element timestamp.
#[derive(Debug, Clone, Default)]
pub struct AggregationWindowValidator;

impl AggregationWindowValidator {
    /// Creates the validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for AggregationWindowValidator {
    fn name(&self) -> &str {
        "aggregation_window"
    }

    fn check(&self, record: &Record, _raw: &[u8]) -> Result<(), String> {
        let Record::AggregationRequest(req) = record else {
            return Ok(());
        };
        check_window(req.window)?;
        if let Some((i, e)) = req
            .elements
            .iter()
            .enumerate()
            .find(|(_, e)| !req.window.contains(e.timestamp))
        {
            return Err(format!(
                "element #{i} timestamp {} outside window [{}, {})",
                e.timestamp, req.window.start, req.window.end
            ));
        }
        Ok(())
    }
}

/// Composite results must carry temporally ordered children inside a
/// non-empty window.
#[derive(Debug, Clone, Default)]
pub struct CompositeOrderValidator;

impl CompositeOrderValidator {
    /// Creates the validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for CompositeOrderValidator {
    fn name(&self) -> &str {
        "composite_order"
    }

    fn check(&self, record: &Record, _raw: &[u8]) -> Result<(), String> {
        let Record::CompositeResult(result) = record else {
            return Ok(());
        };
        check_window(result.window)?;
        for (i, pair) in result.children.windows(2).enumerate() {
            if compare_timestamps(Some(pair[0].timestamp), Some(pair[1].timestamp))
                == Ordering::Greater
            {
                return Err(format!(
                    "child #{} timestamp {} precedes child #{i} timestamp {}",
                    i + 1,
                    pair[1].timestamp,
                    pair[0].timestamp
                ));
            }
        }
        if let Some((i, child)) = result
            .children
            .iter()
            .enumerate()
            .find(|(_, c)| !result.window.contains(c.timestamp))
        {
            return Err(format!(
                "child #{i} timestamp {} outside window [{}, {})",
                child.timestamp, result.window.start, result.window.end
            ));
        }
        Ok(())
    }
}

/// Hits must come from an allowed detector range and source set.
#[derive(Debug, Clone)]
pub struct HitRangeValidator {
    detectors: RangeInclusive<i32>,
    sources: BTreeSet<SourceId>,
}

impl HitRangeValidator {
    /// Accepts hits whose detector id lies in `detectors`, from any source.
    #[must_use]
    pub fn new(detectors: RangeInclusive<i32>) -> Self {
        Self {
            detectors,
            sources: BTreeSet::new(),
        }
    }

    /// Restricts accepted sources; an empty set accepts any source.
    #[must_use]
    pub fn with_sources(mut self, sources: impl IntoIterator<Item = SourceId>) -> Self {
        self.sources.extend(sources);
        self
    }
}

impl Validator for HitRangeValidator {
    fn name(&self) -> &str {
        "hit_range"
    }

    fn check(&self, record: &Record, _raw: &[u8]) -> Result<(), String> {
        let Record::Hit(hit) = record else {
            return Ok(());
        };
        if !self.detectors.contains(&hit.detector_id) {
            return Err(format!(
                "detector {} outside {}..={}",
                hit.detector_id,
                self.detectors.start(),
                self.detectors.end()
            ));
        }
        if !self.sources.is_empty() && !self.sources.contains(&hit.source_id) {
            return Err(format!("unexpected source {}", hit.source_id));
        }
        Ok(())
    }
}
