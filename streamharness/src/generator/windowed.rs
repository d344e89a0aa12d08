//! Deterministic aggregation requests and composite results.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::RangeInclusive;

use crate::codec::{AggregationRequest, CompositeResult, Element, Hit, Record, TimeWindow};
use crate::core::SourceId;

/// Consecutive windows of a fixed length.
#[derive(Debug, Clone, Copy)]
struct WindowCursor {
    next_start: i64,
    len: i64,
    gap: i64,
}

impl WindowCursor {
    fn advance(&mut self) -> TimeWindow {
        let start = self.next_start;
        let end = start.saturating_add(self.len);
        self.next_start = end.saturating_add(self.gap);
        TimeWindow::new(start, end)
    }
}

/// Sorted timestamps drawn from inside `window`.
///
/// An empty window pins every timestamp to its start.
fn timestamps_in(rng: &mut StdRng, window: TimeWindow, n: usize) -> Vec<i64> {
    if window.is_empty() {
        return vec![window.start; n];
    }
    let mut ts: Vec<i64> = (0..n).map(|_| rng.gen_range(window.start..window.end)).collect();
    ts.sort_unstable();
    ts
}

/// Generates aggregation requests over consecutive non-empty windows.
///
/// Every element timestamp falls inside its request's window.
#[derive(Debug, Clone)]
pub struct AggregationRequestGenerator {
    rng: StdRng,
    cursor: WindowCursor,
    source_id: SourceId,
    element_sources: Vec<SourceId>,
    element_type: i32,
    elements: RangeInclusive<usize>,
    next_unique_id: i64,
}

impl AggregationRequestGenerator {
    /// Creates a seeded generator.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            cursor: WindowCursor {
                next_start: 0,
                len: 1_000,
                gap: 0,
            },
            source_id: SourceId::new(1),
            element_sources: vec![SourceId::new(1)],
            element_type: 1,
            elements: 1..=4,
            next_unique_id: 1,
        }
    }

    /// Sets the first window start.
    #[must_use]
    pub fn with_start(mut self, timestamp: i64) -> Self {
        self.cursor.next_start = timestamp;
        self
    }

    /// Sets the window length (at least 1) and the gap between windows.
    #[must_use]
    pub fn with_window(mut self, len: i64, gap: i64) -> Self {
        self.cursor.len = len.max(1);
        self.cursor.gap = gap.max(0);
        self
    }

    /// Sets the requesting source.
    #[must_use]
    pub fn with_source(mut self, source_id: SourceId) -> Self {
        self.source_id = source_id;
        self
    }

    /// Sets the sources elements are drawn from.
    #[must_use]
    pub fn with_element_sources(mut self, sources: Vec<SourceId>) -> Self {
        if !sources.is_empty() {
            self.element_sources = sources;
        }
        self
    }

    /// Sets the element type.
    #[must_use]
    pub fn with_element_type(mut self, element_type: i32) -> Self {
        self.element_type = element_type;
        self
    }

    /// Sets how many elements each request lists.
    #[must_use]
    pub fn with_elements(mut self, elements: RangeInclusive<usize>) -> Self {
        self.elements = elements;
        self
    }

    /// Generates the next request.
    pub fn next_request(&mut self) -> AggregationRequest {
        let window = self.cursor.advance();
        let n = draw_count(&mut self.rng, &self.elements);
        let elements = timestamps_in(&mut self.rng, window, n)
            .into_iter()
            .map(|timestamp| Element {
                source_id: self.element_sources[self.rng.gen_range(0..self.element_sources.len())],
                element_type: self.element_type,
                timestamp,
            })
            .collect();

        let unique_id = self.next_unique_id;
        self.next_unique_id += 1;
        AggregationRequest {
            timestamp: window.start,
            unique_id,
            window,
            source_id: self.source_id,
            elements,
        }
    }
}

impl Iterator for AggregationRequestGenerator {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        Some(Record::AggregationRequest(self.next_request()))
    }
}

/// Generates composite results whose children are ordered inside the window.
#[derive(Debug, Clone)]
pub struct CompositeResultGenerator {
    rng: StdRng,
    cursor: WindowCursor,
    source_id: SourceId,
    child_source: SourceId,
    detectors: RangeInclusive<i32>,
    children: RangeInclusive<usize>,
    next_unique_id: i64,
}

impl CompositeResultGenerator {
    /// Creates a seeded generator.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            cursor: WindowCursor {
                next_start: 0,
                len: 1_000,
                gap: 0,
            },
            source_id: SourceId::new(2),
            child_source: SourceId::new(1),
            detectors: 0..=63,
            children: 0..=8,
            next_unique_id: 1,
        }
    }

    /// Sets the first window start.
    #[must_use]
    pub fn with_start(mut self, timestamp: i64) -> Self {
        self.cursor.next_start = timestamp;
        self
    }

    /// Sets the window length (at least 1) and the gap between windows.
    #[must_use]
    pub fn with_window(mut self, len: i64, gap: i64) -> Self {
        self.cursor.len = len.max(1);
        self.cursor.gap = gap.max(0);
        self
    }

    /// Sets the aggregating source and the source stamped on children.
    #[must_use]
    pub fn with_sources(mut self, source_id: SourceId, child_source: SourceId) -> Self {
        self.source_id = source_id;
        self.child_source = child_source;
        self
    }

    /// Sets the child detector id range.
    #[must_use]
    pub fn with_detectors(mut self, detectors: RangeInclusive<i32>) -> Self {
        self.detectors = detectors;
        self
    }

    /// Sets how many children each result carries.
    #[must_use]
    pub fn with_children(mut self, children: RangeInclusive<usize>) -> Self {
        self.children = children;
        self
    }

    /// Generates the next result.
    pub fn next_result(&mut self) -> CompositeResult {
        let window = self.cursor.advance();
        let n = draw_count(&mut self.rng, &self.children);
        let children = timestamps_in(&mut self.rng, window, n)
            .into_iter()
            .map(|timestamp| Hit {
                timestamp,
                detector_id: draw_i32(&mut self.rng, &self.detectors),
                config_id: 1,
                source_id: self.child_source,
                device_id: 0,
                mode: 0,
            })
            .collect();

        let unique_id = self.next_unique_id;
        self.next_unique_id += 1;
        CompositeResult {
            timestamp: window.end,
            unique_id,
            window,
            source_id: self.source_id,
            children,
        }
    }
}

impl Iterator for CompositeResultGenerator {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        Some(Record::CompositeResult(self.next_result()))
    }
}

fn draw_count(rng: &mut StdRng, range: &RangeInclusive<usize>) -> usize {
    if range.is_empty() {
        *range.start()
    } else {
        rng.gen_range(range.clone())
    }
}

fn draw_i32(rng: &mut StdRng, range: &RangeInclusive<i32>) -> i32 {
    if range.is_empty() {
        *range.start()
    } else {
        rng.gen_range(range.clone())
    }
}
