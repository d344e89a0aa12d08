//! Record handling for simulated stages.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::codec::{CompositeResult, Hit, Record, TimeWindow};
use crate::core::SourceId;

/// What a simulated stage does with each record.
#[async_trait]
pub trait StageLogic: Send + Sync {
    /// Short name of the behaviour, for logs.
    fn kind(&self) -> &str;

    /// Handles one input record and returns the records to emit.
    async fn on_record(&self, record: Record) -> Vec<Record>;

    /// Emits anything still buffered once input has ended.
    async fn on_stop(&self) -> Vec<Record> {
        Vec::new()
    }
}

/// Emits every record unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughLogic;

#[async_trait]
impl StageLogic for PassThroughLogic {
    fn kind(&self) -> &str {
        "pass_through"
    }

    async fn on_record(&self, record: Record) -> Vec<Record> {
        vec![record]
    }
}

type KeepFn = dyn Fn(&Record) -> bool + Send + Sync;

/// Emits only the records a predicate keeps.
pub struct FilterLogic {
    keep: Box<KeepFn>,
}

impl FilterLogic {
    /// Keeps records for which `keep` returns true.
    pub fn new<F>(keep: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        Self {
            keep: Box::new(keep),
        }
    }

    /// Keeps hits whose detector id is in `lo..=hi`, and every non-hit.
    #[must_use]
    pub fn detectors(lo: i32, hi: i32) -> Self {
        Self::new(move |record| match record {
            Record::Hit(h) => (lo..=hi).contains(&h.detector_id),
            _ => true,
        })
    }
}

impl fmt::Debug for FilterLogic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterLogic").finish_non_exhaustive()
    }
}

#[async_trait]
impl StageLogic for FilterLogic {
    fn kind(&self) -> &str {
        "filter"
    }

    async fn on_record(&self, record: Record) -> Vec<Record> {
        if (self.keep)(&record) {
            vec![record]
        } else {
            Vec::new()
        }
    }
}

/// Groups hits into fixed windows, emitting one composite result per window.
///
/// A window is emitted when the first hit of a later window arrives, and
/// the last one when input ends. Records other than hits are dropped.
#[derive(Debug)]
pub struct WindowAggregatorLogic {
    window_len: i64,
    source_id: SourceId,
    open: Mutex<Option<(TimeWindow, Vec<Hit>)>>,
    next_unique_id: AtomicI64,
}

impl WindowAggregatorLogic {
    /// Aggregates over windows of `window_len` (at least 1).
    #[must_use]
    pub fn new(window_len: i64, source_id: SourceId) -> Self {
        Self {
            window_len: window_len.max(1),
            source_id,
            open: Mutex::new(None),
            next_unique_id: AtomicI64::new(1),
        }
    }

    fn window_of(&self, ts: i64) -> TimeWindow {
        let start = ts.div_euclid(self.window_len) * self.window_len;
        TimeWindow::new(start, start + self.window_len)
    }

    fn close(&self, window: TimeWindow, children: Vec<Hit>) -> Record {
        Record::CompositeResult(CompositeResult {
            timestamp: window.end,
            unique_id: self.next_unique_id.fetch_add(1, Ordering::Relaxed),
            window,
            source_id: self.source_id,
            children,
        })
    }
}

#[async_trait]
impl StageLogic for WindowAggregatorLogic {
    fn kind(&self) -> &str {
        "window_aggregator"
    }

    async fn on_record(&self, record: Record) -> Vec<Record> {
        let Record::Hit(hit) = record else {
            return Vec::new();
        };
        let window = self.window_of(hit.timestamp);
        let mut open = self.open.lock();
        if let Some((current, children)) = open.as_mut() {
            if *current == window {
                children.push(hit);
                return Vec::new();
            }
        }
        open.replace((window, vec![hit]))
            .map(|(w, children)| self.close(w, children))
            .into_iter()
            .collect()
    }

    async fn on_stop(&self) -> Vec<Record> {
        self.open
            .lock()
            .take()
            .map(|(w, children)| self.close(w, children))
            .into_iter()
            .collect()
    }
}
