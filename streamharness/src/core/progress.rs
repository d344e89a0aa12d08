//! Progress counters owned by stages and the snapshots the harness reads.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one stage sampled at one polling instant.
///
/// Within a run each counter is monotonically non-decreasing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Records read from the stage's input.
    pub received: u64,
    /// Records placed on the stage's internal queue.
    pub queued: u64,
    /// Records written to the stage's output.
    pub sent: u64,
}

impl ProgressSnapshot {
    /// Creates a snapshot from raw counter values.
    #[must_use]
    pub const fn new(received: u64, queued: u64, sent: u64) -> Self {
        Self {
            received,
            queued,
            sent,
        }
    }

    /// Returns true if any counter strictly increased relative to `previous`.
    #[must_use]
    pub fn advanced_since(&self, previous: &Self) -> bool {
        self.received > previous.received
            || self.queued > previous.queued
            || self.sent > previous.sent
    }

    /// Sum of all counters.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.received
            .saturating_add(self.queued)
            .saturating_add(self.sent)
    }
}

/// Counters a stage mutates as it works.
///
/// Reads from other threads use relaxed loads, so a snapshot may mix values
/// from different instants. Callers only look for increases, which
/// tolerates that.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    received: AtomicU64,
    queued: AtomicU64,
    sent: AtomicU64,
}

impl ProgressCounters {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one received record.
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one queued record.
    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one sent record.
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds to the sent counter.
    pub fn add_sent(&self, n: u64) {
        self.sent.fetch_add(n, Ordering::Relaxed);
    }

    /// Returns the records-sent counter.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Samples all counters.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            received: self.received.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
        }
    }
}
