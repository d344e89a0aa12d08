//! Deterministic hit streams.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::RangeInclusive;

use crate::codec::{Hit, Record};
use crate::core::SourceId;

/// Generates hits with strictly increasing timestamps.
///
/// Seeded generators draw detector ids and timestamp jitter from a
/// `StdRng`; the same seed and settings always give the same sequence.
/// Sequential generators cycle through the detector range with a fixed
/// step.
#[derive(Debug, Clone)]
pub struct HitGenerator {
    rng: StdRng,
    seeded: bool,
    next_timestamp: i64,
    step: i64,
    jitter: i64,
    detectors: RangeInclusive<i32>,
    next_detector: i32,
    config_id: i32,
    source_id: SourceId,
    device_id: i16,
    mode: i16,
    emitted: u64,
}

impl HitGenerator {
    /// Creates a seeded generator.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seeded: true,
            next_timestamp: 0,
            step: 10,
            jitter: 5,
            detectors: 0..=63,
            next_detector: 0,
            config_id: 1,
            source_id: SourceId::new(1),
            device_id: 0,
            mode: 0,
            emitted: 0,
        }
    }

    /// Creates a generator with no randomness.
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            seeded: false,
            jitter: 0,
            ..Self::seeded(0)
        }
    }

    /// Sets the first timestamp.
    #[must_use]
    pub fn with_start(mut self, timestamp: i64) -> Self {
        self.next_timestamp = timestamp;
        self
    }

    /// Sets the minimum gap between timestamps (at least 1).
    #[must_use]
    pub fn with_step(mut self, step: i64) -> Self {
        self.step = step.max(1);
        self
    }

    /// Sets the largest extra gap drawn per record; ignored when sequential.
    #[must_use]
    pub fn with_jitter(mut self, jitter: i64) -> Self {
        self.jitter = jitter.max(0);
        self
    }

    /// Sets the detector id range.
    #[must_use]
    pub fn with_detectors(mut self, detectors: RangeInclusive<i32>) -> Self {
        self.next_detector = *detectors.start();
        self.detectors = detectors;
        self
    }

    /// Sets the configuration id stamped on every hit.
    #[must_use]
    pub fn with_config_id(mut self, config_id: i32) -> Self {
        self.config_id = config_id;
        self
    }

    /// Sets the source id stamped on every hit.
    #[must_use]
    pub fn with_source(mut self, source_id: SourceId) -> Self {
        self.source_id = source_id;
        self
    }

    /// Sets the device id and mode stamped on every hit.
    #[must_use]
    pub fn with_device(mut self, device_id: i16, mode: i16) -> Self {
        self.device_id = device_id;
        self.mode = mode;
        self
    }

    /// Hits generated so far.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Timestamp the next hit will carry.
    #[must_use]
    pub fn peek_timestamp(&self) -> i64 {
        self.next_timestamp
    }

    /// Generates the next hit.
    pub fn next_hit(&mut self) -> Hit {
        let detector_id = self.draw_detector();
        let timestamp = self.next_timestamp;
        let extra = if self.seeded && self.jitter > 0 {
            self.rng.gen_range(0..=self.jitter)
        } else {
            0
        };
        self.next_timestamp = timestamp.saturating_add(self.step.saturating_add(extra));
        self.emitted += 1;

        Hit {
            timestamp,
            detector_id,
            config_id: self.config_id,
            source_id: self.source_id,
            device_id: self.device_id,
            mode: self.mode,
        }
    }

    fn draw_detector(&mut self) -> i32 {
        let (lo, hi) = (*self.detectors.start(), *self.detectors.end());
        if hi < lo {
            return lo;
        }
        if self.seeded {
            return self.rng.gen_range(lo..=hi);
        }
        let id = self.next_detector;
        self.next_detector = if id >= hi { lo } else { id + 1 };
        id
    }
}

impl Iterator for HitGenerator {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        Some(Record::Hit(self.next_hit()))
    }
}
