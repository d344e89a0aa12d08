//! Per-run collection of validation outcomes.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use crate::codec::Frame;
use crate::errors::{HarnessError, ValidationFailure};

/// Leading bytes shown in failure dumps.
const DUMP_BYTES: usize = 48;

/// Renders up to `max` leading bytes as hex, marking truncation.
#[must_use]
pub fn dump_bytes(bytes: &[u8], max: usize) -> String {
    if bytes.len() <= max {
        hex::encode(bytes)
    } else {
        format!("{}..(+{} bytes)", hex::encode(&bytes[..max]), bytes.len() - max)
    }
}

impl ValidationFailure {
    /// Builds a failure report for a frame read off a link.
    #[must_use]
    pub fn for_frame(
        link: impl Into<String>,
        validator: impl Into<String>,
        frame: &Frame,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            link: link.into(),
            validator: validator.into(),
            record_index: frame.index,
            byte_offset: frame.offset,
            reason: reason.into(),
            dump: dump_bytes(&frame.bytes, DUMP_BYTES),
        }
    }
}

/// Counts of validation outcomes for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    /// Records checked.
    pub checked: u64,
    /// Records accepted.
    pub passed: u64,
    /// Records rejected.
    pub failed: u64,
    /// First rejection, if any.
    pub first_failure: Option<String>,
}

/// Collects validation outcomes from every link of one run.
///
/// Shared by reference between links; replaces any process-wide
/// "validation failed" flag.
#[derive(Debug, Default)]
pub struct ValidationAggregator {
    passed: AtomicU64,
    failures: Mutex<Vec<ValidationFailure>>,
}

impl ValidationAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an accepted record.
    pub fn record_pass(&self) {
        self.passed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a rejected record.
    pub fn record_failure(&self, failure: ValidationFailure) {
        warn!(
            link = %failure.link,
            validator = %failure.validator,
            record_index = failure.record_index,
            byte_offset = failure.byte_offset,
            reason = %failure.reason,
            "Validation failure"
        );
        self.failures.lock().push(failure);
    }

    /// Returns true if any record was rejected.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.lock().is_empty()
    }

    /// Number of rejected records.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failures.lock().len()
    }

    /// Number of accepted records.
    #[must_use]
    pub fn pass_count(&self) -> u64 {
        self.passed.load(Ordering::Relaxed)
    }

    /// All rejections in the order they were recorded.
    #[must_use]
    pub fn failures(&self) -> Vec<ValidationFailure> {
        self.failures.lock().clone()
    }

    /// Rejections recorded on one link.
    #[must_use]
    pub fn failures_for_link(&self, link: &str) -> Vec<ValidationFailure> {
        self.failures
            .lock()
            .iter()
            .filter(|f| f.link == link)
            .cloned()
            .collect()
    }

    /// The first rejection recorded.
    #[must_use]
    pub fn first_failure(&self) -> Option<ValidationFailure> {
        self.failures.lock().first().cloned()
    }

    /// Summarises the run.
    #[must_use]
    pub fn summary(&self) -> ValidationSummary {
        let failures = self.failures.lock();
        let passed = self.pass_count();
        let failed = failures.len() as u64;
        ValidationSummary {
            checked: passed + failed,
            passed,
            failed,
            first_failure: failures.first().map(ToString::to_string),
        }
    }

    /// Fails with a descriptive error if any record was rejected.
    pub fn assert_clean(&self) -> Result<(), HarnessError> {
        let failures = self.failures.lock();
        match failures.first() {
            None => Ok(()),
            Some(first) => Err(HarnessError::ValidationFailed {
                count: failures.len(),
                first: Box::new(first.clone()),
            }),
        }
    }
}
