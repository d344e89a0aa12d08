//! Error types for the streamharness crate.
//!
//! Codec and validation errors are recorded and aggregated so a run can
//! finish its teardown before failing; timeout errors are surfaced to the
//! calling test directly.

use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for harness operations.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A record could not be encoded or decoded.
    #[error("{0}")]
    Malformed(#[from] MalformedRecordError),

    /// One or more records failed validation during the run.
    #[error("{count} record(s) failed validation; first: {first}")]
    ValidationFailed {
        /// Number of failed records across all links.
        count: usize,
        /// The first recorded failure.
        first: Box<ValidationFailure>,
    },

    /// A link's transport failed.
    #[error("{0}")]
    LinkIo(#[from] LinkIoError),

    /// A stage never reached the awaited lifecycle state.
    #[error("{0}")]
    StateTimeout(#[from] StateTimeoutError),

    /// The pipeline never became quiescent.
    #[error("{0}")]
    StasisTimeout(#[from] StasisTimeoutError),

    /// Wiring or configuration was invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns true for the timeout family of errors.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::StateTimeout(_) | Self::StasisTimeout(_))
    }
}

/// Error raised when a record's bytes are inconsistent with its declared layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed record at offset {offset}: {reason}")]
pub struct MalformedRecordError {
    /// What was wrong.
    pub reason: String,
    /// Byte offset inside the record where the problem was detected.
    pub offset: usize,
}

impl MalformedRecordError {
    /// Creates a new malformed record error.
    #[must_use]
    pub fn new(reason: impl Into<String>, offset: usize) -> Self {
        Self {
            reason: reason.into(),
            offset,
        }
    }

    /// Declared length disagrees with the bytes available.
    #[must_use]
    pub fn length_mismatch(declared: i64, actual: usize) -> Self {
        Self::new(
            format!("declared length {declared} does not match buffer length {actual}"),
            0,
        )
    }

    /// Unknown record type identifier.
    #[must_use]
    pub fn unknown_type(type_id: i32) -> Self {
        Self::new(format!("unknown record type id {type_id}"), 4)
    }
}

/// A record rejected by a validator.
///
/// Failures are collected per run; they never stop a link.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error(
    "Validation failed on link '{link}' ({validator}) for record #{record_index} at byte {byte_offset}: {reason} [{dump}]"
)]
pub struct ValidationFailure {
    /// Link the record crossed.
    pub link: String,
    /// Validator that rejected it.
    pub validator: String,
    /// Zero-based index of the record on the link.
    pub record_index: u64,
    /// Byte offset of the record's first byte in the link's stream.
    pub byte_offset: u64,
    /// Human-readable reason.
    pub reason: String,
    /// Hex dump of the leading bytes of the record.
    pub dump: String,
}

impl ValidationFailure {
    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("link".to_string(), serde_json::json!(self.link));
        map.insert("validator".to_string(), serde_json::json!(self.validator));
        map.insert("record_index".to_string(), serde_json::json!(self.record_index));
        map.insert("byte_offset".to_string(), serde_json::json!(self.byte_offset));
        map.insert("reason".to_string(), serde_json::json!(self.reason));
        map.insert("dump".to_string(), serde_json::json!(self.dump));
        map
    }
}

/// The transport under a link failed; only that link's worker stops.
#[derive(Debug, Error)]
#[error("Link '{link}' I/O failure: {source}")]
pub struct LinkIoError {
    /// The link name.
    pub link: String,
    /// The underlying I/O error.
    #[source]
    pub source: std::io::Error,
}

impl LinkIoError {
    /// Creates a new link I/O error.
    #[must_use]
    pub fn new(link: impl Into<String>, source: std::io::Error) -> Self {
        Self {
            link: link.into(),
            source,
        }
    }
}

/// A state waiter used up its poll budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Stage '{stage}' did not reach {target} after {polls} polls (last state: {last_state})"
)]
pub struct StateTimeoutError {
    /// Stage name.
    pub stage: String,
    /// Description of the awaited state.
    pub target: String,
    /// Number of checks performed.
    pub polls: u32,
    /// The state string observed on the final check.
    pub last_state: String,
}

impl StateTimeoutError {
    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!("StateTimeout"));
        map.insert("stage".to_string(), serde_json::json!(self.stage));
        map.insert("target".to_string(), serde_json::json!(self.target));
        map.insert("polls".to_string(), serde_json::json!(self.polls));
        map.insert("last_state".to_string(), serde_json::json!(self.last_state));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// The stasis detector used up its poll budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Pipeline not quiescent after {polls} polls (idle polls: {}; output {output_total}{})",
    format_idle(.stages),
    .target.map(|t| format!("/{t}")).unwrap_or_default()
)]
pub struct StasisTimeoutError {
    /// Number of polls performed.
    pub polls: u32,
    /// Idle-poll count per stage on the final poll.
    pub stages: Vec<(String, u32)>,
    /// Output count observed on the final poll.
    pub output_total: u64,
    /// Expected output count, if one was configured.
    pub target: Option<u64>,
}

impl StasisTimeoutError {
    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let idle: serde_json::Map<String, serde_json::Value> = self
            .stages
            .iter()
            .map(|(name, idle)| (name.clone(), serde_json::json!(idle)))
            .collect();

        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!("StasisTimeout"));
        map.insert("polls".to_string(), serde_json::json!(self.polls));
        map.insert("idle".to_string(), serde_json::Value::Object(idle));
        map.insert("output_total".to_string(), serde_json::json!(self.output_total));
        map.insert("target".to_string(), serde_json::json!(self.target));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

fn format_idle(stages: &[(String, u32)]) -> String {
    stages
        .iter()
        .map(|(name, idle)| format!("{name}={idle}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result alias used throughout the crate.
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;
