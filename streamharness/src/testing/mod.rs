//! In-process stand-ins for the pipeline under test.
//!
//! This module provides:
//! - Simulated stages driven by pluggable record logic
//! - Counting sinks with stream fingerprints
//! - The run orchestrator and its report
//! - Assertions over run results

mod assertions;
mod logic;
mod pipeline;
mod sink;
mod stage;

pub use assertions::{assert_link_clean, assert_quiescent, assert_received_count};
pub use logic::{FilterLogic, PassThroughLogic, StageLogic, WindowAggregatorLogic};
pub use pipeline::{PipelineRunReport, TestPipeline, DEFAULT_TEARDOWN_GRACE};
pub use sink::{drain_into, spawn_sink, CountingSink, RecordSink, StreamFingerprint};
pub use stage::{SimulatedStage, StageHandle};
