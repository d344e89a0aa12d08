//! # Streamharness
//!
//! An integration-test harness for streaming record pipelines.
//!
//! Streamharness sits between the stages of a pipeline under test and
//! provides:
//!
//! - **Record codec**: bit-exact encoding of hits, aggregation requests
//!   and composite results, plus the stop marker
//! - **Synthetic data**: seeded generators for every record kind
//! - **Channel links**: pass-through forwarders and validating bridges
//! - **Lifecycle waits**: polling a stage until it reaches a state
//! - **Stasis detection**: deciding when a pipeline has gone quiet
//! - **Orchestration**: wiring, running and tearing down a test pipeline
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use streamharness::prelude::*;
//!
//! let mut pipeline = TestPipeline::new(HarnessConfig::new("smoke"))?;
//! let sink = Arc::new(CountingSink::new("sink"));
//! pipeline.add_producer(SourceId::new(1), HitGenerator::seeded(7), 5_000, true)?;
//! pipeline.add_sink(SourceId::new(2), sink.clone())?;
//! pipeline.connect(ChannelLink::new("hits"), SourceId::new(1), SourceId::new(2))?;
//!
//! let report = pipeline.run().await?;
//! report.assert_clean()?;
//! assert_eq!(sink.received(), 5_000);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod channel;
pub mod codec;
pub mod config;
pub mod core;
pub mod errors;
pub mod generator;
pub mod observability;
pub mod stasis;
pub mod testing;
pub mod validation;
pub mod waiter;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CleanupRegistry, CloseToken};
    pub use crate::channel::{duplex_channel, ChannelLink, LinkKind, LinkOutcome, LinkRegistry};
    pub use crate::codec::{
        decode, encode, AggregationRequest, CompositeResult, Element, Hit, Record, RecordReader,
        RecordWriter, TimeWindow,
    };
    pub use crate::config::{CompletionPolicy, HarnessConfig, LinkConfig, StasisConfig, WaitConfig};
    pub use crate::core::{ProgressSnapshot, SourceId, SourceRoles, StageRole, StageState};
    pub use crate::errors::{HarnessError, Result, ValidationFailure};
    pub use crate::generator::{
        spawn_producer, AggregationRequestGenerator, CompositeResultGenerator, HitGenerator,
    };
    pub use crate::stasis::{StasisDetector, StasisReport};
    pub use crate::testing::{
        CountingSink, PipelineRunReport, SimulatedStage, StageLogic, TestPipeline,
    };
    pub use crate::validation::{
        CompositeOrderValidator, HitRangeValidator, ValidationAggregator, Validator,
    };
    pub use crate::waiter::{
        wait_for_running, wait_for_stopped, wait_until, StageProbe, StatePredicate,
    };
    pub use std::sync::Arc;
}
