//! Deterministic synthetic records.
//!
//! Generators are plain iterators; [`spawn_producer`] runs one as a worker
//! feeding a single output stream.

mod hits;
mod producer;
mod windowed;

pub use hits::HitGenerator;
pub use producer::{spawn_producer, ProducerHandle, ProducerProbe, ProducerSummary};
pub use windowed::{AggregationRequestGenerator, CompositeResultGenerator};
