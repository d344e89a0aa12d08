//! Point-to-point links between pipeline stages.
//!
//! This module provides:
//! - In-process byte channels with back-pressure
//! - Links that forward whole records, optionally validating each one
//! - A per-run registry that wires stage endpoints together

mod duplex;
mod link;
mod registry;

pub use duplex::{duplex_channel, ChannelReader, ChannelWriter};
pub use link::{ChannelLink, LinkHandle, LinkKind, LinkOutcome, LinkStats, LinkStatsSnapshot};
pub use registry::{LinkRegistry, StageEndpoints};
