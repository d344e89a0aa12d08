//! Core domain types shared by every harness component.
//!
//! This module contains:
//! - Source identifiers and stage roles used for wiring
//! - Stage lifecycle states
//! - Progress counters and snapshots observed by the stasis detector

mod identity;
mod progress;
mod status;

pub use identity::{SourceId, SourceRoles, StageRole};
pub use progress::{ProgressCounters, ProgressSnapshot};
pub use status::StageState;
