//! Quiescence detection.
//!
//! Stages finish at different times and none of them announces that the
//! pipeline as a whole is done, so the harness watches their progress
//! counters and waits until none of them move.

mod detector;
mod state;

pub use crate::config::CompletionPolicy;
pub use detector::{PollVerdict, StageStasis, StasisDetector, StasisReport};
pub use state::StasisState;
