//! Logging setup and run correlation.

mod logging;
mod run;

pub use logging::{init_json_logging, init_test_logging};
pub use run::{PhaseTimer, RunAttributes};
