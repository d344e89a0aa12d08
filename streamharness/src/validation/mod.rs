//! Record validation.
//!
//! Validators are attached to links and run once per record crossing them.
//! A rejected record never stops the link; the rejection is recorded in the
//! run's [`ValidationAggregator`] and inspected after teardown.

mod aggregator;
mod ordering;
mod semantic;
mod validator;

pub use aggregator::{dump_bytes, ValidationAggregator, ValidationSummary};
pub use ordering::{compare_timestamps, is_time_ordered};
pub use semantic::{AggregationWindowValidator, CompositeOrderValidator, HitRangeValidator};
pub use validator::{validate_record, StructuralValidator, Validator, ValidatorChain};
