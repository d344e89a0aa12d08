//! Close signalling and teardown utilities.
//!
//! This module provides:
//! - CloseToken for explicitly closing link workers
//! - CleanupRegistry for LIFO teardown that always runs

mod cleanup;
mod token;

pub use cleanup::CleanupRegistry;
pub use token::CloseToken;
