//! dr-core: job model, errors, configuration, clocks and the event bus.
//!
//! This crate is the foundational dependency for the other dr-* crates.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod job;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use job::{Job, JobError, JobId, JobStatus, JobView};
