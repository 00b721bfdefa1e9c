//! Continuous-contract roll pipeline.
//!
//! Pass 1 discovers the contract tables of a tick database and builds the
//! roll map (dominant contract per trading day). Pass 2 runs the external
//! day cleaner for every date in chronological order, stopping at the first
//! failure.

pub mod orchestrator;
pub mod report;

pub use orchestrator::{Pipeline, PipelineFailure};
pub use report::{FailureReport, RunReport, RunStatus, SkippedTableReport};
