//! # Job Status
//!
//! Per-run completion tracking from an append-only log of stage outcomes.

pub mod models;
pub mod tracker;

pub use models::{
    CompletionReason, JobOutcome, JobRecord, JobStage, JobStageStatus, JobStatus,
    JobStatusRecord, JobStatusSummary, JobSummary,
};
pub use tracker::JobStatusTracker;
