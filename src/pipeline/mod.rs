//! Batch orchestration: from uploaded images to one streamed archive.

pub mod orchestrator;
pub mod report;

pub use orchestrator::{Batch, PipelineOrchestrator, DEFAULT_MAX_CONCURRENT_JOBS};
pub use report::{BatchFailure, BatchResult, BatchState, JobReport, JobState};
