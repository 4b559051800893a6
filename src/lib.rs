//! imgbatch - Batch image conversion streamed into a single ZIP archive
//!
//! This library crate exposes the pipeline for the CLI, for embedding in an
//! HTTP service, and for integration testing.

pub mod config;
pub mod pipeline;
pub mod response;

pub use pipeline::{BatchResult, BatchState, PipelineOrchestrator};
pub use response::ArchiveResponse;
