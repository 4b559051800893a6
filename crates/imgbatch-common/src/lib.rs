//! imgbatch-common: Shared types, limits, and errors.
//!
//! This crate provides the vocabulary used by every other imgbatch crate:
//!
//! - **Error Handling**: the batch error taxonomy ([`Error`]) and the per-job
//!   wrapper ([`JobError`])
//! - **Core Types**: [`TargetFormat`], [`Quality`], [`ConversionRequest`],
//!   [`UploadedImage`], and [`BatchLimits`]
//! - **Path Utilities**: the output naming policy
//!
//! # Examples
//!
//! ```
//! use imgbatch_common::{ConversionRequest, Quality, TargetFormat};
//! use imgbatch_common::paths::output_name;
//!
//! let request = ConversionRequest::new(TargetFormat::Png, Quality::new(80).unwrap());
//! assert_eq!(output_name("holiday/IMG_0001.HEIC", request.format), "IMG_0001.png");
//! ```

pub mod error;
pub mod paths;
pub mod types;

pub use error::{Error, JobError, Result};
pub use types::*;
