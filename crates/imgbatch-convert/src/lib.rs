//! # imgbatch-convert
//!
//! Runs the external image converter, one process per input file.
//!
//! - [`ConverterConfig`] and [`ToolRegistry`]: which program to run and
//!   whether it is installed
//! - [`TemplateContext`]: argument templates such as `{format}:-`
//! - [`Converter`] / [`ConverterProcess`]: a spawned process with streamed
//!   stdin, stdout, and bounded stderr capture, a deadline, and cancellation
//! - [`ConversionJob`]: screens an upload, names its output, and turns it into
//!   an [`ArchiveEntry`] whose content is the converter's output stream
//!
//! Jobs never touch the archive; the caller decides where entries go.

pub mod job;
pub mod process;
pub mod template;
pub mod tools;

pub use job::{screen_input, ArchiveEntry, ConversionJob, EntryContent};
pub use process::{Converter, ConverterOutput, ConverterProcess};
pub use template::TemplateContext;
pub use tools::{resolve_program, ConverterConfig, ToolInfo, ToolRegistry};
