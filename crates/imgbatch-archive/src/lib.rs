//! # imgbatch-archive
//!
//! A ZIP writer for sinks that cannot seek, such as a network response.
//!
//! Each entry is written as a local header with deferred sizes, the deflated
//! body as it is produced, and a trailing data descriptor. [`ArchiveWriter::finalize`]
//! appends the central directory; until then the output is not a readable
//! archive, which is what makes an aborted stream detectably broken.
//!
//! ## Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use imgbatch_archive::ArchiveWriter;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let sink = tokio::io::sink();
//! let mut archive = ArchiveWriter::new(sink);
//! let content = futures::stream::iter([Ok::<_, std::io::Error>(Bytes::from_static(b"hello"))]);
//! archive.append("hello.txt", content).await?;
//! archive.finalize().await?;
//! # Ok(())
//! # }
//! ```

mod error;
pub mod format;
mod writer;

pub use error::{AppendError, ArchiveError, Result};
pub use format::DosTimestamp;
pub use writer::{ArchiveSummary, ArchiveWriter, EntryRecord, WriterState};
