//! Sequential streaming ZIP writer.

use std::io::Write;

use bytes::Bytes;
use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};
use futures::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{AppendError, ArchiveError, Result};
use crate::format::{self, CentralEntry, DosTimestamp};

/// Lifecycle of an [`ArchiveWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Accepting entries.
    Open,
    /// A write or content failure left a partial entry behind. Only
    /// abandoning the stream is possible.
    Poisoned,
    /// The central directory has been written.
    Finalized,
}

/// What was written for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    /// Entry name.
    pub name: String,
    /// CRC-32 of the uncompressed content.
    pub crc32: u32,
    /// Deflated body size.
    pub compressed_size: u64,
    /// Content size.
    pub uncompressed_size: u64,
}

/// Totals reported by [`ArchiveWriter::finalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Number of entries in the central directory.
    pub entries: usize,
    /// Total archive size in bytes.
    pub bytes_written: u64,
}

/// Writes a ZIP archive to a non-seekable sink, one entry at a time.
///
/// Every method takes `&mut self`, so entries can never be interleaved:
/// the borrow checker is the single-writer lock. Compressed bytes are
/// pushed to the sink as soon as the encoder produces them.
pub struct ArchiveWriter<W> {
    sink: W,
    offset: u64,
    entries: Vec<CentralEntry>,
    compression: Compression,
    modified: DosTimestamp,
    state: WriterState,
}

impl<W> std::fmt::Debug for ArchiveWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveWriter")
            .field("offset", &self.offset)
            .field("entries", &self.entries.len())
            .field("state", &self.state)
            .finish()
    }
}

impl<W: AsyncWrite + Unpin> ArchiveWriter<W> {
    /// Create a writer with maximum compression and the current time as the
    /// entry timestamp.
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            offset: 0,
            entries: Vec::new(),
            compression: Compression::best(),
            modified: DosTimestamp::now(),
            state: WriterState::Open,
        }
    }

    /// Set the deflate level (0 to 9; larger values are clamped).
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression = Compression::new(level.min(9));
        self
    }

    /// Set the modification time stamped on every entry.
    pub fn with_timestamp(mut self, modified: DosTimestamp) -> Self {
        self.modified = modified;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Number of completed entries.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Bytes handed to the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.offset
    }

    /// Append one entry, consuming `content` to its end.
    ///
    /// The entry is complete only when this returns `Ok`. On any error the
    /// writer is poisoned: a partial entry is already in the sink and
    /// [`finalize`](Self::finalize) will refuse to run.
    pub async fn append<S, E>(
        &mut self,
        name: &str,
        mut content: S,
    ) -> std::result::Result<EntryRecord, AppendError<E>>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    {
        self.ensure_open()?;

        if u16::try_from(name.len()).is_err() {
            self.poison(name, "entry name too long");
            return Err(ArchiveError::TooLarge(format!(
                "entry name of {} bytes exceeds the 65535 limit",
                name.len()
            ))
            .into());
        }

        let local_header_offset = self.fits_u32(self.offset, "local header offset")?;
        self.emit(&format::local_file_header(name, self.modified))
            .await?;

        let mut encoder = DeflateEncoder::new(Vec::new(), self.compression);
        let mut crc = Crc::new();
        let mut uncompressed_size = 0u64;
        let mut compressed_size = 0u64;

        while let Some(item) = content.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.poison(name, "entry content failed");
                    return Err(AppendError::Source(e));
                }
            };

            crc.update(&chunk);
            uncompressed_size += chunk.len() as u64;

            if let Err(e) = encoder.write_all(&chunk) {
                self.poison(name, "deflate failed");
                return Err(ArchiveError::Compress(e).into());
            }
            let deflated = std::mem::take(encoder.get_mut());
            if !deflated.is_empty() {
                compressed_size += deflated.len() as u64;
                self.emit(&deflated).await?;
            }
        }

        let tail = match encoder.finish() {
            Ok(tail) => tail,
            Err(e) => {
                self.poison(name, "deflate failed");
                return Err(ArchiveError::Compress(e).into());
            }
        };
        compressed_size += tail.len() as u64;
        self.emit(&tail).await?;

        let crc32 = crc.sum();
        let compressed = self.fits_u32(compressed_size, "compressed entry size")?;
        let uncompressed = self.fits_u32(uncompressed_size, "entry size")?;
        self.emit(&format::data_descriptor(crc32, compressed, uncompressed))
            .await?;
        self.flush().await?;

        self.entries.push(CentralEntry {
            name: name.to_string(),
            crc32,
            compressed_size: compressed,
            uncompressed_size: uncompressed,
            local_header_offset,
            modified: self.modified,
        });

        tracing::debug!(
            entry = name,
            uncompressed_size,
            compressed_size,
            "archive entry written"
        );

        Ok(EntryRecord {
            name: name.to_string(),
            crc32,
            compressed_size,
            uncompressed_size,
        })
    }

    /// Write the central directory and end record. Legal exactly once, and
    /// only while the writer is [`WriterState::Open`].
    pub async fn finalize(&mut self) -> Result<ArchiveSummary> {
        self.ensure_open()?;

        let directory_offset = self.fits_u32(self.offset, "central directory offset")?;
        let entry_count = match u16::try_from(self.entries.len()) {
            Ok(n) => n,
            Err(_) => {
                self.state = WriterState::Poisoned;
                return Err(ArchiveError::TooLarge(format!(
                    "{} entries exceed the 65535 limit",
                    self.entries.len()
                )));
            }
        };

        let directory: Vec<u8> = self
            .entries
            .iter()
            .flat_map(format::central_directory_header)
            .collect();
        let directory_size = self.fits_u32(directory.len() as u64, "central directory size")?;

        self.emit(&directory).await?;
        self.emit(&format::end_of_central_directory(
            entry_count,
            directory_size,
            directory_offset,
        ))
        .await?;
        self.flush().await?;

        self.state = WriterState::Finalized;
        tracing::debug!(
            entries = self.entries.len(),
            bytes = self.offset,
            "archive finalized"
        );

        Ok(ArchiveSummary {
            entries: self.entries.len(),
            bytes_written: self.offset,
        })
    }

    /// Give up on the archive without writing a trailer.
    ///
    /// Returns the number of bytes already handed to the sink.
    pub fn abort(&mut self) -> u64 {
        if self.state == WriterState::Open {
            self.state = WriterState::Poisoned;
        }
        tracing::warn!(
            entries = self.entries.len(),
            bytes = self.offset,
            "archive aborted without trailer"
        );
        self.offset
    }

    /// Recover the sink.
    pub fn into_inner(self) -> W {
        self.sink
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            WriterState::Open => Ok(()),
            WriterState::Poisoned => Err(ArchiveError::Poisoned),
            WriterState::Finalized => Err(ArchiveError::Finalized),
        }
    }

    fn poison(&mut self, name: &str, reason: &str) {
        tracing::debug!(entry = name, reason, "archive writer poisoned");
        self.state = WriterState::Poisoned;
    }

    fn fits_u32(&mut self, value: u64, what: &str) -> Result<u32> {
        u32::try_from(value).map_err(|_| {
            self.state = WriterState::Poisoned;
            ArchiveError::TooLarge(format!("{what} {value} needs ZIP64"))
        })
    }

    async fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        if let Err(e) = self.sink.write_all(bytes).await {
            self.state = WriterState::Poisoned;
            return Err(ArchiveError::Write(e));
        }
        self.offset += bytes.len() as u64;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if let Err(e) = self.sink.flush().await {
            self.state = WriterState::Poisoned;
            return Err(ArchiveError::Write(e));
        }
        Ok(())
    }
}
