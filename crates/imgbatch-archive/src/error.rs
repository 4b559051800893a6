//! Error types for imgbatch-archive.

/// Result type alias using [`ArchiveError`].
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Errors raised by the archive writer itself.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The sink refused bytes. Output already sent is corrupt.
    #[error("write to archive sink failed: {0}")]
    Write(#[source] std::io::Error),

    /// The deflate encoder failed.
    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),

    /// A value does not fit the 32-bit ZIP fields (ZIP64 is not written).
    #[error("archive too large: {0}")]
    TooLarge(String),

    /// `append` or `finalize` after a successful `finalize`.
    #[error("archive already finalized")]
    Finalized,

    /// An earlier failure left a partial entry in the stream.
    #[error("archive is poisoned by an earlier failure")]
    Poisoned,
}

/// Failure of a single [`append`](crate::ArchiveWriter::append) call.
///
/// Separates failures of the entry's content stream from failures of the
/// writer so callers can attribute them.
#[derive(Debug, thiserror::Error)]
pub enum AppendError<E> {
    /// The content stream yielded an error mid-entry.
    #[error("entry content failed: {0}")]
    Source(#[source] E),

    /// The writer failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}
