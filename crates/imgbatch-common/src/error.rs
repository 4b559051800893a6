//! Error taxonomy for batch conversion.
//!
//! Failures fall into two groups. Job-local failures ([`Error::ConversionFailed`],
//! [`Error::Timeout`], [`Error::Unsupported`]) are wrapped in a [`JobError`] and
//! recorded against the job that produced them. Batch-level failures
//! ([`Error::Launch`], [`Error::Write`], [`Error::Rejected`]) end the whole
//! batch. Either way a batch with a failure is never finalized.

use std::time::Duration;

/// Unified error type covering all failure modes of a conversion batch.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The converter could not be started (missing binary, permissions).
    #[error("Launch error [{tool}]: {message}")]
    Launch {
        /// Name of the tool that failed to start.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// The converter ran but exited unsuccessfully.
    #[error("Conversion failed [{tool}] ({status}): {stderr}")]
    ConversionFailed {
        /// Name of the tool that failed.
        tool: String,
        /// Exit status description (exit code or terminating signal).
        status: String,
        /// Bounded snippet of the tool's diagnostic output.
        stderr: String,
    },

    /// The converter did not finish within its deadline and was killed.
    #[error("Timeout [{tool}]: no result after {after:?}")]
    Timeout {
        /// Name of the tool that timed out.
        tool: String,
        /// The configured deadline.
        after: Duration,
    },

    /// Writing the archive to its sink failed; the stream is already corrupt.
    #[error("Archive write error: {0}")]
    Write(#[source] std::io::Error),

    /// An input was not an image the converter can be asked to read.
    #[error("Unsupported input: {0}")]
    Unsupported(String),

    /// The batch violated a boundary limit and was refused before starting.
    #[error("Batch rejected: {0}")]
    Rejected(String),

    /// A request parameter was malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Work was cancelled because the batch is being aborted.
    #[error("Cancelled")]
    Cancelled,

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an HTTP status code for whichever transport
    /// forwards the batch response.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Launch { .. } => 503,
            Error::ConversionFailed { .. } => 422,
            Error::Timeout { .. } => 504,
            Error::Write(_) => 500,
            Error::Unsupported(_) => 415,
            Error::Rejected(_) => 413,
            Error::InvalidInput(_) => 400,
            Error::Cancelled => 499,
            Error::Io(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Whether this error ends the whole batch rather than a single job.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            Error::Launch { .. } | Error::Write(_) | Error::Rejected(_) | Error::Internal(_)
        )
    }

    /// Convenience constructor for [`Error::Launch`].
    pub fn launch(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Launch {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::ConversionFailed`].
    pub fn conversion_failed(
        tool: impl Into<String>,
        status: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Error::ConversionFailed {
            tool: tool.into(),
            status: status.into(),
            stderr: stderr.into(),
        }
    }

    /// Convenience constructor for [`Error::Timeout`].
    pub fn timeout(tool: impl Into<String>, after: Duration) -> Self {
        Error::Timeout {
            tool: tool.into(),
            after,
        }
    }

    /// Convenience constructor for [`Error::Unsupported`].
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Convenience constructor for [`Error::Rejected`].
    pub fn rejected(msg: impl Into<String>) -> Self {
        Error::Rejected(msg.into())
    }

    /// Convenience constructor for [`Error::InvalidInput`].
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Convenience constructor for [`Error::Internal`].
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

/// A failure attributed to one input file.
#[derive(Debug, thiserror::Error)]
#[error("{filename}: {cause}")]
pub struct JobError {
    /// Original filename of the input that failed.
    pub filename: String,
    /// What went wrong.
    #[source]
    pub cause: Error,
}

impl JobError {
    /// Attribute `cause` to `filename`.
    pub fn new(filename: impl Into<String>, cause: Error) -> Self {
        Self {
            filename: filename.into(),
            cause,
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
