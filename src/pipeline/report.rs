//! Per-job ledger and batch outcome.

use std::sync::Arc;

use imgbatch_archive::EntryRecord;
use imgbatch_common::{Error, JobError};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle of a batch.
///
/// `Collecting → Dispatching → Draining → {Finalized, Aborted}`. A rejected
/// batch never leaves `Collecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Collecting,
    Dispatching,
    Draining,
    Finalized,
    Aborted,
}

impl BatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Aborted)
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Collecting => "collecting",
            Self::Dispatching => "dispatching",
            Self::Draining => "draining",
            Self::Finalized => "finalized",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Lifecycle of one job: `Pending → Running → {Succeeded, Failed}`, plus
/// `Pending → Failed` for a job cancelled by an abort before it got a
/// concurrency permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    fn can_advance_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

/// What happened to one job.
#[derive(Debug)]
pub struct JobReport {
    pub index: usize,
    pub filename: String,
    pub entry_name: String,
    state: JobState,
    entry: Option<EntryRecord>,
    error: Option<Arc<JobError>>,
}

impl JobReport {
    pub fn new(index: usize, filename: impl Into<String>, entry_name: impl Into<String>) -> Self {
        Self {
            index,
            filename: filename.into(),
            entry_name: entry_name.into(),
            state: JobState::Pending,
            entry: None,
            error: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// The archive entry, once the job succeeded.
    pub fn entry(&self) -> Option<&EntryRecord> {
        self.entry.as_ref()
    }

    /// Why the job failed, if it did.
    pub fn error(&self) -> Option<&JobError> {
        self.error.as_deref()
    }

    /// Move to `next`. Terminal states are reached exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] for a transition the state machine does
    /// not allow; the report is left unchanged.
    pub fn advance(&mut self, next: JobState) -> Result<(), Error> {
        if !self.state.can_advance_to(next) {
            return Err(Error::internal(format!(
                "job {} ({}): illegal transition {:?} -> {:?}",
                self.index, self.filename, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    pub(crate) fn succeed(&mut self, entry: EntryRecord) -> Result<(), Error> {
        self.advance(JobState::Succeeded)?;
        self.entry = Some(entry);
        Ok(())
    }

    pub(crate) fn fail(&mut self, cause: Error) -> Result<Arc<JobError>, Error> {
        self.advance(JobState::Failed)?;
        let error = Arc::new(JobError::new(&self.filename, cause));
        self.error = Some(Arc::clone(&error));
        Ok(error)
    }
}

/// Why a batch was aborted.
#[derive(Debug, thiserror::Error)]
pub enum BatchFailure {
    /// A job failed; the first one to do so aborts the batch.
    #[error("job failed: {0}")]
    Job(Arc<JobError>),

    /// The batch itself failed: the archive could not be written, the batch
    /// was cancelled, or an internal invariant broke.
    #[error(transparent)]
    Batch(Error),
}

impl BatchFailure {
    pub fn cause(&self) -> &Error {
        match self {
            Self::Job(e) => &e.cause,
            Self::Batch(e) => e,
        }
    }

    pub fn http_status(&self) -> u16 {
        self.cause().http_status()
    }

    /// Whether the batch itself broke, as opposed to one input failing.
    pub fn is_fatal(&self) -> bool {
        self.cause().is_batch_fatal()
    }
}

/// Aggregate outcome of a batch run.
#[derive(Debug)]
pub struct BatchResult {
    pub batch_id: Uuid,
    pub state: BatchState,
    pub jobs: Vec<JobReport>,
    pub entries_written: usize,
    pub bytes_written: u64,
    /// The first failure, for an aborted batch.
    pub failure: Option<BatchFailure>,
}

impl BatchResult {
    pub fn is_finalized(&self) -> bool {
        self.state == BatchState::Finalized
    }

    pub fn succeeded(&self) -> usize {
        self.count(JobState::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(JobState::Failed)
    }

    fn count(&self, state: JobState) -> usize {
        self.jobs.iter().filter(|j| j.state == state).count()
    }
}
