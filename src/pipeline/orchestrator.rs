//! Fans a batch out to converter processes and drains their output into a
//! single archive.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt;
use imgbatch_archive::{AppendError, ArchiveError, ArchiveWriter, DosTimestamp};
use imgbatch_common::{
    BatchLimits, ConversionRequest, Error, JobError, Result, UploadedImage,
};
use imgbatch_convert::{ConversionJob, Converter, EntryContent};
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::report::{BatchFailure, BatchResult, BatchState, JobReport, JobState};
use crate::config::Config;

/// Converter processes allowed at once unless configured otherwise.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 8;

/// A screened batch, ready to run. Nothing has been launched yet.
#[derive(Debug)]
pub struct Batch {
    id: Uuid,
    jobs: Vec<ConversionJob>,
}

impl Batch {
    pub fn id(&self) -> Uuid {
        self.id
    }

}

/// Progress reported by job tasks to the drain loop.
enum JobEvent {
    /// The job holds a permit and is launching its converter.
    Started { index: usize },
    /// The converter produced its first chunk, or finished with no output.
    Ready { index: usize, content: EntryContent },
    /// The job failed before producing any output.
    Failed { index: usize, error: JobError },
}

/// Runs batches: screens inputs, bounds concurrency, and serializes
/// converter output into one ZIP archive with all-or-abort semantics.
#[derive(Debug, Clone)]
pub struct PipelineOrchestrator {
    converter: Arc<Converter>,
    limits: BatchLimits,
    max_concurrent_jobs: usize,
    compression_level: u32,
    timestamp: Option<DosTimestamp>,
}

impl PipelineOrchestrator {
    pub fn new(converter: Converter) -> Self {
        Self {
            converter: Arc::new(converter),
            limits: BatchLimits::default(),
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            compression_level: 9,
            timestamp: None,
        }
    }

    /// Build an orchestrator from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Launch`] if the configured converter is not installed.
    pub fn from_config(config: &Config) -> Result<Self> {
        let converter = Converter::from_config(&config.converter)?;
        Ok(Self::new(converter)
            .with_limits(config.limits.batch_limits())
            .with_max_concurrent_jobs(config.limits.max_concurrent_jobs)
            .with_compression_level(config.archive.compression_level))
    }

    pub fn with_limits(mut self, limits: BatchLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Bound on converter processes running at once. Zero is treated as one.
    pub fn with_max_concurrent_jobs(mut self, n: usize) -> Self {
        self.max_concurrent_jobs = n.max(1);
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Fixed modification time for every entry, for reproducible archives.
    pub fn with_timestamp(mut self, timestamp: DosTimestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    /// Collect a batch: check limits and converter availability, then screen
    /// every input into a job.
    ///
    /// Nothing is launched and nothing is written; a rejected batch leaves no
    /// trace.
    ///
    /// # Errors
    ///
    /// - [`Error::Rejected`] for an empty batch, too many files, or an
    ///   oversized file
    /// - [`Error::Launch`] if the converter cannot be found
    /// - [`Error::Unsupported`] if any input is not an image
    pub fn prepare(&self, images: Vec<UploadedImage>, request: ConversionRequest) -> Result<Batch> {
        let id = Uuid::new_v4();
        self.limits.check(&images)?;
        self.converter.check_available()?;

        let jobs = images
            .into_iter()
            .enumerate()
            .map(|(index, image)| ConversionJob::new(index, image, request))
            .collect::<std::result::Result<Vec<_>, JobError>>()
            .map_err(|e| match e.cause {
                Error::Unsupported(msg) => Error::unsupported(format!("{}: {msg}", e.filename)),
                other => other,
            })?;

        tracing::info!(
            batch_id = %id,
            files = jobs.len(),
            format = %request.format,
            quality = %request.quality,
            "batch accepted"
        );

        Ok(Batch { id, jobs })
    }

    /// Run a prepared batch, streaming the archive into `sink`.
    ///
    /// Entries are written first ready, first written. On the first failure
    /// every remaining job is cancelled, running converters are killed, and
    /// the archive is left without its central directory. Cancelling `cancel`
    /// aborts the batch the same way.
    pub async fn run<W>(&self, batch: Batch, sink: W, cancel: CancellationToken) -> BatchResult
    where
        W: AsyncWrite + Unpin + Send,
    {
        let span = tracing::info_span!("batch", batch_id = %batch.id);
        self.run_batch(batch, sink, cancel).instrument(span).await
    }

    async fn run_batch<W>(&self, batch: Batch, sink: W, cancel: CancellationToken) -> BatchResult
    where
        W: AsyncWrite + Unpin + Send,
    {
        let Batch { id, jobs } = batch;
        let total = jobs.len();

        let mut writer = ArchiveWriter::new(sink).with_compression_level(self.compression_level);
        if let Some(ts) = self.timestamp {
            writer = writer.with_timestamp(ts);
        }

        let mut reports: Vec<JobReport> = jobs
            .iter()
            .map(|j| JobReport::new(j.index(), j.filename(), j.output_name()))
            .collect();

        let batch_cancel = cancel.child_token();
        let (tx, mut rx) = mpsc::channel::<JobEvent>(2 * total.max(1));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_jobs));
        let mut tasks = JoinSet::new();

        tracing::debug!(state = %BatchState::Dispatching, jobs = total, "batch state");
        for job in jobs {
            tasks.spawn(run_job(
                job,
                Arc::clone(&self.converter),
                Arc::clone(&semaphore),
                tx.clone(),
                batch_cancel.child_token(),
            ));
        }
        drop(tx);

        tracing::debug!(state = %BatchState::Draining, "batch state");
        let mut failure = {
            let mut drain = Drain {
                reports: &mut reports,
                ready: VecDeque::new(),
                settled: 0,
                channel_open: true,
            };
            drain.run(&mut writer, &mut rx, &batch_cancel).await
        };

        let state = if failure.is_none() {
            match writer.finalize().await {
                Ok(summary) => {
                    tracing::info!(
                        entries = summary.entries,
                        bytes = summary.bytes_written,
                        "batch finalized"
                    );
                    BatchState::Finalized
                }
                Err(e) => {
                    failure = Some(BatchFailure::Batch(archive_error(e)));
                    BatchState::Aborted
                }
            }
        } else {
            BatchState::Aborted
        };

        if state == BatchState::Aborted {
            batch_cancel.cancel();
            drop(rx);
            tasks.shutdown().await;
            for report in reports.iter_mut().filter(|r| !r.state().is_terminal()) {
                if let Err(e) = report.fail(Error::Cancelled) {
                    tracing::error!(error = %e, "job ledger out of step");
                }
            }
            let bytes = writer.abort();
            match &failure {
                Some(f) if f.is_fatal() => {
                    tracing::error!(failure = %f, bytes_sent = bytes, "batch aborted")
                }
                Some(f) => tracing::warn!(failure = %f, bytes_sent = bytes, "batch aborted"),
                None => {}
            }
        } else {
            while tasks.join_next().await.is_some() {}
        }

        BatchResult {
            batch_id: id,
            state,
            entries_written: writer.entry_count(),
            bytes_written: writer.bytes_written(),
            jobs: reports,
            failure,
        }
    }
}

/// Drain loop state: the single writer's view of the batch.
struct Drain<'a> {
    reports: &'a mut [JobReport],
    ready: VecDeque<(usize, EntryContent)>,
    settled: usize,
    channel_open: bool,
}

impl Drain<'_> {
    /// Append ready entries until every job settled or the first failure.
    async fn run<W>(
        &mut self,
        writer: &mut ArchiveWriter<W>,
        rx: &mut mpsc::Receiver<JobEvent>,
        cancel: &CancellationToken,
    ) -> Option<BatchFailure>
    where
        W: AsyncWrite + Unpin + Send,
    {
        while self.settled < self.reports.len() {
            let (index, content) = match self.ready.pop_front() {
                Some(next) => next,
                None => {
                    let event = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Some(BatchFailure::Batch(Error::Cancelled)),
                        event = rx.recv() => event,
                    };
                    match event {
                        Some(event) => {
                            if let Err(f) = self.apply(event) {
                                return Some(f);
                            }
                            continue;
                        }
                        None => {
                            return Some(BatchFailure::Batch(Error::internal(
                                "job tasks ended before reporting",
                            )))
                        }
                    }
                }
            };

            let name = self.reports[index].entry_name.clone();
            let outcome = {
                let append = writer.append(&name, content);
                tokio::pin!(append);
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Some(BatchFailure::Batch(Error::Cancelled)),
                        result = &mut append => break result,
                        event = rx.recv(), if self.channel_open => match event {
                            Some(event) => {
                                if let Err(f) = self.apply(event) {
                                    return Some(f);
                                }
                            }
                            None => self.channel_open = false,
                        },
                    }
                }
            };

            let settled = match outcome {
                Ok(record) => self.reports[index].succeed(record),
                Err(AppendError::Source(cause)) => {
                    return Some(self.fail_job(index, cause));
                }
                Err(AppendError::Archive(e)) => {
                    let cause = archive_error(e);
                    let _ = self.reports[index].fail(Error::Cancelled);
                    return Some(BatchFailure::Batch(cause));
                }
            };
            if let Err(e) = settled {
                return Some(BatchFailure::Batch(e));
            }
            self.settled += 1;
            tracing::debug!(
                job = index,
                entry = %name,
                done = self.settled,
                total = self.reports.len(),
                "entry written"
            );
        }
        None
    }

    /// Record one job event. Ready entries queue up in arrival order.
    fn apply(&mut self, event: JobEvent) -> std::result::Result<(), BatchFailure> {
        match event {
            JobEvent::Started { index } => self.reports[index]
                .advance(JobState::Running)
                .map_err(BatchFailure::Batch),
            JobEvent::Ready { index, content } => {
                self.ready.push_back((index, content));
                Ok(())
            }
            JobEvent::Failed { index, error } => Err(self.fail_job(index, error.cause)),
        }
    }

    fn fail_job(&mut self, index: usize, cause: Error) -> BatchFailure {
        let report = &mut self.reports[index];
        tracing::warn!(job = index, input = %report.filename, error = %cause, "job failed");
        match report.fail(cause) {
            Ok(error) => BatchFailure::Job(error),
            Err(e) => BatchFailure::Batch(e),
        }
    }
}

/// One job task: wait for a permit, launch, and report once output starts.
async fn run_job(
    job: ConversionJob,
    converter: Arc<Converter>,
    semaphore: Arc<Semaphore>,
    events: mpsc::Sender<JobEvent>,
    cancel: CancellationToken,
) {
    let index = job.index();
    let permit = tokio::select! {
        _ = cancel.cancelled() => return,
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };

    if events.send(JobEvent::Started { index }).await.is_err() {
        return;
    }

    let event = match job.run(&converter, cancel) {
        Ok(entry) => match await_first_output(entry.content).await {
            Ok(content) => JobEvent::Ready {
                index,
                content: hold_permit(content, permit),
            },
            Err(cause) => JobEvent::Failed {
                index,
                error: JobError::new(job.filename(), cause),
            },
        },
        Err(error) => JobEvent::Failed { index, error },
    };

    // A closed channel means the batch is already over.
    let _ = events.send(event).await;
}

/// Wait until the converter has produced output or finished.
///
/// A converter that fails before emitting anything is reported as an error
/// here, so it never reaches the archive.
async fn await_first_output(content: EntryContent) -> Result<EntryContent> {
    let mut content = content.peekable();
    if let Some(Err(_)) = std::pin::Pin::new(&mut content).peek().await {
        return match content.next().await {
            Some(Err(e)) => Err(e),
            _ => Err(Error::internal("peeked error vanished")),
        };
    }
    Ok(Box::pin(content))
}

/// Keep the job's concurrency permit until its entry has been drained.
fn hold_permit(content: EntryContent, permit: OwnedSemaphorePermit) -> EntryContent {
    Box::pin(async_stream::stream! {
        let _permit = permit;
        let mut content = content;
        while let Some(item) = content.next().await {
            yield item;
        }
    })
}

/// Map a writer failure into the batch taxonomy.
fn archive_error(e: ArchiveError) -> Error {
    match e {
        ArchiveError::Write(io) => Error::Write(io),
        ArchiveError::Compress(io) => Error::internal(format!("deflate failed: {io}")),
        ArchiveError::TooLarge(msg) => Error::rejected(msg),
        other => Error::internal(other.to_string()),
    }
}
