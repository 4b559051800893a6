//! Transport-neutral archive response.
//!
//! [`ArchiveResponse`] is what an HTTP handler (or the CLI) forwards to its
//! client: a content type, a suggested filename, and a body stream. The body
//! carries the archive bytes as the pipeline produces them. A finalized batch
//! ends the body cleanly after the ZIP trailer; an aborted one ends it with an
//! error so the transport can terminate the response abnormally instead of
//! presenting a truncated archive as complete.

use std::io;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use imgbatch_common::{ConversionRequest, Result, UploadedImage};
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::pipeline::{BatchResult, PipelineOrchestrator};

/// MIME type of the response body.
pub const CONTENT_TYPE: &str = "application/zip";

/// Suggested download name unless configured otherwise.
pub const DEFAULT_FILENAME: &str = "converted_images.zip";

/// Bytes buffered between the archive writer and the body consumer.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Archive bytes; an `Err` item means the batch was aborted.
pub type ResponseBody = BoxStream<'static, io::Result<Bytes>>;

/// A batch conversion in flight, presented as a downloadable archive.
pub struct ArchiveResponse {
    batch_id: Uuid,
    filename: String,
    body: ResponseBody,
    outcome: BatchOutcome,
}

impl std::fmt::Debug for ArchiveResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveResponse")
            .field("batch_id", &self.batch_id)
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

/// Resolves to the [`BatchResult`] once the body has been fully consumed.
#[derive(Debug)]
pub struct BatchOutcome(oneshot::Receiver<BatchResult>);

impl BatchOutcome {
    /// Wait for the batch result. `None` if the body was dropped before its
    /// end, in which case the batch aborted with a write error.
    pub async fn wait(self) -> Option<BatchResult> {
        self.0.await.ok()
    }
}

impl ArchiveResponse {
    /// Prepare the batch and start it in the background.
    ///
    /// Rejection happens here, before any process starts or any byte is
    /// produced; map it with [`Error::http_status`](imgbatch_common::Error::http_status).
    /// Once this returns `Ok`, the batch runs as the body is consumed.
    /// Dropping the body aborts it.
    pub fn start(
        orchestrator: &PipelineOrchestrator,
        images: Vec<UploadedImage>,
        request: ConversionRequest,
        filename: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let batch = orchestrator.prepare(images, request)?;
        let batch_id = batch.id();
        let orchestrator = orchestrator.clone();
        let cancel = cancel.child_token();
        let abort_on_drop = cancel.clone().drop_guard();

        let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
        let run = tokio::spawn(async move { orchestrator.run(batch, writer, cancel).await });
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let body = Box::pin(async_stream::stream! {
            let _abort_on_drop = abort_on_drop;
            let mut chunks = ReaderStream::new(reader);
            while let Some(chunk) = chunks.next().await {
                yield chunk;
            }

            match run.await {
                Ok(result) => {
                    let aborted = (!result.is_finalized()).then(|| abort_error(&result));
                    let _ = outcome_tx.send(result);
                    if let Some(e) = aborted {
                        yield Err(e);
                    }
                }
                Err(e) => yield Err(io::Error::other(format!("batch task failed: {e}"))),
            }
        });

        Ok(Self {
            batch_id,
            filename: filename.into(),
            body,
            outcome: BatchOutcome(outcome_rx),
        })
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// `Content-Disposition` header value offering the archive as a download.
    pub fn content_disposition(&self) -> String {
        let escaped: String = self
            .filename
            .chars()
            .filter(|c| !c.is_control())
            .flat_map(|c| match c {
                '"' | '\\' => vec!['\\', c],
                c => vec![c],
            })
            .collect();
        format!("attachment; filename=\"{escaped}\"")
    }

    /// Split into the body and a handle on the final result.
    pub fn into_parts(self) -> (ResponseBody, BatchOutcome) {
        (self.body, self.outcome)
    }
}

fn abort_error(result: &BatchResult) -> io::Error {
    let reason = result
        .failure
        .as_ref()
        .map(|f| f.to_string())
        .unwrap_or_else(|| "unknown failure".to_string());
    io::Error::other(format!("batch {} aborted: {reason}", result.batch_id))
}
