//! One invocation of the external converter.
//!
//! A [`Converter`] holds the resolved program and argument template and
//! launches [`ConverterProcess`]es. Each process streams its input from an
//! independent task, is read chunk by chunk through [`ConverterProcess::output`],
//! and drains stderr into a bounded buffer in the background. Nothing is
//! buffered whole: input is a shared [`Bytes`] handle and output is handed on
//! as it arrives.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use imgbatch_common::{ConversionRequest, Error, Result};

use crate::template::TemplateContext;
use crate::tools::{display_name, resolve_program, ConverterConfig};

/// Read size for converter output.
const OUTPUT_CHUNK: usize = 64 * 1024;

/// Default converter timeout: 2 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default bound on captured stderr, in bytes.
const DEFAULT_STDERR_LIMIT: usize = 4096;

/// Converted bytes of one process. Ends with an error instead of a clean end
/// when the converter did not exit successfully.
pub type ConverterOutput = BoxStream<'static, Result<Bytes>>;

/// A configured converter that launches one process per conversion.
///
/// # Example
///
/// ```no_run
/// use bytes::Bytes;
/// use futures::StreamExt;
/// use imgbatch_common::ConversionRequest;
/// use imgbatch_convert::Converter;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> imgbatch_common::Result<()> {
/// let converter = Converter::new("magick")
///     .args(["-", "-quality", "{quality}", "{format}:-"]);
/// let mut process = converter.start(ConversionRequest::default(), "in.png", CancellationToken::new())?;
/// process.write_input(Bytes::from(std::fs::read("in.png")?))?;
/// let mut output = process.output();
/// while let Some(chunk) = output.next().await {
///     let chunk = chunk?;
///     println!("{} bytes", chunk.len());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Converter {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    stderr_limit: usize,
}

impl Converter {
    /// Create a converter for the given program with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            stderr_limit: DEFAULT_STDERR_LIMIT,
        }
    }

    /// Build a converter from configuration, resolving the program in `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Launch`] if the program cannot be found.
    pub fn from_config(config: &ConverterConfig) -> Result<Self> {
        let program = resolve_program(&config.program)?;
        Ok(Self::new(program)
            .args(config.args.iter().cloned())
            .timeout(config.timeout)
            .stderr_limit(config.stderr_limit))
    }

    /// Append one argument template.
    pub fn arg(mut self, s: impl Into<String>) -> Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple argument templates.
    pub fn args(mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum time a single conversion may take.
    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = d;
        self
    }

    /// Set how many stderr bytes are kept for error reports.
    pub fn stderr_limit(mut self, limit: usize) -> Self {
        self.stderr_limit = limit;
        self
    }

    /// Short program name used in logs and errors.
    pub fn tool_name(&self) -> String {
        display_name(&self.program)
    }

    /// Check that the program can be found, without starting it.
    pub fn check_available(&self) -> Result<()> {
        resolve_program(&self.program.to_string_lossy()).map(|_| ())
    }

    /// Arguments for one conversion, templates expanded.
    pub fn render_args(&self, request: ConversionRequest, filename: &str) -> Vec<String> {
        TemplateContext::new()
            .with_request(request)
            .with_input_name(filename)
            .substitute_all(&self.args)
    }

    /// Launch the converter with all three standard streams piped.
    ///
    /// The process is killed if the returned handle is dropped, if `cancel`
    /// fires, or if the timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Launch`] if spawning the process fails.
    pub fn start(
        &self,
        request: ConversionRequest,
        filename: &str,
        cancel: CancellationToken,
    ) -> Result<ConverterProcess> {
        let tool = self.tool_name();
        let args = self.render_args(request, filename);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::launch(&tool, format!("failed to spawn: {e}")))?;

        tracing::debug!(tool = %tool, pid = ?child.id(), ?args, "converter started");

        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(capture_stderr(stderr, self.stderr_limit, tool.clone())));

        Ok(ConverterProcess {
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            child,
            tool,
            input_task: None,
            stderr_task,
            timeout: self.timeout,
            deadline: Instant::now() + self.timeout,
            cancel,
            status: None,
        })
    }
}

/// A running converter process.
///
/// The handle exclusively owns the child and its pipes. Dropping it kills
/// the child and stops its helper tasks.
pub struct ConverterProcess {
    child: Child,
    tool: String,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    input_task: Option<JoinHandle<std::io::Result<()>>>,
    stderr_task: Option<JoinHandle<String>>,
    timeout: Duration,
    deadline: Instant,
    cancel: CancellationToken,
    status: Option<ExitStatus>,
}

impl std::fmt::Debug for ConverterProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterProcess")
            .field("tool", &self.tool)
            .field("pid", &self.child.id())
            .field("status", &self.status)
            .finish()
    }
}

/// Outcome of waiting on a pipe or the child under the deadline.
enum Wake<T> {
    Done(T),
    Cancelled,
    TimedOut,
}

impl ConverterProcess {
    /// OS process id, while the process is running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Stream `input` to the converter's stdin from an independent task,
    /// closing stdin afterwards.
    ///
    /// Runs concurrently with output consumption, so a converter that starts
    /// writing before it has read everything cannot deadlock against us.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if input was already written.
    pub fn write_input(&mut self, input: Bytes) -> Result<()> {
        let mut stdin = self
            .stdin
            .take()
            .ok_or_else(|| Error::internal(format!("{} input already written", self.tool)))?;

        self.input_task = Some(tokio::spawn(async move {
            stdin.write_all(&input).await?;
            stdin.flush().await?;
            drop(stdin);
            Ok(())
        }));
        Ok(())
    }

    /// Read the next chunk of converted output; `None` at end of output.
    ///
    /// End of output says nothing about success: call [`wait`](Self::wait).
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut buf = BytesMut::with_capacity(OUTPUT_CHUNK);
        let wake = tokio::select! {
            _ = self.cancel.cancelled() => Wake::Cancelled,
            read = tokio::time::timeout_at(self.deadline, stdout.read_buf(&mut buf)) => match read {
                Ok(read) => Wake::Done(read),
                Err(_) => Wake::TimedOut,
            },
        };

        match wake {
            Wake::Done(Ok(0)) => {
                self.stdout = None;
                Ok(None)
            }
            Wake::Done(Ok(_)) => Ok(Some(buf.freeze())),
            Wake::Done(Err(e)) => {
                self.kill().await;
                Err(Error::conversion_failed(
                    &self.tool,
                    "output unreadable",
                    e.to_string(),
                ))
            }
            Wake::Cancelled => {
                self.kill().await;
                Err(Error::Cancelled)
            }
            Wake::TimedOut => {
                self.kill().await;
                Err(Error::timeout(&self.tool, self.timeout))
            }
        }
    }

    /// Wait for the process to exit and judge its status.
    ///
    /// Intended to be called once output has been drained; unread output is
    /// discarded, which a converter usually reports as a failure.
    ///
    /// # Errors
    ///
    /// - [`Error::ConversionFailed`] for a non-zero exit or a signal, with
    ///   the captured stderr.
    /// - [`Error::Timeout`] / [`Error::Cancelled`] if the deadline passed or
    ///   the batch was cancelled first; the process is killed.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.stdout = None;
        self.stdin = None;

        let status = match self.status {
            Some(status) => status,
            None => {
                let wake = tokio::select! {
                    _ = self.cancel.cancelled() => Wake::Cancelled,
                    waited = tokio::time::timeout_at(self.deadline, self.child.wait()) => match waited {
                        Ok(waited) => Wake::Done(waited),
                        Err(_) => Wake::TimedOut,
                    },
                };
                match wake {
                    Wake::Done(Ok(status)) => status,
                    Wake::Done(Err(e)) => {
                        return Err(Error::conversion_failed(
                            &self.tool,
                            "wait failed",
                            e.to_string(),
                        ))
                    }
                    Wake::Cancelled => {
                        self.kill().await;
                        return Err(Error::Cancelled);
                    }
                    Wake::TimedOut => {
                        self.kill().await;
                        return Err(Error::timeout(&self.tool, self.timeout));
                    }
                }
            }
        };
        self.status = Some(status);

        let input_result = match self.input_task.take() {
            Some(task) => task.await.unwrap_or_else(|e| Err(std::io::Error::other(e))),
            None => Ok(()),
        };
        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            tracing::debug!(tool = %self.tool, %status, "converter failed");
            return Err(Error::conversion_failed(&self.tool, status.to_string(), stderr));
        }

        match input_result {
            Ok(()) => {}
            // The converter stopped reading but still succeeded.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::debug!(tool = %self.tool, "converter closed stdin early");
            }
            Err(e) => {
                return Err(Error::conversion_failed(
                    &self.tool,
                    "input not delivered",
                    e.to_string(),
                ))
            }
        }

        tracing::debug!(tool = %self.tool, %status, "converter finished");
        Ok(status)
    }

    /// Turn the process into a lazy stream of its converted output.
    ///
    /// The stream yields output chunks as they arrive and, after the last
    /// one, waits for the exit status. A failed conversion therefore ends the
    /// stream with an error even if some bytes were already yielded.
    pub fn output(self) -> ConverterOutput {
        let mut process = self;
        Box::pin(async_stream::stream! {
            loop {
                match process.next_chunk().await {
                    Ok(Some(chunk)) => yield Ok(chunk),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
            if let Err(e) = process.wait().await {
                yield Err(e);
            }
        })
    }

    async fn kill(&mut self) {
        self.stdout = None;
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(tool = %self.tool, error = %e, "kill failed; process already gone");
        }
        if let Ok(status) = self.child.wait().await {
            self.status = Some(status);
        }
        if let Some(task) = self.input_task.take() {
            task.abort();
        }
    }
}

impl Drop for ConverterProcess {
    fn drop(&mut self) {
        if let Some(task) = self.input_task.take() {
            task.abort();
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

/// Drain stderr, keeping at most `limit` bytes for error reports and logging
/// every line at debug level.
async fn capture_stderr(mut stderr: ChildStderr, limit: usize, tool: String) -> String {
    let mut kept = Vec::with_capacity(limit.min(DEFAULT_STDERR_LIMIT));
    let mut buf = vec![0u8; 4096];

    loop {
        let n = match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let room = limit.saturating_sub(kept.len());
        kept.extend_from_slice(&buf[..n.min(room)]);
        for line in String::from_utf8_lossy(&buf[..n]).lines() {
            tracing::debug!(tool = %tool, "stderr: {line}");
        }
    }

    String::from_utf8_lossy(&kept).trim().to_string()
}
