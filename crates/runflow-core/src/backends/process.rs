//! External-process backend speaking the line protocol.
//!
//! Each run spawns the configured program in its own process group and
//! parses newline-delimited JSON events from its stdout. The run request
//! is written to the child's stdin as a single JSON line. Termination of
//! the whole process group is guaranteed on every exit path: clean EOF,
//! protocol violation, read deadline, or the stream being dropped.

use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::backends::protocol;
use crate::backends::shared::{
    BackendEvent, BackendStream, RunError, RunErrorKind, RunResult, truncate_for_error,
};
use crate::backends::{Backend, BackendFuture, ChatRequest};

/// Read deadline for each stdout line.
const DEFAULT_LINE_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace between group SIGTERM and SIGKILL.
const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(300);

/// Default cap on concurrently live child processes.
const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Default spawn attempts before a run fails as unavailable.
const DEFAULT_SPAWN_ATTEMPTS: u32 = 3;

/// Initial backoff between spawn attempts; doubles per retry.
const DEFAULT_SPAWN_BACKOFF: Duration = Duration::from_millis(100);

/// Deadline for the auth probe command.
const AUTH_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the wire event channel between reader task and stream.
const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Bytes of child stderr kept for error context.
const STDERR_TAIL_LIMIT: usize = 2048;

/// Per-instance configuration for a process backend.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Program that speaks the line protocol on stdout.
    pub program: PathBuf,
    /// Fixed arguments passed on every invocation.
    pub args: Vec<String>,
    /// Auth probe command (program plus arguments). `None` means the
    /// backend is taken as externally authenticated. A zero exit status
    /// passes; anything else is an auth failure.
    pub auth_probe: Option<Vec<String>>,
    pub line_timeout: Duration,
    pub kill_grace: Duration,
    pub max_concurrent: usize,
    pub spawn_attempts: u32,
    pub spawn_backoff: Duration,
}

impl ProcessConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            auth_probe: None,
            line_timeout: DEFAULT_LINE_TIMEOUT,
            kill_grace: DEFAULT_KILL_GRACE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            spawn_attempts: DEFAULT_SPAWN_ATTEMPTS,
            spawn_backoff: DEFAULT_SPAWN_BACKOFF,
        }
    }
}

/// Request line written to the child's stdin.
#[derive(Serialize)]
struct WireRequest<'a> {
    run_id: &'a str,
    model: &'a str,
    input: &'a str,
    temperature: f64,
    max_tokens: u32,
}

pub struct ProcessBackend {
    config: ProcessConfig,
    permits: Arc<Semaphore>,
}

impl ProcessBackend {
    pub fn new(config: ProcessConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self { config, permits }
    }

    fn spawn_child(&self) -> RunResult<Child> {
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            // The child leads its own process group so that cancellation
            // reaches any descendants it spawns.
            unsafe {
                command.pre_exec(|| {
                    if libc::setpgid(0, 0) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        command.spawn().map_err(|err| {
            RunError::unavailable(format!(
                "failed to spawn backend process '{}': {err}",
                self.config.program.display()
            ))
        })
    }

    async fn spawn_with_retry(&self) -> RunResult<Child> {
        let attempts = self.config.spawn_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.spawn_child() {
                Ok(child) => {
                    if attempt > 1 {
                        debug!(attempt, "backend spawn succeeded after retry");
                    }
                    return Ok(child);
                }
                Err(err) if err.kind.is_retryable() && attempt < attempts => {
                    let delay = self.config.spawn_backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "backend spawn failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Backend for ProcessBackend {
    fn check_auth(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let Some(probe) = &self.config.auth_probe else {
                return Ok(());
            };
            let Some((program, args)) = probe.split_first() else {
                return Err(RunError::auth("auth probe command is empty"));
            };

            let output = timeout(
                AUTH_PROBE_TIMEOUT,
                Command::new(program)
                    .args(args)
                    .stdin(Stdio::null())
                    .kill_on_drop(true)
                    .output(),
            )
            .await
            .map_err(|_| RunError::auth("auth probe timed out"))?
            .map_err(|err| RunError::auth(format!("auth probe failed to start: {err}")))?;

            if output.status.success() {
                return Ok(());
            }

            let message = format!("auth probe exited with {}", output.status);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            if stderr.is_empty() {
                Err(RunError::auth(message))
            } else {
                Err(RunError::with_details(
                    RunErrorKind::Auth,
                    message,
                    truncate_for_error(stderr, STDERR_TAIL_LIMIT),
                ))
            }
        })
    }

    fn stream_chat(&self, request: ChatRequest) -> BackendFuture<'_, BackendStream> {
        Box::pin(async move {
            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|_| RunError::unavailable("backend is shutting down"))?;

            let mut child = self.spawn_with_retry().await?;

            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| RunError::unavailable("backend stdout was not captured"))?;
            let stderr = child.stderr.take();
            let stdin = child.stdin.take();

            let guard = ProcessGroupGuard::new(child, self.config.kill_grace);

            if let Some(mut stdin) = stdin {
                match serde_json::to_string(&WireRequest {
                    run_id: &request.run_id,
                    model: &request.model,
                    input: &request.input,
                    temperature: request.settings.temperature,
                    max_tokens: request.settings.max_tokens,
                }) {
                    Ok(mut line) => {
                        line.push('\n');
                        // Some backends never read stdin; a broken pipe
                        // here is not an error.
                        if let Err(err) = stdin.write_all(line.as_bytes()).await {
                            debug!(error = %err, "backend did not accept request on stdin");
                        }
                    }
                    Err(err) => {
                        debug!(error = %err, "failed to encode request line");
                    }
                }
                drop(stdin);
            }

            let tail = StderrTail::spawn(stderr);
            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            tokio::spawn(read_events(
                guard,
                stdout,
                tx,
                self.config.line_timeout,
                tail,
                permit,
            ));

            Ok(EventReceiver { rx }.boxed())
        })
    }

    fn embeddings(&self, _text: String) -> BackendFuture<'_, Vec<f32>> {
        Box::pin(async {
            Err(RunError::unavailable(
                "embeddings are not supported by the process backend",
            ))
        })
    }
}

/// Reads protocol lines from the child until EOF, deadline, violation or
/// stream drop, forwarding parsed events into the channel. Owns the
/// process guard and the concurrency permit for the child's lifetime.
async fn read_events(
    mut guard: ProcessGroupGuard,
    stdout: ChildStdout,
    tx: mpsc::Sender<RunResult<BackendEvent>>,
    line_timeout: Duration,
    tail: StderrTail,
    _permit: OwnedSemaphorePermit,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let read = tokio::select! {
            biased;
            () = tx.closed() => {
                debug!("event stream dropped; terminating backend process");
                guard.terminate().await;
                return;
            }
            result = timeout(line_timeout, lines.next_line()) => result,
        };

        let line = match read {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                guard.reap().await;
                return;
            }
            Ok(Err(err)) => {
                let error = RunError::unavailable(format!("failed to read backend stdout: {err}"));
                let _ = tx.send(Err(tail.attach_to(error))).await;
                guard.terminate().await;
                return;
            }
            Err(_) => {
                let error = RunError::timeout(format!(
                    "no backend output within {}ms",
                    line_timeout.as_millis()
                ));
                let _ = tx.send(Err(tail.attach_to(error))).await;
                guard.terminate().await;
                return;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match protocol::parse_line(line) {
            Ok(event) => {
                if tx.send(Ok(event)).await.is_err() {
                    debug!("event stream dropped; terminating backend process");
                    guard.terminate().await;
                    return;
                }
            }
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                guard.terminate().await;
                return;
            }
        }
    }
}

/// Stream adapter over the reader task's channel.
struct EventReceiver {
    rx: mpsc::Receiver<RunResult<BackendEvent>>,
}

impl Stream for EventReceiver {
    type Item = RunResult<BackendEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

enum GroupSignal {
    Term,
    Kill,
}

/// Scoped handle over a spawned child and its process group.
///
/// `terminate` escalates SIGTERM to SIGKILL after the grace period. The
/// guard disarms once the child is reaped so a recycled process group id
/// is never signalled; dropping while still armed sends a group SIGKILL
/// on top of `kill_on_drop` to catch detached descendants.
struct ProcessGroupGuard {
    child: Child,
    pgid: Option<i32>,
    grace: Duration,
}

impl ProcessGroupGuard {
    fn new(child: Child, grace: Duration) -> Self {
        let pgid = child.id().and_then(|pid| i32::try_from(pid).ok());
        Self { child, pgid, grace }
    }

    /// Waits briefly for a natural exit after EOF, then escalates.
    async fn reap(&mut self) {
        match timeout(self.grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                if !status.success() {
                    debug!(%status, "backend process exited with failure");
                }
                self.disarm();
            }
            Ok(Err(err)) => {
                debug!(error = %err, "failed to reap backend process");
                self.disarm();
            }
            Err(_) => self.terminate().await,
        }
    }

    /// SIGTERM to the group, bounded wait, then SIGKILL if still alive.
    async fn terminate(&mut self) {
        self.signal_group(&GroupSignal::Term);
        if timeout(self.grace, self.child.wait()).await.is_err() {
            self.signal_group(&GroupSignal::Kill);
            let _ = self.child.kill().await;
        }
        self.disarm();
    }

    fn signal_group(&self, signal: &GroupSignal) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            let signo = match signal {
                GroupSignal::Term => libc::SIGTERM,
                GroupSignal::Kill => libc::SIGKILL,
            };
            // Negative pid addresses the whole process group.
            unsafe {
                libc::kill(-pgid, signo);
            }
        }
        #[cfg(not(unix))]
        let _ = signal;
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.signal_group(&GroupSignal::Kill);
    }
}

/// Bounded tail of the child's stderr, kept for error context.
#[derive(Clone, Default)]
struct StderrTail {
    buf: Arc<std::sync::Mutex<String>>,
}

impl StderrTail {
    fn spawn(stderr: Option<ChildStderr>) -> Self {
        let tail = Self::default();
        let Some(stderr) = stderr else {
            return tail;
        };

        let buf = Arc::clone(&tail.buf);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(line = %line, "backend stderr");
                if let Ok(mut buf) = buf.lock() {
                    if !buf.is_empty() {
                        buf.push('\n');
                    }
                    buf.push_str(&line);
                    if buf.len() > STDERR_TAIL_LIMIT {
                        let mut cut = buf.len() - STDERR_TAIL_LIMIT;
                        while cut < buf.len() && !buf.is_char_boundary(cut) {
                            cut += 1;
                        }
                        buf.drain(..cut);
                    }
                }
            }
        });
        tail
    }

    /// Adds the captured stderr tail to an error lacking details.
    fn attach_to(&self, mut error: RunError) -> RunError {
        if error.details.is_none() {
            if let Some(tail) = self.snapshot() {
                error.details = Some(tail);
            }
        }
        error
    }

    fn snapshot(&self) -> Option<String> {
        let buf = self.buf.lock().ok()?;
        let trimmed = buf.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}
