//! Run executor: drives runs to a terminal status.
//!
//! One `start` call owns a run from `Pending` to `Completed`, `Failed` or
//! `Cancelled`. The executor authenticates the backend, consumes its wire
//! stream, enforces event ordering, publishes token events through the
//! router, and checkpoints the record at state transitions. Cancellation
//! is per run via a token registered in the active map; there is no
//! process-wide mutable state.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::StreamExt;
use runflow_types::event::TokenEvent;
use runflow_types::run::{Run, RunStatus};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backends::shared::{BackendEvent, BackendStream, RunError};
use crate::backends::{Backend, ChatRequest};
use crate::core::sink::EventRouter;
use crate::store::RunStore;

/// How a consumed stream ended.
enum StreamEnd {
    Completed { content: String },
    Failed(RunError),
    Cancelled,
}

pub struct RunExecutor {
    store: Arc<dyn RunStore>,
    router: Arc<EventRouter>,
    active: Mutex<HashMap<String, CancellationToken>>,
}

impl RunExecutor {
    pub fn new(store: Arc<dyn RunStore>, router: Arc<EventRouter>) -> Self {
        Self {
            store,
            router,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Router used for subscribing to this executor's runs.
    pub fn router(&self) -> Arc<EventRouter> {
        Arc::clone(&self.router)
    }

    /// Drives one pending run to a terminal status and returns the final
    /// record. Backend failures are reported inside the record (`Failed`
    /// status plus error description), not as an `Err`; `Err` is reserved
    /// for glue problems such as persistence failures or a run that is
    /// not startable.
    ///
    /// # Errors
    /// Returns an error when the run is not pending, is already active,
    /// or a checkpoint cannot be persisted.
    pub async fn start(
        &self,
        run: Run,
        input: impl Into<String>,
        backend: Arc<dyn Backend>,
    ) -> Result<Run> {
        if run.status != RunStatus::Pending {
            anyhow::bail!("run {} is not pending (status: {})", run.id, run.status);
        }

        let cancel = CancellationToken::new();
        {
            let mut active = self.active.lock().await;
            if active.contains_key(&run.id) {
                anyhow::bail!("run {} is already active", run.id);
            }
            active.insert(run.id.clone(), cancel.clone());
        }

        let run_id = run.id.clone();
        let outcome = self.drive(run, input.into(), backend, &cancel).await;

        self.active.lock().await.remove(&run_id);
        self.router.close_run(&run_id).await;

        outcome
    }

    /// Requests cancellation of an active run.
    ///
    /// Idempotent: cancelling a run that already reached a terminal
    /// status is a no-op.
    ///
    /// # Errors
    /// Returns an error for unknown run ids or runs that are neither
    /// active nor terminal.
    pub async fn cancel(&self, run_id: &str) -> Result<()> {
        if let Some(token) = self.active.lock().await.get(run_id) {
            token.cancel();
            debug!(run = run_id, "cancellation requested");
            return Ok(());
        }

        match self.store.load(run_id).await? {
            Some(run) if run.is_terminal() => Ok(()),
            Some(run) => anyhow::bail!("run {run_id} is {} but not active", run.status),
            None => anyhow::bail!("run {run_id} not found"),
        }
    }

    async fn drive(
        &self,
        mut run: Run,
        input: String,
        backend: Arc<dyn Backend>,
        cancel: &CancellationToken,
    ) -> Result<Run> {
        run.status = RunStatus::Running;
        self.store
            .checkpoint(&run)
            .await
            .context("persist running state")?;
        info!(run = %run.id, model = %run.model, "run started");

        // Auth gates the stream; on failure nothing is ever streamed.
        let auth = tokio::select! {
            biased;
            () = cancel.cancelled() => return self.finish_cancelled(run).await,
            result = backend.check_auth() => result,
        };
        if let Err(err) = auth {
            return self.finish_failed(run, err).await;
        }

        let request = ChatRequest {
            run_id: run.id.clone(),
            model: run.model.clone(),
            input,
            settings: run.settings.clone(),
        };
        let stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return self.finish_cancelled(run).await,
            result = backend.stream_chat(request) => match result {
                Ok(stream) => stream,
                Err(err) => return self.finish_failed(run, err).await,
            },
        };

        match self.consume(&mut run, stream, cancel).await {
            StreamEnd::Completed { content } => self.finish_completed(run, content).await,
            StreamEnd::Failed(err) => self.finish_failed(run, err).await,
            StreamEnd::Cancelled => self.finish_cancelled(run).await,
        }
    }

    /// Consumes the wire stream, enforcing ordering rules and forwarding
    /// token events. Cancellation wins over a ready event on every poll.
    async fn consume(
        &self,
        run: &mut Run,
        mut stream: BackendStream,
        cancel: &CancellationToken,
    ) -> StreamEnd {
        let mut last_index: Option<u64> = None;
        let mut final_content: Option<String> = None;

        loop {
            let item = tokio::select! {
                biased;
                () = cancel.cancelled() => return StreamEnd::Cancelled,
                item = stream.next() => item,
            };

            let event = match item {
                Some(Ok(event)) => event,
                Some(Err(err)) => {
                    return if err.is_cancelled() {
                        StreamEnd::Cancelled
                    } else {
                        StreamEnd::Failed(err)
                    };
                }
                None => {
                    return match final_content.take() {
                        Some(content) => StreamEnd::Completed { content },
                        None => StreamEnd::Failed(RunError::protocol(
                            "stream ended without a final event",
                        )),
                    };
                }
            };

            match event {
                BackendEvent::Meta { model, usage } => {
                    debug!(run = %run.id, model = %model, tokens = usage.tokens, "backend meta");
                }
                BackendEvent::Progress { percent } => {
                    debug!(run = %run.id, percent, "backend progress");
                }
                BackendEvent::Token {
                    data,
                    chunk_index,
                    is_final,
                } => {
                    if final_content.is_some() {
                        return StreamEnd::Failed(RunError::protocol(format!(
                            "token event after final (chunk_index {chunk_index})"
                        )));
                    }
                    if is_final {
                        // Finality is carried by the final record, never
                        // by a token record.
                        return StreamEnd::Failed(RunError::protocol(format!(
                            "token record claims finality (chunk_index {chunk_index})"
                        )));
                    }
                    let ordered = match last_index {
                        None => chunk_index == 0,
                        Some(prev) => chunk_index > prev,
                    };
                    if !ordered {
                        return StreamEnd::Failed(RunError::protocol(match last_index {
                            None => format!("first chunk_index must be 0, got {chunk_index}"),
                            Some(prev) => format!(
                                "chunk_index {chunk_index} did not increase (previous {prev})"
                            ),
                        }));
                    }
                    last_index = Some(chunk_index);
                    run.transcript.push_str(&data);
                    self.router
                        .publish_token(TokenEvent {
                            run_id: run.id.clone(),
                            chunk_index,
                            data,
                            is_final: false,
                        })
                        .await;
                }
                BackendEvent::Final { content, metrics } => {
                    if final_content.is_some() {
                        return StreamEnd::Failed(RunError::protocol("duplicate final event"));
                    }
                    if !metrics.is_empty() {
                        debug!(run = %run.id, metrics = ?metrics, "backend final metrics");
                    }
                    let chunk_index = match last_index {
                        None => 0,
                        Some(prev) => match prev.checked_add(1) {
                            Some(next) => next,
                            // A token at u64::MAX leaves no index for the
                            // final event.
                            None => {
                                return StreamEnd::Failed(RunError::protocol(format!(
                                    "no chunk_index left for the final event (previous {prev})"
                                )));
                            }
                        },
                    };
                    last_index = Some(chunk_index);
                    run.transcript.push_str(&content);
                    self.router
                        .publish_token(TokenEvent {
                            run_id: run.id.clone(),
                            chunk_index,
                            data: content.clone(),
                            is_final: true,
                        })
                        .await;
                    final_content = Some(content);
                }
                BackendEvent::Error { message } => {
                    return StreamEnd::Failed(RunError::backend(message));
                }
            }
        }
    }

    async fn finish_completed(&self, mut run: Run, content: String) -> Result<Run> {
        run.status = RunStatus::Completed;
        run.final_content = Some(content);
        run.finished_at = Some(Utc::now().to_rfc3339());
        self.store
            .checkpoint(&run)
            .await
            .context("persist completed run")?;
        info!(run = %run.id, "run completed");
        Ok(run)
    }

    async fn finish_failed(&self, mut run: Run, error: RunError) -> Result<Run> {
        if error.is_cancelled() {
            return self.finish_cancelled(run).await;
        }
        self.router.publish_error(&run.id, error.describe()).await;
        run.status = RunStatus::Failed;
        run.error = Some(error.describe());
        run.finished_at = Some(Utc::now().to_rfc3339());
        self.store
            .checkpoint(&run)
            .await
            .context("persist failed run")?;
        warn!(run = %run.id, kind = %error.kind, error = %error, "run failed");
        Ok(run)
    }

    /// Cancellation keeps the partial transcript; final content stays
    /// empty.
    async fn finish_cancelled(&self, mut run: Run) -> Result<Run> {
        run.status = RunStatus::Cancelled;
        run.finished_at = Some(Utc::now().to_rfc3339());
        self.store
            .checkpoint(&run)
            .await
            .context("persist cancelled run")?;
        info!(run = %run.id, "run cancelled");
        Ok(run)
    }
}
