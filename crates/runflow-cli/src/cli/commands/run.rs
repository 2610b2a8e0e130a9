//! Run command handler.
//!
//! Wires one run end to end: resolve settings, pick a backend, subscribe
//! a renderer, start the executor, and map the terminal status to an exit
//! outcome. Ctrl+C is forwarded to the executor as a cancel request.

use std::io::{IsTerminal, Read};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use runflow_core::backends::{Backend, BackendKind, MockBackend, ProcessBackend, ProcessConfig};
use runflow_core::core::executor::RunExecutor;
use runflow_core::core::sink::EventRouter;
use runflow_core::store::{FileStore, MemoryStore, RunStore};
use runflow_types::run::{Run, RunSettings, RunStatus};
use tracing::debug;

use crate::config::{Config, paths};
use crate::interrupt;
use crate::render;

/// Backend selection shared by `run` and `check-auth`.
pub struct BackendOptions<'a> {
    pub backend: Option<&'a str>,
    pub program: Option<&'a str>,
    pub args: &'a [String],
    pub auth_probe: Option<&'a str>,
    pub line_timeout_ms: Option<u64>,
}

pub struct RunCmdOptions<'a> {
    pub config: &'a Config,
    pub prompt: &'a str,
    pub prompt_id: &'a str,
    pub model_override: Option<&'a str>,
    pub temperature_override: Option<f64>,
    pub max_tokens_override: Option<u32>,
    pub backend: BackendOptions<'a>,
    pub no_store: bool,
    pub json: bool,
}

pub async fn run(options: RunCmdOptions<'_>) -> Result<()> {
    let model = options.model_override.unwrap_or(&options.config.model);
    let temperature = options
        .temperature_override
        .unwrap_or(options.config.temperature);
    let max_tokens = options
        .max_tokens_override
        .unwrap_or(options.config.max_tokens);
    let settings = RunSettings::new(temperature, max_tokens).map_err(anyhow::Error::msg)?;

    let backend = build_backend(options.config, &options.backend)?;
    let store: Arc<dyn RunStore> = if options.no_store {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(FileStore::new(paths::runs_dir()))
    };
    let executor = Arc::new(RunExecutor::new(store, Arc::new(EventRouter::new())));

    let run = Run::new(options.prompt_id, model, settings);
    let run_id = run.id.clone();

    // Subscribe before starting so the first token cannot be missed.
    let subscription = executor.router().subscribe(&run_id).await;
    let renderer = tokio::spawn(render::render_events(subscription, options.json));

    let canceller = {
        let executor = Arc::clone(&executor);
        let run_id = run_id.clone();
        tokio::spawn(async move {
            interrupt::wait_for_interrupt().await;
            debug!(run = %run_id, "interrupt received; requesting cancellation");
            // The run may not be registered yet when Ctrl+C lands; retry
            // until the cancel request finds it.
            loop {
                if executor.cancel(&run_id).await.is_ok() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
    };

    let finished = executor
        .start(run, options.prompt, backend)
        .await
        .context("execute run")?;

    let mut renderer = renderer.await.context("join render task")?;
    renderer.finish();
    canceller.abort();

    match finished.status {
        RunStatus::Completed => {
            eprintln!("Run {} completed.", finished.id);
            Ok(())
        }
        RunStatus::Cancelled => {
            eprintln!("Run {} cancelled.", finished.id);
            Err(interrupt::InterruptedError.into())
        }
        RunStatus::Failed => {
            let description = finished.error.as_deref().unwrap_or("unknown error");
            anyhow::bail!("run {} failed: {}", finished.id, description)
        }
        RunStatus::Pending | RunStatus::Running => {
            anyhow::bail!(
                "run {} ended in non-terminal status {}",
                finished.id,
                finished.status
            )
        }
    }
}

/// Resolves the prompt from the flag or piped stdin.
pub fn resolve_prompt(flag: Option<String>) -> Result<String> {
    if let Some(prompt) = flag {
        return Ok(prompt);
    }

    if !std::io::stdin().is_terminal() {
        let mut prompt = String::new();
        std::io::stdin()
            .lock()
            .read_to_string(&mut prompt)
            .context("read prompt from stdin")?;
        let prompt = prompt.trim().to_string();
        if prompt.is_empty() {
            anyhow::bail!("No input provided via pipe");
        }
        return Ok(prompt);
    }

    anyhow::bail!("--prompt is required (or pipe the prompt via stdin)")
}

/// Builds the backend selected by flags, falling back to config values.
pub fn build_backend(config: &Config, options: &BackendOptions<'_>) -> Result<Arc<dyn Backend>> {
    let kind_id = options.backend.unwrap_or(&config.backend);
    let Some(kind) = BackendKind::from_id(kind_id) else {
        let valid: Vec<&str> = BackendKind::all().iter().map(|k| k.id()).collect();
        anyhow::bail!(
            "Unknown backend '{}'. Valid options: {}",
            kind_id,
            valid.join(", ")
        );
    };

    match kind {
        BackendKind::Mock => Ok(Arc::new(MockBackend::new())),
        BackendKind::Process => {
            let program = options
                .program
                .or_else(|| config.process.program.as_deref())
                .context("--program is required for the process backend")?;

            let mut process_config = ProcessConfig::new(program);
            process_config.args = if options.args.is_empty() {
                config.process.args.clone()
            } else {
                options.args.to_vec()
            };
            process_config.auth_probe = match options.auth_probe {
                Some(raw) => Some(split_command_line(raw)?),
                None => config.process.auth_probe.clone(),
            };
            if let Some(ms) = options.line_timeout_ms.or(config.process.line_timeout_ms) {
                process_config.line_timeout = Duration::from_millis(ms);
            }
            if let Some(limit) = config.process.max_concurrent {
                process_config.max_concurrent = limit;
            }

            Ok(Arc::new(ProcessBackend::new(process_config)))
        }
    }
}

fn split_command_line(raw: &str) -> Result<Vec<String>> {
    let parts: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    if parts.is_empty() {
        anyhow::bail!("--auth-probe requires a command line");
    }
    Ok(parts)
}
