//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;

use crate::config::Config;
use crate::interrupt;
use crate::logging;

mod commands;

#[derive(Parser)]
#[command(name = "runflow")]
#[command(version)]
#[command(about = "Run execution and streaming engine for model-generated text")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Common backend selection arguments.
#[derive(clap::Args, Debug, Clone, Default)]
struct BackendArgs {
    /// Backend to use (mock or process)
    #[arg(long, value_name = "KIND")]
    backend: Option<String>,

    /// Program spawned by the process backend
    #[arg(long, value_name = "PATH")]
    program: Option<String>,

    /// Extra argument for the program (repeatable)
    #[arg(long = "arg", value_name = "ARG")]
    args: Vec<String>,

    /// Auth probe command line for the process backend
    #[arg(long, value_name = "CMD")]
    auth_probe: Option<String>,

    /// Per-line read deadline in milliseconds for the process backend
    #[arg(long, value_name = "MS")]
    line_timeout_ms: Option<u64>,
}

impl<'a> From<&'a BackendArgs> for commands::run::BackendOptions<'a> {
    fn from(args: &'a BackendArgs) -> Self {
        commands::run::BackendOptions {
            backend: args.backend.as_deref(),
            program: args.program.as_deref(),
            args: &args.args,
            auth_probe: args.auth_probe.as_deref(),
            line_timeout_ms: args.line_timeout_ms,
        }
    }
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Executes a run and streams its output
    Run {
        /// The prompt to run (reads piped stdin when omitted)
        #[arg(short, long)]
        prompt: Option<String>,

        /// Prompt identifier recorded on the run
        #[arg(long, value_name = "ID", default_value = "adhoc")]
        prompt_id: String,

        /// Override the model from config
        #[arg(short, long)]
        model: Option<String>,

        /// Sampling temperature (0 to 2)
        #[arg(long)]
        temperature: Option<f64>,

        /// Maximum tokens to generate
        #[arg(long)]
        max_tokens: Option<u32>,

        #[command(flatten)]
        backend: BackendArgs,

        /// Do not persist the run record
        #[arg(long)]
        no_store: bool,

        /// Emit one JSON frame per line instead of raw text
        #[arg(long)]
        json: bool,
    },

    /// Probes backend authentication
    CheckAuth {
        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Manage persisted runs
    Runs {
        #[command(subcommand)]
        command: RunsCommands,
    },
}

#[derive(clap::Subcommand)]
enum RunsCommands {
    /// Lists persisted runs
    List,
    /// Shows a specific run
    Show {
        /// The ID of the run to show
        #[arg(value_name = "RUN_ID")]
        id: String,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    logging::init();
    interrupt::init();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = Config::load().context("load config")?;

    match cli.command {
        Commands::Run {
            prompt,
            prompt_id,
            model,
            temperature,
            max_tokens,
            backend,
            no_store,
            json,
        } => {
            let prompt = commands::run::resolve_prompt(prompt)?;
            commands::run::run(commands::run::RunCmdOptions {
                config: &config,
                prompt: &prompt,
                prompt_id: &prompt_id,
                model_override: model.as_deref(),
                temperature_override: temperature,
                max_tokens_override: max_tokens,
                backend: (&backend).into(),
                no_store,
                json,
            })
            .await
        }
        Commands::CheckAuth { backend } => commands::check_auth::run(&config, (&backend).into()).await,
        Commands::Runs { command } => match command {
            RunsCommands::List => commands::runs::list().await,
            RunsCommands::Show { id } => commands::runs::show(&id).await,
        },
    }
}
