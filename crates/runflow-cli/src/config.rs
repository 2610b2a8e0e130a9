//! Configuration for the runflow CLI.
//!
//! Loads ${RUNFLOW_HOME}/config.toml with sensible defaults. The engine
//! itself never reads configuration; whatever is resolved here is handed
//! to it as plain values.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub mod paths {
    //! Path resolution for runflow configuration and data directories.
    //!
    //! RUNFLOW_HOME resolution order:
    //! 1. RUNFLOW_HOME environment variable (if set)
    //! 2. ~/.runflow (default)

    use std::path::PathBuf;

    /// Returns the runflow home directory.
    ///
    /// Checks RUNFLOW_HOME env var first, falls back to ~/.runflow
    pub fn runflow_home() -> PathBuf {
        if let Ok(home) = std::env::var("RUNFLOW_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .map(|h| h.join(".runflow"))
            .expect("Could not determine home directory")
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        runflow_home().join("config.toml")
    }

    /// Returns the path to the runs directory.
    pub fn runs_dir() -> PathBuf {
        runflow_home().join("runs")
    }
}

/// Process backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSection {
    /// Program spawned per run.
    pub program: Option<String>,
    /// Arguments passed to the program.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Command line run by `check-auth` (exit 0 means authenticated).
    pub auth_probe: Option<Vec<String>>,
    /// Per-line read deadline in milliseconds.
    pub line_timeout_ms: Option<u64>,
    /// Cap on concurrently spawned backend processes.
    pub max_concurrent: Option<usize>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The model requested for new runs
    pub model: String,

    /// Sampling temperature for new runs
    pub temperature: f64,

    /// Maximum tokens to generate per run
    pub max_tokens: u32,

    /// Backend used when no flag is given ("mock" or "process")
    pub backend: String,

    /// Process backend configuration.
    #[serde(default)]
    pub process: ProcessSection,
}

impl Config {
    const DEFAULT_MODEL: &str = "gemini-2.5-flash";
    const DEFAULT_TEMPERATURE: f64 = 1.0;
    const DEFAULT_MAX_TOKENS: u32 = 1024;
    const DEFAULT_BACKEND: &str = "mock";

    /// Loads configuration from the default config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: Self::DEFAULT_MODEL.to_string(),
            temperature: Self::DEFAULT_TEMPERATURE,
            max_tokens: Self::DEFAULT_MAX_TOKENS,
            backend: Self::DEFAULT_BACKEND.to_string(),
            process: ProcessSection::default(),
        }
    }
}
