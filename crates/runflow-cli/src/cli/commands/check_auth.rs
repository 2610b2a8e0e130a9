//! Check-auth command handler.

use anyhow::Result;

use super::run::{BackendOptions, build_backend};
use crate::config::Config;

/// Probes the selected backend's credentials without starting a run.
pub async fn run(config: &Config, options: BackendOptions<'_>) -> Result<()> {
    let backend = build_backend(config, &options)?;

    match backend.check_auth().await {
        Ok(()) => {
            println!("Authentication OK.");
            Ok(())
        }
        Err(error) => anyhow::bail!("authentication failed: {}", error.describe()),
    }
}
