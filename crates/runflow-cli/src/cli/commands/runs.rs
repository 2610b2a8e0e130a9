//! Run record command handlers.

use anyhow::{Context, Result};
use runflow_core::store::{FileStore, RunStore};

use crate::config::paths;

pub async fn list() -> Result<()> {
    let store = FileStore::new(paths::runs_dir());
    let runs = store.list().await.context("list runs")?;
    if runs.is_empty() {
        println!("No runs found.");
    } else {
        for run in runs {
            println!("{}  {}  {}  {}", run.id, run.status, run.model, run.created_at);
        }
    }
    Ok(())
}

pub async fn show(id: &str) -> Result<()> {
    let store = FileStore::new(paths::runs_dir());
    let run = store
        .load(id)
        .await
        .with_context(|| format!("load run '{id}'"))?
        .with_context(|| format!("Run '{id}' not found"))?;

    println!("id:       {}", run.id);
    println!("prompt:   {}", run.prompt_id);
    println!("model:    {}", run.model);
    println!("status:   {}", run.status);
    println!("created:  {}", run.created_at);
    if let Some(finished_at) = &run.finished_at {
        println!("finished: {finished_at}");
    }
    println!(
        "settings: temperature={} max_tokens={}",
        run.settings.temperature, run.settings.max_tokens
    );
    if !run.transcript.is_empty() {
        println!("\ntranscript:\n{}", run.transcript);
    }
    if let Some(content) = &run.final_content {
        println!("\nfinal:\n{content}");
    }
    if let Some(error) = &run.error {
        println!("\nerror: {error}");
    }
    Ok(())
}
