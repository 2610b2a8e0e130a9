//! Run persistence: checkpoint and query run records.
//!
//! This module contains:
//! - `file`: one JSON document per run under a runs directory
//!
//! `MemoryStore` lives here for tests and unpersisted sessions.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use runflow_types::run::Run;
use tokio::sync::Mutex;

pub mod file;

pub use file::FileStore;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Persistence seam for run records.
///
/// The executor checkpoints the whole record at every status
/// transition, so implementations replace records rather than patch
/// fields.
pub trait RunStore: Send + Sync {
    /// Persists the current state of a run, replacing any prior record.
    fn checkpoint<'a>(&'a self, run: &'a Run) -> StoreFuture<'a, ()>;

    /// Loads a run by id. Returns `None` for unknown ids.
    fn load<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Run>>;

    /// Lists all known runs, newest first.
    fn list(&self) -> StoreFuture<'_, Vec<Run>>;
}

/// In-memory store backed by a map.
#[derive(Default)]
pub struct MemoryStore {
    runs: Mutex<HashMap<String, Run>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for MemoryStore {
    fn checkpoint<'a>(&'a self, run: &'a Run) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.runs.lock().await.insert(run.id.clone(), run.clone());
            Ok(())
        })
    }

    fn load<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Run>> {
        Box::pin(async move { Ok(self.runs.lock().await.get(id).cloned()) })
    }

    fn list(&self) -> StoreFuture<'_, Vec<Run>> {
        Box::pin(async move {
            let mut runs: Vec<Run> = self.runs.lock().await.values().cloned().collect();
            runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(runs)
        })
    }
}

#[cfg(test)]
mod tests {
    use runflow_types::run::{RunSettings, RunStatus};

    use super::*;

    fn run_created_at(created_at: &str) -> Run {
        let mut run = Run::new("prompt-1", "mock-model", RunSettings::default());
        run.created_at = created_at.to_string();
        run
    }

    #[tokio::test]
    async fn test_checkpoint_then_load_roundtrip() {
        let store = MemoryStore::new();
        let run = Run::new("prompt-1", "mock-model", RunSettings::default());

        store.checkpoint(&run).await.unwrap();
        let loaded = store.load(&run.id).await.unwrap().unwrap();
        assert_eq!(loaded, run);
    }

    #[tokio::test]
    async fn test_load_unknown_id_is_none() {
        let store = MemoryStore::new();
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_checkpoint_replaces_previous_record() {
        let store = MemoryStore::new();
        let mut run = Run::new("prompt-1", "mock-model", RunSettings::default());
        store.checkpoint(&run).await.unwrap();

        run.status = RunStatus::Completed;
        run.final_content = Some("done".to_string());
        store.checkpoint(&run).await.unwrap();

        let loaded = store.load(&run.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert_eq!(loaded.final_content.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let store = MemoryStore::new();
        let oldest = run_created_at("2026-01-01T00:00:00+00:00");
        let middle = run_created_at("2026-01-02T00:00:00+00:00");
        let newest = run_created_at("2026-01-03T00:00:00+00:00");
        for run in [&middle, &oldest, &newest] {
            store.checkpoint(run).await.unwrap();
        }

        let listed = store.list().await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![&newest.id, &middle.id, &oldest.id]);
    }
}
