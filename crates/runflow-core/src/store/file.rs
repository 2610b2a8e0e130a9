//! File-backed run store: one JSON document per run.

use std::path::PathBuf;

use anyhow::{Context, Result};
use runflow_types::run::Run;
use tokio::fs;
use tracing::warn;

use crate::store::{RunStore, StoreFuture};

/// Stores each run as `<dir>/<run id>.json`.
///
/// Writes go through a temp file plus rename so a crash mid-checkpoint
/// never leaves a half-written record behind.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn run_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn write_record(&self, run: &Run) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create runs directory {}", self.dir.display()))?;

        let json = serde_json::to_string_pretty(run)
            .with_context(|| format!("serialize run {}", run.id))?;
        let path = self.run_path(&run.id);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json)
            .await
            .with_context(|| format!("write run record {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("rename {} to {}", tmp_path.display(), path.display()))?;
        Ok(())
    }
}

impl RunStore for FileStore {
    fn checkpoint<'a>(&'a self, run: &'a Run) -> StoreFuture<'a, ()> {
        Box::pin(self.write_record(run))
    }

    fn load<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Run>> {
        Box::pin(async move {
            // Run ids are UUIDs; anything path-like is not one of ours.
            if id.contains(['/', '\\']) || id.contains("..") {
                return Ok(None);
            }
            let path = self.run_path(id);
            let contents = match fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("read run record {}", path.display()));
                }
            };
            let run = serde_json::from_str(&contents)
                .with_context(|| format!("parse run record {}", path.display()))?;
            Ok(Some(run))
        })
    }

    fn list(&self) -> StoreFuture<'_, Vec<Run>> {
        Box::pin(async move {
            let mut entries = match fs::read_dir(&self.dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(Vec::new());
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("read runs directory {}", self.dir.display()));
                }
            };

            let mut runs = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .with_context(|| format!("read runs directory {}", self.dir.display()))?
            {
                let path = entry.path();
                if path.extension().and_then(std::ffi::OsStr::to_str) != Some("json") {
                    continue;
                }
                let contents = match fs::read_to_string(&path).await {
                    Ok(contents) => contents,
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping unreadable run record");
                        continue;
                    }
                };
                match serde_json::from_str::<Run>(&contents) {
                    Ok(run) => runs.push(run),
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping corrupt run record");
                    }
                }
            }

            runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(runs)
        })
    }
}

#[cfg(test)]
mod tests {
    use runflow_types::run::{RunSettings, RunStatus};
    use tempfile::tempdir;

    use super::*;

    fn pending_run() -> Run {
        Run::new("prompt-1", "mock-model", RunSettings::default())
    }

    #[tokio::test]
    async fn test_checkpoint_creates_directory_and_record() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("runs"));
        let run = pending_run();

        store.checkpoint(&run).await.unwrap();

        let path = dir.path().join("runs").join(format!("{}.json", run.id));
        assert!(path.exists());
        let loaded = store.load(&run.id).await.unwrap().unwrap();
        assert_eq!(loaded, run);
    }

    #[tokio::test]
    async fn test_checkpoint_replaces_previous_record() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let mut run = pending_run();
        store.checkpoint(&run).await.unwrap();

        run.status = RunStatus::Failed;
        run.error = Some("backend exploded".to_string());
        store.checkpoint(&run).await.unwrap();

        let loaded = store.load(&run.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("backend exploded"));
    }

    #[tokio::test]
    async fn test_load_missing_id_is_none() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_path_like_ids_are_not_loaded() {
        let dir = tempdir().unwrap();
        let outside = dir.path().join("outside.json");
        std::fs::write(&outside, "{}").unwrap();

        let store = FileStore::new(dir.path().join("runs"));
        assert!(store.load("../outside").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("never-created"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_records() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let run = pending_run();
        store.checkpoint(&run).await.unwrap();
        std::fs::write(dir.path().join("broken.json"), "not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, run.id);
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let mut ids = Vec::new();
        for day in ["03", "01", "02"] {
            let mut run = pending_run();
            run.created_at = format!("2026-01-{day}T00:00:00+00:00");
            store.checkpoint(&run).await.unwrap();
            ids.push((day, run.id));
        }

        let listed = store.list().await.unwrap();
        let order: Vec<&str> = listed.iter().map(|r| r.id.as_str()).collect();
        let by_day = |day: &str| {
            ids.iter()
                .find(|(d, _)| *d == day)
                .map(|(_, id)| id.as_str())
                .unwrap()
        };
        assert_eq!(order, vec![by_day("03"), by_day("02"), by_day("01")]);
    }
}
