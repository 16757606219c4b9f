//! # State Store
//!
//! Durable storage for application specs, their last status and the Sync Run
//! history. Diff results are recomputed every tick and never stored.
//!
//! - [`MemoryStore`]: process-local, used when `STATE_DIR` is unset
//! - [`FileStore`]: one directory per application under `STATE_DIR`
//!
//! ```text
//! <STATE_DIR>/<application>/application.json   spec, paused flag, last status
//! <STATE_DIR>/<application>/history.jsonl      one Sync Run per line, oldest first
//! ```

use crate::crd::{ApplicationSpec, ApplicationStatus, SyncRun};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::warn;

/// Persisted form of one application
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRecord {
    pub name: String,
    pub spec: ApplicationSpec,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub status: Option<ApplicationStatus>,
}

#[async_trait]
pub trait StateStore: Send + Sync + fmt::Debug {
    async fn save_application(&self, record: &ApplicationRecord) -> Result<()>;

    /// Remove the application and its history; removing an unknown application succeeds
    async fn delete_application(&self, name: &str) -> Result<()>;

    async fn load_applications(&self) -> Result<Vec<ApplicationRecord>>;

    /// Append a run, keeping at most `limit` runs (oldest dropped first)
    async fn append_run(&self, name: &str, run: &SyncRun, limit: usize) -> Result<()>;

    /// History oldest first
    async fn load_history(&self, name: &str) -> Result<Vec<SyncRun>>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    applications: RwLock<BTreeMap<String, ApplicationRecord>>,
    history: RwLock<BTreeMap<String, VecDeque<SyncRun>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn save_application(&self, record: &ApplicationRecord) -> Result<()> {
        self.applications
            .write()
            .await
            .insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn delete_application(&self, name: &str) -> Result<()> {
        self.applications.write().await.remove(name);
        self.history.write().await.remove(name);
        Ok(())
    }

    async fn load_applications(&self) -> Result<Vec<ApplicationRecord>> {
        Ok(self.applications.read().await.values().cloned().collect())
    }

    async fn append_run(&self, name: &str, run: &SyncRun, limit: usize) -> Result<()> {
        let mut history = self.history.write().await;
        let runs = history.entry(name.to_string()).or_default();
        runs.push_back(run.clone());
        while runs.len() > limit {
            runs.pop_front();
        }
        Ok(())
    }

    async fn load_history(&self, name: &str) -> Result<Vec<SyncRun>> {
        Ok(self
            .history
            .read()
            .await
            .get(name)
            .map(|runs| runs.iter().cloned().collect())
            .unwrap_or_default())
    }
}

const APPLICATION_FILE: &str = "application.json";
const HISTORY_FILE: &str = "history.jsonl";

/// File-backed store; writes are serialized through an internal lock
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create state directory {}", root.display()))?;
        Ok(Self {
            root,
            lock: tokio::sync::Mutex::new(()),
        })
    }

    fn app_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    async fn read_history(&self, name: &str) -> Result<Vec<SyncRun>> {
        let path = self.app_dir(name).join(HISTORY_FILE);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        let mut runs = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SyncRun>(line) {
                Ok(run) => runs.push(run),
                Err(e) => warn!(
                    "Skipping unreadable sync run at {}:{}: {}",
                    path.display(),
                    index + 1,
                    e
                ),
            }
        }
        Ok(runs)
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn save_application(&self, record: &ApplicationRecord) -> Result<()> {
        let _guard = self.lock.lock().await;
        let dir = self.app_dir(&record.name);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let json = serde_json::to_vec_pretty(record).context("Failed to serialize application")?;
        Self::write_atomic(&dir.join(APPLICATION_FILE), &json).await
    }

    async fn delete_application(&self, name: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let dir = self.app_dir(name);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", dir.display())),
        }
    }

    async fn load_applications(&self) -> Result<Vec<ApplicationRecord>> {
        let _guard = self.lock.lock().await;
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Failed to list {}", self.root.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path().join(APPLICATION_FILE);
            let contents = match tokio::fs::read(&path).await {
                Ok(contents) => contents,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to read {}", path.display()))
                }
            };
            let record: ApplicationRecord = serde_json::from_slice(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            records.push(record);
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn append_run(&self, name: &str, run: &SyncRun, limit: usize) -> Result<()> {
        let _guard = self.lock.lock().await;
        let dir = self.app_dir(name);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let mut runs = self.read_history(name).await?;
        runs.push(run.clone());
        let skip = runs.len().saturating_sub(limit);

        let mut contents = String::new();
        for kept in &runs[skip..] {
            contents.push_str(&serde_json::to_string(kept).context("Failed to serialize sync run")?);
            contents.push('\n');
        }
        Self::write_atomic(&dir.join(HISTORY_FILE), contents.as_bytes()).await
    }

    async fn load_history(&self, name: &str) -> Result<Vec<SyncRun>> {
        let _guard = self.lock.lock().await;
        self.read_history(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Destination, SourceRef, SyncOutcome, SyncPolicy, SyncState, TriggerSource};

    fn record(name: &str) -> ApplicationRecord {
        ApplicationRecord {
            name: name.to_string(),
            spec: ApplicationSpec {
                source: SourceRef {
                    repo_url: "/srv/checkout".to_string(),
                    path: "apps/demo".to_string(),
                    target_revision: None,
                },
                destination: Destination {
                    cluster: crate::crd::IN_CLUSTER.to_string(),
                    namespace: "demo".to_string(),
                },
                environment: "dev".to_string(),
                sync_policy: SyncPolicy::automated(),
                reconcile_interval: None,
                secret_refresh_interval: None,
                suspend: false,
                cascade_delete: false,
            },
            paused: false,
            status: None,
        }
    }

    fn run(id: &str) -> SyncRun {
        SyncRun {
            id: id.to_string(),
            trigger: TriggerSource::Timer,
            started_at: "2026-01-01T00:00:00Z".to_string(),
            finished_at: "2026-01-01T00:00:01Z".to_string(),
            desired_revision: None,
            diff_summary: None,
            policy: SyncPolicy::manual(),
            state: SyncState::Synced,
            outcome: SyncOutcome::Synced,
            apply_errors: Vec::new(),
            blocked: Vec::new(),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_memory_store_caps_history() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.append_run("demo", &run(&i.to_string()), 3).await.unwrap();
        }
        let ids: Vec<String> = store
            .load_history("demo")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_file_store_round_trips_records_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        store.save_application(&record("beta")).await.unwrap();
        store.save_application(&record("alpha")).await.unwrap();
        for i in 0..4 {
            store.append_run("alpha", &run(&i.to_string()), 2).await.unwrap();
        }

        // A fresh handle sees what the first one wrote
        let reopened = FileStore::open(dir.path()).await.unwrap();
        let names: Vec<String> = reopened
            .load_applications()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        let history = reopened.load_history("alpha").await.unwrap();
        assert_eq!(history.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["2", "3"]);

        reopened.delete_application("alpha").await.unwrap();
        assert!(reopened.load_history("alpha").await.unwrap().is_empty());
        assert_eq!(reopened.load_applications().await.unwrap().len(), 1);
        // Deleting twice is fine
        reopened.delete_application("alpha").await.unwrap();
    }
}
