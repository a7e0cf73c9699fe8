use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const STALE_AFTER_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Deleting,
    Indexing,
}

/// Resumable progress marker for an in-flight indexing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub processed_files: BTreeSet<String>,
    pub total_files: usize,
    pub phase: Phase,
    pub timestamp_ms: u64,
}

impl Checkpoint {
    #[must_use]
    pub fn new(total_files: usize, phase: Phase) -> Self {
        Self {
            processed_files: BTreeSet::new(),
            total_files,
            phase,
            timestamp_ms: now_ms(),
        }
    }

    /// Files not yet marked processed, preserving input order.
    #[must_use]
    pub fn filter_pending<'a>(&self, files: &'a [String]) -> Vec<&'a String> {
        files
            .iter()
            .filter(|f| !self.processed_files.contains(*f))
            .collect()
    }

    fn is_stale(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.timestamp_ms) > STALE_AFTER_MS
    }
}

/// Thin atomic-write wrapper over a `<collection>.checkpoint.json` sibling
/// file.
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        let tmp = tmp_path(&self.path);
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// `Ok(None)` if absent, malformed, or stale (>24h) -- malformed/stale
    /// checkpoints are deleted as a side effect.
    pub async fn load(&self) -> Result<Option<Checkpoint>> {
        if !self.path.is_file() {
            return Ok(None);
        }

        let bytes = tokio::fs::read(&self.path).await?;
        let parsed: std::result::Result<Checkpoint, _> = serde_json::from_slice(&bytes);

        match parsed {
            Ok(checkpoint) if !checkpoint.is_stale(now_ms()) => Ok(Some(checkpoint)),
            _ => {
                let _ = tokio::fs::remove_file(&self.path).await;
                Ok(None)
            }
        }
    }

    pub async fn clear(&self) -> Result<()> {
        if self.path.is_file() {
            tokio::fs::remove_file(&self.path).await?;
        }
        Ok(())
    }
}

/// Path of the checkpoint sibling file for a given snapshot/store path.
#[must_use]
pub fn checkpoint_path_for(store_path: &Path, collection: &str) -> PathBuf {
    store_path.join(format!("{collection}.checkpoint.json"))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
