//! Durable point-in-time health snapshot for the streaming indexer (§9,
//! "a supervised background task whose failure increments a counter and
//! logs, but never propagates to the indexer's result"), persisted the same
//! way the checkpoint store persists progress: write-temp, rename.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::stats::IndexStats;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub reason: String,
    pub stats: Option<IndexStats>,
    pub error: Option<String>,
    pub p95_duration_ms: Option<u64>,
    pub pending_events: Option<usize>,
    pub recorded_at_unix_ms: u64,
}

#[must_use]
pub fn health_file_path(root: &Path) -> PathBuf {
    root.join(".context-finder").join("health.json")
}

/// Recorded after a successful watcher-driven index cycle.
pub async fn write_health_snapshot(
    root: &Path,
    stats: &IndexStats,
    reason: &str,
    p95_duration_ms: Option<u64>,
    pending_events: Option<usize>,
) -> Result<()> {
    persist(
        root,
        &HealthSnapshot {
            reason: reason.to_string(),
            stats: Some(stats.clone()),
            error: None,
            p95_duration_ms,
            pending_events,
            recorded_at_unix_ms: now_ms(),
        },
    )
    .await
}

/// Recorded after a failed watcher-driven index cycle; no stats are
/// available since the run didn't finish.
pub async fn append_failure_reason(root: &Path, reason: &str, error: &str, p95_duration_ms: Option<u64>) -> Result<()> {
    persist(
        root,
        &HealthSnapshot {
            reason: reason.to_string(),
            stats: None,
            error: Some(error.to_string()),
            p95_duration_ms,
            pending_events: None,
            recorded_at_unix_ms: now_ms(),
        },
    )
    .await
}

/// `Ok(None)` if the file is absent or unparseable -- health reporting is
/// best-effort and must never block or fail indexing.
pub async fn read_health_snapshot(root: &Path) -> Result<Option<HealthSnapshot>> {
    let path = health_file_path(root);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(None);
    }
    let bytes = tokio::fs::read(&path).await?;
    Ok(serde_json::from_slice(&bytes).ok())
}

async fn persist(root: &Path, snapshot: &HealthSnapshot) -> Result<()> {
    let path = health_file_path(root);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    let mut tmp_os = path.as_os_str().to_os_string();
    tmp_os.push(".tmp");
    let tmp = PathBuf::from(tmp_os);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let tmp = TempDir::new().unwrap();
        let mut stats = IndexStats::new();
        stats.add_file("rust", 10);
        stats.finalize();

        write_health_snapshot(tmp.path(), &stats, "fs_event", Some(120), Some(0))
            .await
            .unwrap();
        let loaded = read_health_snapshot(tmp.path()).await.unwrap().unwrap();
        assert_eq!(loaded.reason, "fs_event");
        assert!(loaded.stats.is_some());
        assert!(loaded.error.is_none());
    }

    #[tokio::test]
    async fn failure_reason_has_no_stats() {
        let tmp = TempDir::new().unwrap();
        append_failure_reason(tmp.path(), "fs_event", "boom", None)
            .await
            .unwrap();
        let loaded = read_health_snapshot(tmp.path()).await.unwrap().unwrap();
        assert_eq!(loaded.error.as_deref(), Some("boom"));
        assert!(loaded.stats.is_none());
    }

    #[tokio::test]
    async fn missing_snapshot_reads_as_none() {
        let tmp = TempDir::new().unwrap();
        assert!(read_health_snapshot(tmp.path()).await.unwrap().is_none());
    }
}
