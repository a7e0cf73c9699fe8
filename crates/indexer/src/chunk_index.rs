//! Sidecar record of which point IDs and line spans belong to each indexed
//! file. The vector-store boundary has no "count points matching this
//! path" operation, so the façade keeps its own ledger -- written
//! atomically next to the snapshot and checkpoint, same as
//! [`context_snapshot_store::CheckpointStore`] -- so a reindex can report
//! exact `chunksDeleted` counts and the background git-enrichment pass can
//! build [`ChunkRef`]s without re-chunking every file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use context_git_enrichment::ChunkRef;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub point_id: String,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkIndex {
    files: HashMap<String, Vec<ChunkRecord>>,
}

impl ChunkIndex {
    #[must_use]
    pub fn chunk_count(&self, relative_path: &str) -> usize {
        self.files.get(relative_path).map_or(0, Vec::len)
    }

    pub fn remove_file(&mut self, relative_path: &str) -> usize {
        self.files.remove(relative_path).map_or(0, |v| v.len())
    }

    pub fn set_file(&mut self, relative_path: impl Into<String>, records: Vec<ChunkRecord>) {
        self.files.insert(relative_path.into(), records);
    }

    #[must_use]
    pub fn chunk_refs(&self) -> Vec<ChunkRef> {
        self.files
            .iter()
            .flat_map(|(path, records)| {
                records.iter().map(move |r| ChunkRef {
                    point_id: r.point_id.clone(),
                    relative_path: path.clone(),
                    start_line: r.start_line,
                    end_line: r.end_line,
                })
            })
            .collect()
    }
}

#[must_use]
pub fn chunk_index_path(state_dir: &Path, collection: &str) -> PathBuf {
    state_dir.join(format!("{collection}.chunks.json"))
}

pub async fn load_chunk_index(path: &Path) -> Result<ChunkIndex> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(ChunkIndex::default());
    }
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes).unwrap_or_default())
}

pub async fn save_chunk_index(path: &Path, index: &ChunkIndex) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(index)?;
    let mut tmp_os = path.as_os_str().to_os_string();
    tmp_os.push(".tmp");
    let tmp = PathBuf::from(tmp_os);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn roundtrips_through_disk() {
        let tmp = TempDir::new().unwrap();
        let path = chunk_index_path(tmp.path(), "default");

        let mut index = ChunkIndex::default();
        index.set_file(
            "a.ts",
            vec![ChunkRecord {
                point_id: "p1".to_string(),
                start_line: 1,
                end_line: 3,
            }],
        );
        save_chunk_index(&path, &index).await.unwrap();

        let loaded = load_chunk_index(&path).await.unwrap();
        assert_eq!(loaded.chunk_count("a.ts"), 1);
        assert_eq!(loaded.chunk_refs().len(), 1);
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let tmp = TempDir::new().unwrap();
        let path = chunk_index_path(tmp.path(), "default");
        let loaded = load_chunk_index(&path).await.unwrap();
        assert_eq!(loaded.chunk_count("anything"), 0);
    }

    #[test]
    fn remove_file_reports_removed_count() {
        let mut index = ChunkIndex::default();
        index.set_file(
            "a.ts",
            vec![
                ChunkRecord { point_id: "p1".to_string(), start_line: 1, end_line: 2 },
                ChunkRecord { point_id: "p2".to_string(), start_line: 3, end_line: 4 },
            ],
        );
        assert_eq!(index.remove_file("a.ts"), 2);
        assert_eq!(index.remove_file("a.ts"), 0);
    }
}
