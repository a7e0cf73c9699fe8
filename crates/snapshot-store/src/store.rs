use crate::entry::FileEntry;
use crate::error::{Result, SnapshotError};
use context_hash_ring::HashRing;
use context_merkle::MerkleTree;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 2;
const DEFAULT_SHARD_COUNT: usize = 4;
const DEFAULT_VIRTUAL_NODES: usize = 150;

/// A fully loaded snapshot: the Merkle tree identity plus per-file metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub codebase_path: String,
    pub timestamp: u64,
    pub merkle_root: String,
    pub files: BTreeMap<String, FileEntry>,
    pub version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetaFile {
    version: u32,
    codebase_path: String,
    timestamp: u64,
    shard_count: usize,
    virtual_nodes_per_shard: usize,
    shard_checksums: Vec<String>,
    merkle_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ShardEntry {
    rel_path: String,
    hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mtime: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ShardFile {
    entries: Vec<ShardEntry>,
    checksum: String,
}

/// Persists `{path -> (mtime, size, content-hash)}` plus the Merkle tree to a
/// sharded on-disk directory, atomically.
pub struct SnapshotStore {
    dir: PathBuf,
    shard_count: usize,
    virtual_nodes_per_shard: usize,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_shards(dir, DEFAULT_SHARD_COUNT, DEFAULT_VIRTUAL_NODES)
    }

    #[must_use]
    pub fn with_shards(dir: impl Into<PathBuf>, shard_count: usize, virtual_nodes: usize) -> Self {
        Self {
            dir: dir.into(),
            shard_count: shard_count.max(1),
            virtual_nodes_per_shard: virtual_nodes.max(1),
        }
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.dir.join("meta.json").is_file()
    }

    /// Save `files` (plus the pre-built `tree`) atomically: write a fresh
    /// temp directory, then swap it in.
    pub async fn save(
        &self,
        codebase_path: &str,
        files: &BTreeMap<String, FileEntry>,
        tree: &MerkleTree,
    ) -> Result<()> {
        self.gc_stale_temp_dirs().await?;

        let parent = self
            .dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let stem = self.dir.file_name().map_or_else(
            || "snapshot".to_string(),
            |s| s.to_string_lossy().to_string(),
        );
        let suffix: u64 = rand::random();
        let tmp_dir = parent.join(format!("{stem}.tmp.{suffix:016x}"));

        tokio::fs::create_dir_all(&tmp_dir).await?;

        let ring = HashRing::with_virtual_nodes(self.shard_count, self.virtual_nodes_per_shard);
        let mut shards: Vec<Vec<ShardEntry>> = vec![Vec::new(); self.shard_count];
        for (rel_path, entry) in files {
            let shard = ring.get_shard(rel_path);
            shards[shard].push(ShardEntry {
                rel_path: rel_path.clone(),
                hash: entry.content_hash.clone(),
                mtime: Some(entry.mtime_ms),
                size: Some(entry.size),
            });
        }

        let mut shard_checksums = Vec::with_capacity(self.shard_count);
        for (idx, entries) in shards.into_iter().enumerate() {
            let mut entries = entries;
            entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
            let checksum = checksum_entries(&entries)?;
            let shard_file = ShardFile {
                entries,
                checksum: checksum.clone(),
            };
            let bytes = serde_json::to_vec_pretty(&shard_file)?;
            let path = tmp_dir.join(shard_file_name(idx));
            tokio::fs::write(&path, &bytes).await?;
            shard_checksums.push(checksum);
        }

        let meta = MetaFile {
            version: SNAPSHOT_SCHEMA_VERSION,
            codebase_path: codebase_path.to_string(),
            timestamp: now_ms(),
            shard_count: self.shard_count,
            virtual_nodes_per_shard: self.virtual_nodes_per_shard,
            shard_checksums,
            merkle_root: tree.root_hash().to_string(),
        };
        let meta_bytes = serde_json::to_vec_pretty(&meta)?;
        tokio::fs::write(tmp_dir.join("meta.json"), &meta_bytes).await?;

        self.swap_in(tmp_dir).await
    }

    async fn swap_in(&self, tmp_dir: PathBuf) -> Result<()> {
        if self.dir.exists() {
            let parent = self
                .dir
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let stem = self.dir.file_name().map_or_else(
                || "snapshot".to_string(),
                |s| s.to_string_lossy().to_string(),
            );
            let suffix: u64 = rand::random();
            let old_dir = parent.join(format!("{stem}.old.{suffix:016x}"));
            tokio::fs::rename(&self.dir, &old_dir).await?;
            tokio::fs::rename(&tmp_dir, &self.dir).await?;
            let _ = tokio::fs::remove_dir_all(&old_dir).await;
        } else {
            tokio::fs::rename(&tmp_dir, &self.dir).await?;
        }
        Ok(())
    }

    async fn gc_stale_temp_dirs(&self) -> Result<()> {
        let parent = self
            .dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        if !parent.exists() {
            return Ok(());
        }
        let stem = self.dir.file_name().map_or_else(
            || "snapshot".to_string(),
            |s| s.to_string_lossy().to_string(),
        );
        let tmp_prefix = format!("{stem}.tmp.");
        let old_prefix = format!("{stem}.old.");

        let mut read_dir = tokio::fs::read_dir(&parent).await?;
        while let Some(child) = read_dir.next_entry().await? {
            let name = child.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&tmp_prefix) || name.starts_with(&old_prefix) {
                let _ = tokio::fs::remove_dir_all(child.path()).await;
            }
        }
        Ok(())
    }

    /// Load the snapshot. Returns `Ok(None)` if no snapshot exists yet, and
    /// `Err` on checksum mismatch or corrupt metadata -- callers that want
    /// "absent on any failure" semantics (the file synchronizer) should
    /// treat an `Err` the same as `Ok(None)`.
    pub async fn load(&self) -> Result<Option<Snapshot>> {
        if !self.exists() {
            return Ok(None);
        }

        let meta_bytes = tokio::fs::read(self.dir.join("meta.json")).await?;
        let meta: MetaFile = serde_json::from_slice(&meta_bytes)
            .map_err(|e| SnapshotError::CorruptMetadata(e.to_string()))?;

        let mut files = BTreeMap::new();
        for idx in 0..meta.shard_count {
            let path = self.dir.join(shard_file_name(idx));
            let bytes = tokio::fs::read(&path).await?;
            let shard: ShardFile = serde_json::from_slice(&bytes)?;
            let actual = checksum_entries(&shard.entries)?;
            let expected = meta.shard_checksums.get(idx).cloned().unwrap_or_default();
            if actual != expected {
                return Err(SnapshotError::ChecksumMismatch {
                    shard: idx,
                    expected,
                    actual,
                });
            }
            for entry in shard.entries {
                files.insert(
                    entry.rel_path,
                    FileEntry::new(
                        entry.mtime.unwrap_or(0),
                        entry.size.unwrap_or(0),
                        entry.hash,
                    ),
                );
            }
        }

        Ok(Some(Snapshot {
            codebase_path: meta.codebase_path,
            timestamp: meta.timestamp,
            merkle_root: meta.merkle_root,
            files,
            version: meta.version,
        }))
    }

    /// `true` if the snapshot loads and every shard checksum matches.
    pub async fn validate(&self) -> Result<bool> {
        match self.load().await {
            Ok(_) => Ok(true),
            Err(SnapshotError::ChecksumMismatch { .. } | SnapshotError::CorruptMetadata(_)) => {
                Ok(false)
            }
            Err(other) => Err(other),
        }
    }

    pub async fn delete(&self) -> Result<()> {
        if self.dir.exists() {
            tokio::fs::remove_dir_all(&self.dir).await?;
        }
        Ok(())
    }

    /// Schema version recorded in `meta.json`, or `None` if absent.
    pub async fn get_version(&self) -> Result<Option<u32>> {
        if !self.exists() {
            return Ok(None);
        }
        let meta_bytes = tokio::fs::read(self.dir.join("meta.json")).await?;
        let meta: MetaFile = serde_json::from_slice(&meta_bytes)
            .map_err(|e| SnapshotError::CorruptMetadata(e.to_string()))?;
        Ok(Some(meta.version))
    }

    pub async fn needs_migration(&self) -> Result<bool> {
        Ok(self
            .get_version()
            .await?
            .is_some_and(|v| v < SNAPSHOT_SCHEMA_VERSION))
    }
}

fn shard_file_name(idx: usize) -> String {
    format!("shard-{idx:02}.json")
}

fn checksum_entries(entries: &[ShardEntry]) -> Result<String> {
    let bytes = serde_json::to_vec(entries)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
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
    use context_merkle::MerkleTree;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn files() -> BTreeMap<String, FileEntry> {
        let mut map = BTreeMap::new();
        map.insert(
            "a.rs".to_string(),
            FileEntry::new(1000, 10, "hash-a".to_string()),
        );
        map.insert(
            "src/b.py".to_string(),
            FileEntry::new(2000, 20, "hash-b".to_string()),
        );
        map
    }

    fn merkle_for(files: &BTreeMap<String, FileEntry>) -> MerkleTree {
        let hashes: BTreeMap<String, String> = files
            .iter()
            .map(|(k, v)| (k.clone(), v.content_hash.clone()))
            .collect();
        MerkleTree::build(&hashes)
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path().join("index.snap"));
        let files = files();
        let tree = merkle_for(&files);

        store.save("/repo", &files, &tree).await.unwrap();
        assert!(store.exists());

        let loaded = store.load().await.unwrap().expect("snapshot present");
        assert_eq!(loaded.files, files);
        assert_eq!(loaded.merkle_root, tree.root_hash());
        assert_eq!(loaded.version, SNAPSHOT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn rebuilt_merkle_root_matches_saved_root() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path().join("index.snap"));
        let files = files();
        let tree = merkle_for(&files);
        store.save("/repo", &files, &tree).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        let rebuilt = merkle_for(&loaded.files);
        assert_eq!(rebuilt.root_hash(), loaded.merkle_root);
    }

    #[tokio::test]
    async fn corrupt_shard_checksum_fails_load() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::with_shards(tmp.path().join("index.snap"), 1, 4);
        let files = files();
        let tree = merkle_for(&files);
        store.save("/repo", &files, &tree).await.unwrap();

        let shard_path = tmp.path().join("index.snap").join("shard-00.json");
        let mut content = tokio::fs::read(&shard_path).await.unwrap();
        content.extend_from_slice(b"\ncorruption");
        // Appending bytes breaks JSON parsing before checksum comparison, so
        // craft a still-valid-JSON corruption by flipping a hash character.
        let mut shard: ShardFile = match serde_json::from_slice(&content) {
            Ok(s) => s,
            Err(_) => {
                // Fall back: rewrite with a tampered but well-formed entry.
                let original = tokio::fs::read(&shard_path).await.unwrap();
                let mut shard: ShardFile = serde_json::from_slice(&original).unwrap();
                if let Some(first) = shard.entries.first_mut() {
                    first.hash = format!("{}-tampered", first.hash);
                }
                shard
            }
        };
        if shard.entries.is_empty() {
            panic!("expected at least one shard entry");
        }
        tokio::fs::write(&shard_path, serde_json::to_vec(&shard).unwrap())
            .await
            .unwrap();

        let result = store.load().await;
        assert!(matches!(
            result,
            Err(SnapshotError::ChecksumMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn corrupt_meta_json_errors() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path().join("index.snap"));
        let files = files();
        let tree = merkle_for(&files);
        store.save("/repo", &files, &tree).await.unwrap();

        tokio::fs::write(
            tmp.path().join("index.snap").join("meta.json"),
            b"{ not json",
        )
        .await
        .unwrap();

        let result = store.load().await;
        assert!(matches!(result, Err(SnapshotError::CorruptMetadata(_))));
    }

    #[tokio::test]
    async fn save_is_atomic_across_repeated_saves() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path().join("index.snap"));
        let files1 = files();
        let tree1 = merkle_for(&files1);
        store.save("/repo", &files1, &tree1).await.unwrap();

        let mut files2 = files1.clone();
        files2.insert(
            "c.go".to_string(),
            FileEntry::new(3000, 30, "hash-c".to_string()),
        );
        let tree2 = merkle_for(&files2);
        store.save("/repo", &files2, &tree2).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.files, files2);

        // No leftover temp/old directories.
        let mut entries = tokio::fs::read_dir(tmp.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(e) = entries.next_entry().await.unwrap() {
            names.push(e.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["index.snap".to_string()]);
    }

    #[tokio::test]
    async fn get_version_reports_current_schema() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path().join("index.snap"));
        assert_eq!(store.get_version().await.unwrap(), None);

        let files = files();
        let tree = merkle_for(&files);
        store.save("/repo", &files, &tree).await.unwrap();
        assert_eq!(
            store.get_version().await.unwrap(),
            Some(SNAPSHOT_SCHEMA_VERSION)
        );
        assert!(!store.needs_migration().await.unwrap());
    }
}
