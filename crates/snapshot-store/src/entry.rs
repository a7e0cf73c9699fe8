use serde::{Deserialize, Serialize};

/// Per-file metadata tracked across indexing runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Milliseconds since epoch.
    pub mtime_ms: u64,
    pub size: u64,
    /// SHA-256 of the file's UTF-8 bytes, 64 lowercase hex chars.
    pub content_hash: String,
}

impl FileEntry {
    #[must_use]
    pub const fn new(mtime_ms: u64, size: u64, content_hash: String) -> Self {
        Self {
            mtime_ms,
            size,
            content_hash,
        }
    }

    /// Whether `self` and `other` agree closely enough to skip re-hashing:
    /// size must match exactly and mtime within 1 second.
    #[must_use]
    pub fn matches_fast_path(&self, mtime_ms: u64, size: u64) -> bool {
        self.size == size && self.mtime_ms.abs_diff(mtime_ms) <= 1000
    }
}
