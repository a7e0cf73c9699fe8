//! Result shapes the façade hands back from a full index (§8 scenario 1) and
//! an incremental reindex (§8 scenarios 2-3), plus the overall/error status
//! taxonomy from spec.md §7: `completed` (no errors), `partial` (some errors
//! but progress was made), `failed` (nothing usable came out of the run).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Completed,
    Partial,
    Failed,
}

impl Default for IndexStatus {
    fn default() -> Self {
        Self::Completed
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguageStats {
    pub files: usize,
    pub lines: usize,
}

/// Git enrichment runs as a background task orthogonal to indexing status
/// (§7): it never blocks or fails a run, it just reports where it got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentOutcome {
    Completed,
    Partial,
    Skipped,
    Background,
    Failed,
}

/// Returned by a full (or forced-full) index run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub chunks_created: usize,
    #[serde(default)]
    pub languages: HashMap<String, LanguageStats>,
    #[serde(default)]
    pub errors: Vec<String>,
    pub time_ms: u64,
    pub status: IndexStatus,
    #[serde(default)]
    pub git_enrichment: Option<EnrichmentOutcome>,
}

impl IndexStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, language: &str, lines: usize) {
        self.files_indexed += 1;
        let entry = self.languages.entry(language.to_string()).or_default();
        entry.files += 1;
        entry.lines += lines;
    }

    pub fn add_chunks(&mut self, count: usize) {
        self.chunks_created += count;
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// `failed` if errors consumed the whole scan with nothing indexed,
    /// `partial` if errors happened but some files still made it through,
    /// `completed` otherwise.
    pub fn finalize(&mut self) {
        self.status = if self.errors.is_empty() {
            IndexStatus::Completed
        } else if self.files_indexed > 0 {
            IndexStatus::Partial
        } else {
            IndexStatus::Failed
        };
    }
}

/// Returned by an incremental reindex run (`{added, modified, deleted}` plus
/// the chunk deltas those files produced).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReindexStats {
    pub files_added: usize,
    pub files_modified: usize,
    pub files_deleted: usize,
    pub chunks_added: usize,
    pub chunks_deleted: usize,
    #[serde(default)]
    pub errors: Vec<String>,
    pub time_ms: u64,
    pub status: IndexStatus,
    #[serde(default)]
    pub git_enrichment: Option<EnrichmentOutcome>,
}

impl ReindexStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn finalize(&mut self) {
        let touched = self.files_added + self.files_modified + self.files_deleted;
        self.status = if self.errors.is_empty() {
            IndexStatus::Completed
        } else if touched > self.errors.len() {
            IndexStatus::Partial
        } else {
            IndexStatus::Failed
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_reports_completed_with_no_errors() {
        let mut stats = IndexStats::new();
        stats.add_file("rust", 10);
        stats.finalize();
        assert_eq!(stats.status, IndexStatus::Completed);
    }

    #[test]
    fn finalize_reports_partial_when_some_files_still_indexed() {
        let mut stats = IndexStats::new();
        stats.add_file("rust", 10);
        stats.add_error("boom");
        stats.finalize();
        assert_eq!(stats.status, IndexStatus::Partial);
    }

    #[test]
    fn finalize_reports_failed_when_nothing_indexed() {
        let mut stats = IndexStats::new();
        stats.add_error("boom");
        stats.finalize();
        assert_eq!(stats.status, IndexStatus::Failed);
    }

    #[test]
    fn reindex_stats_finalize_completed_with_no_changes() {
        let mut stats = ReindexStats::new();
        stats.finalize();
        assert_eq!(stats.status, IndexStatus::Completed);
    }
}
