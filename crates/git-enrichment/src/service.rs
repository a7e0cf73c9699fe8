//! Ties blame aggregation, whole-history churn, and the chunk-churn overlay
//! together into one background enrichment pass (§4.10/§4.11) that writes
//! its results back through [`context_vector_store::VectorStore::batch_set_payload`].

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use context_code_chunker::GitChunkMetadata;
use context_vector_store::{Payload, PayloadTarget, VectorStore, WriteOptions};

use crate::blame::{aggregate_chunk_blame, run_blame, BlameCache};
use crate::error::Result;
use crate::log_reader::{compute_file_metrics, GitLogReader};
use crate::overlay::{compute_file_window, DEFAULT_DEPTH_LIMIT, DEFAULT_MAX_FILE_LINES};

/// Minimal description of an already-indexed chunk, enough to locate its
/// blame/overlay window and write its git signal back.
#[derive(Debug, Clone)]
pub struct ChunkRef {
    pub point_id: String,
    pub relative_path: String,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentStatus {
    Completed,
    /// Repo root isn't a git repository, or git is unavailable — indexing
    /// must proceed without blocking on this (§7).
    Skipped,
}

#[derive(Debug, Clone)]
pub struct EnrichmentReport {
    pub status: EnrichmentStatus,
    pub files_processed: usize,
    pub chunks_updated: usize,
}

pub struct GitEnrichmentService {
    repo_root: PathBuf,
    blame_cache: Arc<BlameCache>,
    depth_limit: usize,
    max_file_lines: usize,
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl GitEnrichmentService {
    #[must_use]
    pub fn new(repo_root: impl Into<PathBuf>, cache_dir: Option<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            blame_cache: Arc::new(BlameCache::new(cache_dir, 512)),
            depth_limit: env_usize("GIT_CHUNK_DEPTH_LIMIT", DEFAULT_DEPTH_LIMIT),
            max_file_lines: env_usize("GIT_CHUNK_MAX_FILE_LINES", DEFAULT_MAX_FILE_LINES),
        }
    }

    /// Runs blame + whole-history + overlay for every file referenced by
    /// `chunks`, grouped by relative path, and writes the resulting
    /// [`GitChunkMetadata`] back onto each chunk's `"git"` payload field.
    pub async fn enrich(&self, store: &dyn VectorStore, collection: &str, chunks: &[ChunkRef]) -> Result<EnrichmentReport> {
        if git2::Repository::open(&self.repo_root).is_err() {
            log::warn!("git enrichment skipped: {} is not a git repository", self.repo_root.display());
            return Ok(EnrichmentReport { status: EnrichmentStatus::Skipped, files_processed: 0, chunks_updated: 0 });
        }

        let reader = GitLogReader::open(&self.repo_root);
        let now = chrono::Utc::now().timestamp();

        let whole_history = match reader.read_all().await {
            Ok(history) => history,
            Err(err) => {
                log::warn!("git enrichment: whole-history read failed, proceeding without file-level churn: {err}");
                HashMap::new()
            }
        };

        let mut by_path: HashMap<&str, Vec<&ChunkRef>> = HashMap::new();
        for c in chunks {
            by_path.entry(c.relative_path.as_str()).or_default().push(c);
        }

        let mut ops: Vec<(PayloadTarget, Payload)> = Vec::new();
        let mut files_processed = 0usize;

        for (rel_path, file_chunks) in &by_path {
            let max_end_line = file_chunks.iter().map(|c| c.end_line).max().unwrap_or(0);

            let content_hash = whole_history
                .get(*rel_path)
                .and_then(|d| d.commits.last())
                .map(|c| c.sha.clone())
                .unwrap_or_default();

            let blame = match self.blame_cache.get(&self.repo_root.to_string_lossy(), rel_path, &content_hash).await {
                Some(cached) => cached,
                None => match run_blame(&self.repo_root, rel_path).await {
                    Ok(fresh) => self.blame_cache.put(&self.repo_root.to_string_lossy(), rel_path, &content_hash, fresh).await,
                    Err(err) => {
                        log::warn!("blame failed for {rel_path}: {err}");
                        continue;
                    }
                },
            };

            let window = compute_file_window(&self.repo_root, rel_path, self.depth_limit, self.max_file_lines, max_end_line).unwrap_or(None);

            let file_metrics = whole_history.get(*rel_path).map(|data| compute_file_metrics(data, max_end_line as u64, now));

            files_processed += 1;

            for chunk in file_chunks {
                let chunk_blame = aggregate_chunk_blame(&blame, chunk.start_line, chunk.end_line, now);
                let overlay = window.as_ref().map(|w| w.chunk_overlay(chunk.start_line, chunk.end_line));
                let chunk_contributor_count = if chunk_blame.authors.is_empty() { None } else { Some(chunk_blame.authors.len() as u32) };

                let git_meta = GitChunkMetadata {
                    dominant_author: chunk_blame.dominant_author,
                    authors: chunk_blame.authors,
                    commit_shas: chunk_blame.commit_shas,
                    first_commit_at: chunk_blame.first_commit_at,
                    last_commit_at: chunk_blame.last_commit_at,
                    last_commit_hash: chunk_blame.last_commit_hash,
                    age_days: chunk_blame.age_days,
                    task_ids: chunk_blame.task_ids,
                    chunk_commit_count: overlay.map(|o| o.chunk_commit_count),
                    chunk_churn_ratio: overlay.map(|o| o.chunk_churn_ratio),
                    chunk_contributor_count,
                    chunk_bug_fix_rate: Some(chunk_blame.bug_fix_rate),
                    chunk_last_modified_at: chunk_blame.last_commit_at,
                    chunk_age_days: chunk_blame.age_days,
                    relative_churn: file_metrics.as_ref().map(|m| m.relative_churn),
                    recency_weighted_freq: file_metrics.as_ref().map(|m| m.recency_weighted_freq),
                    change_density: file_metrics.as_ref().map(|m| m.change_density),
                    churn_volatility: file_metrics.as_ref().map(|m| m.churn_volatility),
                    bug_fix_rate: file_metrics.as_ref().map(|m| m.bug_fix_rate),
                    contributor_count: file_metrics.as_ref().map(|m| m.contributor_count),
                    dominant_author_pct: file_metrics.as_ref().map(|m| m.dominant_author_pct),
                };

                let Ok(value) = serde_json::to_value(&git_meta) else { continue };
                let mut payload = Payload::new();
                payload.insert("git".to_string(), value);
                ops.push((PayloadTarget::Ids(vec![chunk.point_id.clone()]), payload));
            }
        }

        let chunks_updated = ops.len();
        if !ops.is_empty() {
            store.batch_set_payload(collection, ops, WriteOptions::default()).await?;
        }

        Ok(EnrichmentReport { status: EnrichmentStatus::Completed, files_processed, chunks_updated })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_usize_falls_back_to_default_on_missing_or_bad_value() {
        assert_eq!(env_usize("GIT_ENRICHMENT_TEST_UNSET_VAR", 7), 7);
    }
}
