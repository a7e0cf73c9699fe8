//! Orchestration façade (§2.15): wires the scanner, file synchronizer,
//! chunker worker pool, and chunk pipeline into a single `ProjectIndexer`,
//! and schedules git enrichment as a detached background pass once a run's
//! points have landed in the vector store.
//!
//! Data flow (§2): `scan -> synchronizer.diff -> chunker-pool.chunk ->
//! pipeline.addChunk -> accumulator -> worker-pool -> embed ->
//! vector-store.upsert -> (async) git-enrichment -> vector-store.setPayload`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use context_code_chunker::{ChunkerConfig, Language};
use context_concurrency::ChunkerWorkerPool;
use context_git_enrichment::{ChunkRef, GitEnrichmentService};
use context_pipeline::{ChunkPipeline, ChunkPipelineConfig, EmbeddingProvider};
use context_snapshot_store::{Checkpoint, FileSynchronizer, Phase};
use context_vector_store::VectorStore;
use futures::stream::{self, StreamExt};
use log::{info, warn};

use crate::chunk_index::{self, ChunkIndex, ChunkRecord};
use crate::error::Result;
use crate::scanner::FileScanner;
use crate::stats::{EnrichmentOutcome, IndexStats, ReindexStats};

/// Tunables for a single `ProjectIndexer`. Mirrors the teacher's
/// plain-struct-plus-`Default` configuration style (§A.4); nothing here
/// reads `std::env` directly except `with_env_overrides` on the pipeline
/// config, which is handed the same environment-variable contract (§6).
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub collection: String,
    pub vector_size: usize,
    pub enable_sparse: bool,
    pub chunker_threads: usize,
    pub max_chunk_size: usize,
    pub scan_concurrency: usize,
    pub enable_git_enrichment: bool,
}

impl IndexerConfig {
    #[must_use]
    pub fn new(collection: impl Into<String>, vector_size: usize) -> Self {
        Self {
            collection: collection.into(),
            vector_size,
            enable_sparse: false,
            chunker_threads: std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
            max_chunk_size: 1500,
            scan_concurrency: 8,
            enable_git_enrichment: true,
        }
    }

    #[must_use]
    pub const fn with_enable_sparse(mut self, enable_sparse: bool) -> Self {
        self.enable_sparse = enable_sparse;
        self
    }

    #[must_use]
    pub const fn with_enable_git_enrichment(mut self, enable: bool) -> Self {
        self.enable_git_enrichment = enable;
        self
    }
}

/// One parsed-and-read file ready to be turned into pipeline items.
struct ChunkedFile {
    relative_path: String,
    language: String,
    lines: usize,
    chunks: Vec<context_code_chunker::CodeChunk>,
}

/// Orchestrates a single codebase/collection pair: discovers files, detects
/// changes against the persisted snapshot, chunks and embeds the result
/// through a [`ChunkPipeline`], and schedules git enrichment in the
/// background. Not `Clone`; share it behind an `Arc` (as
/// [`crate::watcher::StreamingIndexer`] does).
pub struct ProjectIndexer {
    root: PathBuf,
    collection: String,
    store: Arc<dyn VectorStore>,
    chunker_pool: Arc<ChunkerWorkerPool>,
    synchronizer: FileSynchronizer,
    pipeline: ChunkPipeline,
    git_enrichment: Option<Arc<GitEnrichmentService>>,
    chunk_index_path: PathBuf,
    scan_concurrency: usize,
}

impl ProjectIndexer {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>, config: IndexerConfig) -> Self {
        let root = root.into();
        let state_dir = root.join(".context-finder");

        let chunker_pool = Arc::new(ChunkerWorkerPool::new(
            config.chunker_threads,
            ChunkerConfig {
                max_chunk_size: config.max_chunk_size,
            },
        ));

        let synchronizer = FileSynchronizer::new(
            state_dir.join(format!("{}.snap", config.collection)),
            state_dir.join(format!("{}.checkpoint.json", config.collection)),
        );

        let pipeline_config = ChunkPipelineConfig::new(config.collection.clone(), config.vector_size)
            .with_enable_sparse(config.enable_sparse)
            .with_env_overrides();
        let pipeline = ChunkPipeline::new(pipeline_config, store.clone(), embedder);

        let git_enrichment = config.enable_git_enrichment.then(|| {
            Arc::new(GitEnrichmentService::new(
                root.clone(),
                Some(state_dir.join("git-blame-cache")),
            ))
        });

        Self {
            chunk_index_path: chunk_index::chunk_index_path(&state_dir, &config.collection),
            root,
            collection: config.collection,
            store,
            chunker_pool,
            synchronizer,
            pipeline,
            git_enrichment,
            scan_concurrency: config.scan_concurrency.max(1),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Full index: every discovered file is (re-)chunked and re-embedded
    /// regardless of the previous snapshot, which is then overwritten. Used
    /// for the first run on a codebase (§8 scenario 1).
    pub async fn index(&self) -> Result<IndexStats> {
        let started = Instant::now();
        let mut stats = IndexStats::new();

        self.pipeline.initialize_collection(self.store.as_ref()).await?;

        let files = FileScanner::new(&self.root).scan();
        stats.files_scanned = files.len();

        let checkpoint = Checkpoint::new(files.len(), Phase::Indexing);
        self.synchronizer.save_checkpoint(&checkpoint).await?;

        let mut chunk_index = ChunkIndex::default();
        let processed = self.chunk_files(&files, &mut stats.errors).await;

        for file in processed {
            stats.add_file(&file.language, file.lines);
            let count = self.upsert_chunks(&file);
            stats.add_chunks(count);
            chunk_index.set_file(file.relative_path.clone(), records_for(&file));
        }

        self.pipeline.flush().await;
        self.synchronizer
            .update_snapshot(&self.collection, &self.root, &files)
            .await?;
        self.synchronizer.clear_checkpoint().await?;
        chunk_index::save_chunk_index(&self.chunk_index_path, &chunk_index).await?;

        #[allow(clippy::cast_possible_truncation)]
        {
            stats.time_ms = started.elapsed().as_millis() as u64;
        }
        stats.finalize();
        stats.git_enrichment = Some(self.spawn_git_enrichment(chunk_index.chunk_refs()));

        Ok(stats)
    }

    /// Incremental reindex: only `{added, modified, deleted}` files (per
    /// the synchronizer's mtime+size/Merkle diff) are touched (§8 scenarios
    /// 2-3).
    pub async fn reindex(&self) -> Result<ReindexStats> {
        let started = Instant::now();
        let mut stats = ReindexStats::new();

        let files = FileScanner::new(&self.root).scan();
        let changes = self.synchronizer.detect_changes(&self.root, &files).await?;

        stats.files_added = changes.added.len();
        stats.files_modified = changes.modified.len();
        stats.files_deleted = changes.deleted.len();

        let mut chunk_index = chunk_index::load_chunk_index(&self.chunk_index_path).await?;

        if changes.is_empty() {
            #[allow(clippy::cast_possible_truncation)]
            {
                stats.time_ms = started.elapsed().as_millis() as u64;
            }
            stats.finalize();
            return Ok(stats);
        }

        let to_clear: Vec<String> = changes.modified.iter().chain(changes.deleted.iter()).cloned().collect();
        if !to_clear.is_empty() {
            let removed: usize = to_clear.iter().map(|p| chunk_index.chunk_count(p)).sum();
            match self.store.delete_points_by_paths_batched(&self.collection, &to_clear, 500, 8).await {
                Ok(()) => stats.chunks_deleted += removed,
                Err(err) => stats.add_error(format!("delete failed for {} paths: {err}", to_clear.len())),
            }
            for path in &to_clear {
                chunk_index.remove_file(path);
            }
        }

        let to_index: Vec<PathBuf> = changes
            .added
            .iter()
            .chain(changes.modified.iter())
            .map(|rel| self.root.join(rel))
            .collect();

        let processed = self.chunk_files(&to_index, &mut stats.errors).await;
        for file in processed {
            let count = self.upsert_chunks(&file);
            stats.chunks_added += count;
            chunk_index.set_file(file.relative_path.clone(), records_for(&file));
        }

        self.pipeline.flush().await;
        self.synchronizer
            .update_snapshot(&self.collection, &self.root, &files)
            .await?;
        chunk_index::save_chunk_index(&self.chunk_index_path, &chunk_index).await?;

        #[allow(clippy::cast_possible_truncation)]
        {
            stats.time_ms = started.elapsed().as_millis() as u64;
        }
        stats.finalize();
        stats.git_enrichment = Some(self.spawn_git_enrichment(chunk_index.chunk_refs()));

        Ok(stats)
    }

    /// Reads, chunks (off the async runtime, via the OS-thread chunker
    /// pool), and tags each file with bounded concurrency. Read/parse
    /// failures are recorded in `errors` and the file is otherwise skipped
    /// (§7: parse failures are never fatal).
    async fn chunk_files(&self, abs_paths: &[PathBuf], errors: &mut Vec<String>) -> Vec<ChunkedFile> {
        let results: Vec<std::result::Result<ChunkedFile, (String, String)>> = stream::iter(abs_paths.iter().cloned())
            .map(|path| {
                let pool = self.chunker_pool.clone();
                let root = self.root.clone();
                async move { chunk_one_file(&root, &path, pool).await }
            })
            .buffer_unordered(self.scan_concurrency)
            .collect()
            .await;

        let mut files = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(file) => files.push(file),
                Err((relative_path, err)) => {
                    warn!("indexing {relative_path} failed: {err}");
                    errors.push(format!("{relative_path}: {err}"));
                }
            }
        }
        files
    }

    /// Enqueues every chunk of `file` onto the pipeline, keyed by
    /// `"<relativePath>:<chunkIndex>"` (deterministic, so a re-upsert lands
    /// in place per §4.7). Returns how many were accepted -- a pipeline at
    /// backpressure capacity drops the rest.
    fn upsert_chunks(&self, file: &ChunkedFile) -> usize {
        let mut accepted = 0;
        for (index, chunk) in file.chunks.iter().cloned().enumerate() {
            let chunk_id = format!("{}:{index}", file.relative_path);
            if self.pipeline.add_chunk(chunk, chunk_id, self.root.to_string_lossy().into_owned()) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Fire-and-forget background git enrichment (§4.10/§4.11, §9 "a
    /// supervised background task whose failure increments a counter and
    /// logs, but never propagates to the indexer's result"). Always
    /// reported as `background` to the caller, since it hasn't necessarily
    /// completed by the time `index`/`reindex` return.
    fn spawn_git_enrichment(&self, chunks: Vec<ChunkRef>) -> EnrichmentOutcome {
        let Some(service) = self.git_enrichment.clone() else {
            return EnrichmentOutcome::Skipped;
        };
        if chunks.is_empty() {
            return EnrichmentOutcome::Skipped;
        }

        let store = self.store.clone();
        let collection = self.collection.clone();
        tokio::spawn(async move {
            match service.enrich(store.as_ref(), &collection, &chunks).await {
                Ok(report) => {
                    info!(
                        "git enrichment finished: {} files, {} chunks updated, status={:?}",
                        report.files_processed, report.chunks_updated, report.status
                    );
                }
                Err(err) => warn!("git enrichment failed: {err}"),
            }
        });

        EnrichmentOutcome::Background
    }
}

fn records_for(file: &ChunkedFile) -> Vec<ChunkRecord> {
    file.chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| ChunkRecord {
            point_id: context_pipeline::normalize_point_id(&format!("{}:{index}", file.relative_path)),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
        })
        .collect()
}

async fn chunk_one_file(root: &Path, abs_path: &Path, pool: Arc<ChunkerWorkerPool>) -> std::result::Result<ChunkedFile, (String, String)> {
    let relative_path = relative_path_of(root, abs_path);

    let content = tokio::fs::read_to_string(abs_path)
        .await
        .map_err(|err| (relative_path.clone(), err.to_string()))?;
    let lines = content.lines().count();
    let language = Language::from_path(abs_path).as_str().to_string();

    let path_str = abs_path.to_string_lossy().into_owned();
    let chunks = tokio::task::spawn_blocking(move || pool.chunk(path_str, content))
        .await
        .map_err(|err| (relative_path.clone(), format!("chunker task panicked: {err}")))?
        .map_err(|err| (relative_path.clone(), err.to_string()))?;

    Ok(ChunkedFile {
        relative_path,
        language,
        lines,
        chunks,
    })
}

fn relative_path_of(root: &Path, abs_path: &Path) -> String {
    abs_path
        .strip_prefix(root)
        .unwrap_or(abs_path)
        .to_string_lossy()
        .replace('\\', "/")
}
