//! Chunk pipeline (§4.7): composes a [`BatchAccumulator`] and a
//! [`WorkerPool`] around an abstract [`EmbeddingProvider`] and
//! [`VectorStore`], so `add_chunk` is a cheap synchronous enqueue and the
//! embed-then-upsert work happens off the caller's critical path.

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use context_code_chunker::CodeChunk;
use context_concurrency::{AccumulatorConfig, BatchAccumulator, BatchHandler, WorkerPool, WorkerPoolConfig};
use context_vector_store::{HybridPoint, Point, VectorStore, WriteOptions};
use log::warn;
use once_cell::sync::OnceCell;
use tokio::sync::Notify;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::payload::build_payload;
use crate::point_id::normalize_point_id;

/// One chunk handed to [`ChunkPipeline::add_chunk`], still paired with its
/// caller-supplied ID and codebase root until the batch handler turns it
/// into a point.
#[derive(Debug, Clone)]
pub struct PipelineItem {
    pub chunk: CodeChunk,
    pub chunk_id: String,
    pub codebase_path: String,
}

pub type OnBatchUpserted = Arc<dyn Fn(&[PipelineItem]) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ChunkPipelineConfig {
    pub collection: String,
    pub vector_size: usize,
    pub enable_sparse: bool,
    pub batch_size: usize,
    pub flush_timeout: Duration,
    pub max_queue_size: usize,
    pub worker_concurrency: usize,
}

impl ChunkPipelineConfig {
    #[must_use]
    pub fn new(collection: impl Into<String>, vector_size: usize) -> Self {
        Self {
            collection: collection.into(),
            vector_size,
            enable_sparse: false,
            batch_size: 100,
            flush_timeout: Duration::from_millis(5000),
            max_queue_size: 10_000,
            worker_concurrency: 4,
        }
    }

    #[must_use]
    pub const fn with_enable_sparse(mut self, enable_sparse: bool) -> Self {
        self.enable_sparse = enable_sparse;
        self
    }

    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub const fn with_flush_timeout(mut self, flush_timeout: Duration) -> Self {
        self.flush_timeout = flush_timeout;
        self
    }

    #[must_use]
    pub const fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    #[must_use]
    pub const fn with_worker_concurrency(mut self, worker_concurrency: usize) -> Self {
        self.worker_concurrency = worker_concurrency;
        self
    }

    /// Overrides batch size and flush timeout from `QDRANT_UPSERT_BATCH_SIZE`
    /// (or `CODE_BATCH_SIZE`) and `QDRANT_FLUSH_INTERVAL_MS` when set (§6).
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_usize("QDRANT_UPSERT_BATCH_SIZE").or_else(|| env_usize("CODE_BATCH_SIZE")) {
            self.batch_size = v;
        }
        if let Some(v) = env_usize("QDRANT_FLUSH_INTERVAL_MS") {
            self.flush_timeout = Duration::from_millis(v as u64);
        }
        self
    }
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

async fn run_batch(
    store: &dyn VectorStore,
    embedder: &dyn EmbeddingProvider,
    collection: &str,
    enable_sparse: bool,
    items: Vec<PipelineItem>,
    on_batch_upserted: Option<&OnBatchUpserted>,
) -> std::result::Result<(), String> {
    let texts: Vec<String> = items.iter().map(|item| item.chunk.content.clone()).collect();

    let dense = embedder.embed_batch(&texts).await.map_err(|e| e.to_string())?;
    if dense.len() != items.len() {
        return Err(format!("embedding provider returned {} vectors for {} inputs", dense.len(), items.len()));
    }

    let sparse = if enable_sparse {
        embedder.embed_sparse_batch(&texts).await.map_err(|e| e.to_string())?
    } else {
        Vec::new()
    };

    if enable_sparse && sparse.len() == items.len() {
        let hybrid_points: Vec<HybridPoint> = items
            .iter()
            .zip(dense.into_iter())
            .zip(sparse.into_iter())
            .map(|((item, dense_vec), sparse_vec)| HybridPoint {
                id: normalize_point_id(&item.chunk_id),
                dense: dense_vec,
                sparse: sparse_vec,
                payload: build_payload(&item.chunk, &item.codebase_path),
            })
            .collect();
        store.add_points_with_sparse_optimized(collection, hybrid_points, WriteOptions::default()).await.map_err(|e| e.to_string())?;
    } else {
        if enable_sparse {
            warn!("hybrid mode enabled but embedding provider returned no sparse vectors; upserting dense-only");
        }
        let points: Vec<Point> = items
            .iter()
            .zip(dense.into_iter())
            .map(|(item, dense_vec)| Point {
                id: normalize_point_id(&item.chunk_id),
                vector: dense_vec,
                payload: build_payload(&item.chunk, &item.codebase_path),
            })
            .collect();
        store.add_points_optimized(collection, points, WriteOptions::default()).await.map_err(|e| e.to_string())?;
    }

    if let Some(cb) = on_batch_upserted {
        cb(&items);
    }
    Ok(())
}

/// Orchestrates embed-then-upsert for a single collection: `add_chunk`
/// enqueues into a [`BatchAccumulator`]; full (or timed-out) batches are
/// handed to a [`WorkerPool`] that embeds and upserts them, retrying
/// transient failures with backoff. Queue depth feeds back into the
/// accumulator as pause/resume backpressure (§4.7).
pub struct ChunkPipeline {
    accumulator: Arc<BatchAccumulator<PipelineItem>>,
    worker_pool: Arc<WorkerPool<Vec<PipelineItem>>>,
    config: ChunkPipelineConfig,
    /// Count of batches handed off from the accumulator's (synchronous)
    /// handler to a spawned `submit` task but not yet accepted by the
    /// worker pool's queue. `flush`/`shutdown` wait for this to reach zero
    /// in addition to the worker pool's own drain, otherwise a batch
    /// emitted right before a drain could race the task that enqueues it.
    pending_submits: Arc<AtomicUsize>,
    pending_notify: Arc<Notify>,
}

impl ChunkPipeline {
    pub fn new(config: ChunkPipelineConfig, store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self::with_callback(config, store, embedder, None)
    }

    pub fn with_callback(
        config: ChunkPipelineConfig,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        on_batch_upserted: Option<OnBatchUpserted>,
    ) -> Self {
        // The accumulator's batch handler needs the worker pool, and the
        // worker pool's queue-depth callback needs the accumulator — built
        // in two passes, tying the knot through this cell.
        let accumulator_cell: Arc<OnceCell<Arc<BatchAccumulator<PipelineItem>>>> = Arc::new(OnceCell::new());

        let collection = config.collection.clone();
        let enable_sparse = config.enable_sparse;

        let handler: BatchHandler<Vec<PipelineItem>> = Arc::new(move |items: Vec<PipelineItem>| {
            let store = store.clone();
            let embedder = embedder.clone();
            let collection = collection.clone();
            let callback = on_batch_upserted.clone();
            Box::pin(async move { run_batch(store.as_ref(), embedder.as_ref(), &collection, enable_sparse, items, callback.as_ref()).await })
        });

        let worker_config = WorkerPoolConfig {
            concurrency: config.worker_concurrency,
            ..WorkerPoolConfig::default()
        };

        let max_queue_size = config.max_queue_size;
        let cell_for_queue_cb = accumulator_cell.clone();
        let worker_pool = Arc::new(WorkerPool::new(worker_config, handler).with_queue_change_callback(move |depth| {
            let Some(acc) = cell_for_queue_cb.get() else {
                return;
            };
            if depth >= max_queue_size {
                acc.pause();
            } else if depth <= max_queue_size / 2 {
                acc.resume();
            }
        }));

        let pending_submits = Arc::new(AtomicUsize::new(0));
        let pending_notify = Arc::new(Notify::new());

        let wp_for_accumulator = worker_pool.clone();
        let pending_for_accumulator = pending_submits.clone();
        let notify_for_accumulator = pending_notify.clone();
        let accumulator = Arc::new(BatchAccumulator::new(
            AccumulatorConfig::new(config.batch_size, config.flush_timeout, config.max_queue_size),
            move |batch: Vec<PipelineItem>| {
                let wp = wp_for_accumulator.clone();
                let pending = pending_for_accumulator.clone();
                let notify = notify_for_accumulator.clone();
                pending.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    wp.submit(batch).await;
                    pending.fetch_sub(1, Ordering::SeqCst);
                    notify.notify_waiters();
                });
            },
        ));
        let _ = accumulator_cell.set(accumulator.clone());

        Self {
            accumulator,
            worker_pool,
            config,
            pending_submits,
            pending_notify,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ChunkPipelineConfig {
        &self.config
    }

    /// Wraps `(chunk, chunk_id, codebase_path)` into an upsert item and
    /// hands it to the accumulator. Returns `false` if the accumulator is
    /// paused (backpressure) or at capacity.
    pub fn add_chunk(&self, chunk: CodeChunk, chunk_id: impl Into<String>, codebase_path: impl Into<String>) -> bool {
        self.accumulator.add(PipelineItem {
            chunk,
            chunk_id: chunk_id.into(),
            codebase_path: codebase_path.into(),
        })
    }

    /// Initializes the collection and its schema (create path).
    pub async fn initialize_collection(&self, store: &dyn VectorStore) -> Result<()> {
        store
            .create_collection(&self.config.collection, self.config.vector_size, context_vector_store::Distance::Cosine, self.config.enable_sparse)
            .await?;
        context_vector_store::initialize_schema(store, &self.config.collection).await?;
        Ok(())
    }

    /// Flushes any partially-filled batch and waits for the worker pool to
    /// drain it (and everything already in flight).
    pub async fn flush(&self) {
        self.accumulator.flush();
        loop {
            if self.pending_submits.load(Ordering::SeqCst) == 0 {
                self.worker_pool.drain().await;
                if self.pending_submits.load(Ordering::SeqCst) == 0 {
                    return;
                }
                continue;
            }
            self.pending_notify.notified().await;
        }
    }

    /// Flushes, waits, then stops accepting new submissions on the worker
    /// pool.
    pub async fn shutdown(&self) {
        self.flush().await;
        self.worker_pool.shutdown().await;
    }

    /// Cancels pending work deterministically: resolves every queued batch
    /// with a failure result rather than rejecting (§5).
    pub fn force_shutdown(&self) {
        self.accumulator.clear();
        self.worker_pool.force_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_code_chunker::ChunkMetadata;
    use context_vector_store::MemoryVectorStore;
    use std::sync::Mutex;

    struct StubEmbedder;

    #[async_trait::async_trait]
    impl EmbeddingProvider for StubEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 0.0]).collect())
        }
    }

    fn chunk(path: &str, index: usize) -> CodeChunk {
        CodeChunk {
            content: format!("fn f{index}() {{}}"),
            start_line: 1,
            end_line: 2,
            metadata: ChunkMetadata {
                file_path: path.to_string(),
                language: "rust".to_string(),
                chunk_index: index,
                ..ChunkMetadata::default()
            },
        }
    }

    #[tokio::test]
    async fn add_chunk_flush_upserts_points_into_the_store() {
        let store: Arc<dyn VectorStore> = Arc::new(MemoryVectorStore::new());
        store.create_collection("code", 2, context_vector_store::Distance::Cosine, false).await.unwrap();

        let config = ChunkPipelineConfig::new("code", 2).with_batch_size(10);
        let pipeline = ChunkPipeline::new(config, store.clone(), Arc::new(StubEmbedder));

        assert!(pipeline.add_chunk(chunk("/repo/src/a.rs", 0), "chunk-a", "/repo"));
        pipeline.flush().await;

        let point = store.get_point("code", &normalize_point_id("chunk-a")).await.unwrap();
        assert!(point.is_some());
        assert_eq!(point.unwrap().payload.get("relativePath").unwrap(), "src/a.rs");
    }

    #[tokio::test]
    async fn on_batch_upserted_callback_fires_with_original_items() {
        let store: Arc<dyn VectorStore> = Arc::new(MemoryVectorStore::new());
        store.create_collection("code", 2, context_vector_store::Distance::Cosine, false).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let callback: OnBatchUpserted = Arc::new(move |items| {
            seen2.lock().unwrap().extend(items.iter().map(|i| i.chunk_id.clone()));
        });

        let config = ChunkPipelineConfig::new("code", 2).with_batch_size(10);
        let pipeline = ChunkPipeline::with_callback(config, store, Arc::new(StubEmbedder), Some(callback));

        pipeline.add_chunk(chunk("/repo/src/a.rs", 0), "chunk-a", "/repo");
        pipeline.flush().await;

        assert_eq!(seen.lock().unwrap().as_slice(), ["chunk-a"]);
    }

    #[tokio::test]
    async fn batch_size_triggers_automatic_upsert_without_explicit_flush() {
        let store: Arc<dyn VectorStore> = Arc::new(MemoryVectorStore::new());
        store.create_collection("code", 2, context_vector_store::Distance::Cosine, false).await.unwrap();

        let config = ChunkPipelineConfig::new("code", 2).with_batch_size(2);
        let pipeline = ChunkPipeline::new(config, store.clone(), Arc::new(StubEmbedder));

        pipeline.add_chunk(chunk("/repo/a.rs", 0), "a", "/repo");
        pipeline.add_chunk(chunk("/repo/b.rs", 1), "b", "/repo");
        pipeline.flush().await;

        assert!(store.get_point("code", &normalize_point_id("a")).await.unwrap().is_some());
        assert!(store.get_point("code", &normalize_point_id("b")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn force_shutdown_does_not_hang() {
        let store: Arc<dyn VectorStore> = Arc::new(MemoryVectorStore::new());
        store.create_collection("code", 2, context_vector_store::Distance::Cosine, false).await.unwrap();
        let config = ChunkPipelineConfig::new("code", 2).with_batch_size(10);
        let pipeline = ChunkPipeline::new(config, store, Arc::new(StubEmbedder));

        pipeline.add_chunk(chunk("/repo/a.rs", 0), "a", "/repo");
        pipeline.force_shutdown();
    }
}
