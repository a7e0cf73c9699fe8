//! Abstract vector-store boundary (§4.9) plus an in-memory reference
//! implementation used by tests and by any caller that doesn't need a real
//! network-backed store.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use log::debug;

use crate::error::{Result, VectorStoreError};
use crate::fusion::reciprocal_rank_fusion;
use crate::point::{
    Distance, HybridPoint, Payload, PayloadIndexSchema, PayloadTarget, Point, ScoredPoint, SparseVector, WriteOptions,
};

/// Abstract operations the indexing pipeline and git enrichment rely on.
/// Any backing store that implements this trait — an HTTP client against a
/// real vector database, or the in-memory [`MemoryVectorStore`] below —
/// satisfies the rest of the crate's needs.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_collection(&self, name: &str, vector_size: usize, distance: Distance, enable_sparse: bool) -> Result<()>;

    /// Idempotent: creating an index that already exists returns `Ok(false)`
    /// rather than erroring.
    async fn ensure_payload_index(&self, name: &str, field: &str, schema: PayloadIndexSchema) -> Result<bool>;

    async fn add_points(&self, name: &str, points: Vec<Point>, opts: WriteOptions) -> Result<()>;

    async fn add_points_optimized(&self, name: &str, points: Vec<Point>, opts: WriteOptions) -> Result<()> {
        self.add_points(name, points, opts).await
    }

    async fn add_points_with_sparse(&self, name: &str, points: Vec<HybridPoint>, opts: WriteOptions) -> Result<()>;

    async fn add_points_with_sparse_optimized(&self, name: &str, points: Vec<HybridPoint>, opts: WriteOptions) -> Result<()> {
        self.add_points_with_sparse(name, points, opts).await
    }

    async fn search(&self, name: &str, vector: &[f32], k: usize, filter: Option<&crate::point::Filter>) -> Result<Vec<ScoredPoint>>;

    /// RRF over two prefetches: dense (`"dense"`) and sparse (`"text"`),
    /// each pulling `max(20, 4*k)` candidates before fusion trims back to
    /// `k`. The default implementation only needs [`Self::search`] for the
    /// dense leg and [`Self::sparse_search`] for the sparse leg; backends
    /// with a native fused query can override this wholesale.
    async fn hybrid_search(
        &self,
        name: &str,
        dense: &[f32],
        sparse: &SparseVector,
        k: usize,
        filter: Option<&crate::point::Filter>,
    ) -> Result<Vec<ScoredPoint>> {
        let prefetch_limit = (4 * k).max(20);
        let dense_hits = self.search(name, dense, prefetch_limit, filter).await?;
        let sparse_hits = self.sparse_search(name, sparse, prefetch_limit, filter).await?;
        Ok(reciprocal_rank_fusion(&dense_hits, &sparse_hits, k))
    }

    /// Sparse-only k-NN, used internally by the default [`Self::hybrid_search`].
    async fn sparse_search(&self, name: &str, sparse: &SparseVector, k: usize, filter: Option<&crate::point::Filter>) -> Result<Vec<ScoredPoint>>;

    async fn get_point(&self, name: &str, id: &str) -> Result<Option<ScoredPoint>>;

    async fn set_payload(&self, name: &str, payload: Payload, target: PayloadTarget, opts: WriteOptions) -> Result<()>;

    /// Merges up to 100 payload-patch ops per underlying request, splitting
    /// larger batches. The default implementation issues one request per
    /// chunk of 100; a real backend can override this with a single bulk
    /// call per chunk.
    async fn batch_set_payload(&self, name: &str, ops: Vec<(PayloadTarget, Payload)>, opts: WriteOptions) -> Result<()> {
        const BATCH: usize = 100;
        for chunk in ops.chunks(BATCH) {
            for (target, payload) in chunk {
                self.set_payload(name, payload.clone(), target.clone(), opts).await?;
            }
        }
        Ok(())
    }

    async fn delete_points_by_paths(&self, name: &str, paths: &[String], opts: WriteOptions) -> Result<()>;

    /// Batches a bulk delete into groups of `batch_size` paths (default 500
    /// paths, 8 concurrent batches upstream), issuing `wait=true` only on
    /// the final batch so most of the delete completes without blocking on
    /// durability.
    async fn delete_points_by_paths_batched(&self, name: &str, paths: &[String], batch_size: usize, concurrency: usize) -> Result<()> {
        use futures::stream::{self, StreamExt, TryStreamExt};

        let batches: Vec<&[String]> = paths.chunks(batch_size.max(1)).collect();
        let last = batches.len().saturating_sub(1);

        stream::iter(batches.into_iter().enumerate())
            .map(move |(i, batch)| {
                let opts = if i == last { WriteOptions::wait() } else { WriteOptions::default() };
                debug!("delete_points_by_paths_batched: batch {i}/{last}, wait={}", opts.wait);
                self.delete_points_by_paths(name, batch, opts)
            })
            .buffer_unordered(concurrency.max(1))
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }
}

#[derive(Default)]
struct Collection {
    vector_size: usize,
    distance: Distance,
    enable_sparse: bool,
    points: HashMap<String, Point>,
    sparse_points: HashMap<String, SparseVector>,
    indexed_fields: Vec<(String, PayloadIndexSchema)>,
}

/// Single-process, in-memory `VectorStore` used by tests and as a
/// development fallback. Not durable across restarts.
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_collection<T>(&self, name: &str, f: impl FnOnce(&Collection) -> Result<T>) -> Result<T> {
        let guard = self.collections.read().unwrap();
        let collection = guard.get(name).ok_or_else(|| VectorStoreError::CollectionNotFound(name.to_string()))?;
        f(collection)
    }

    fn with_collection_mut<T>(&self, name: &str, f: impl FnOnce(&mut Collection) -> Result<T>) -> Result<T> {
        let mut guard = self.collections.write().unwrap();
        let collection = guard.get_mut(name).ok_or_else(|| VectorStoreError::CollectionNotFound(name.to_string()))?;
        f(collection)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn sparse_dot(a: &SparseVector, b: &SparseVector) -> f32 {
    let mut score = 0.0;
    for (idx, val) in a.indices.iter().zip(a.values.iter()) {
        if let Some(pos) = b.indices.iter().position(|i| i == idx) {
            score += val * b.values[pos];
        }
    }
    score
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn create_collection(&self, name: &str, vector_size: usize, distance: Distance, enable_sparse: bool) -> Result<()> {
        let mut guard = self.collections.write().unwrap();
        guard.entry(name.to_string()).or_insert_with(|| Collection {
            vector_size,
            distance,
            enable_sparse,
            ..Collection::default()
        });
        Ok(())
    }

    async fn ensure_payload_index(&self, name: &str, field: &str, schema: PayloadIndexSchema) -> Result<bool> {
        self.with_collection_mut(name, |c| {
            if c.indexed_fields.iter().any(|(f, _)| f == field) {
                Ok(false)
            } else {
                c.indexed_fields.push((field.to_string(), schema));
                Ok(true)
            }
        })
    }

    async fn add_points(&self, name: &str, points: Vec<Point>, _opts: WriteOptions) -> Result<()> {
        self.with_collection_mut(name, |c| {
            for point in points {
                c.points.insert(point.id.clone(), point);
            }
            Ok(())
        })
    }

    async fn add_points_with_sparse(&self, name: &str, points: Vec<HybridPoint>, _opts: WriteOptions) -> Result<()> {
        self.with_collection_mut(name, |c| {
            for point in points {
                c.sparse_points.insert(point.id.clone(), point.sparse);
                c.points.insert(
                    point.id.clone(),
                    Point {
                        id: point.id,
                        vector: point.dense,
                        payload: point.payload,
                    },
                );
            }
            Ok(())
        })
    }

    async fn search(&self, name: &str, vector: &[f32], k: usize, filter: Option<&crate::point::Filter>) -> Result<Vec<ScoredPoint>> {
        self.with_collection(name, |c| {
            let mut scored: Vec<ScoredPoint> = c
                .points
                .values()
                .filter(|p| filter.map_or(true, |f| f.matches(&p.payload)))
                .map(|p| ScoredPoint {
                    id: p.id.clone(),
                    score: cosine_similarity(vector, &p.vector),
                    payload: p.payload.clone(),
                })
                .collect();
            scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(k);
            Ok(scored)
        })
    }

    async fn sparse_search(&self, name: &str, sparse: &SparseVector, k: usize, filter: Option<&crate::point::Filter>) -> Result<Vec<ScoredPoint>> {
        self.with_collection(name, |c| {
            let mut scored: Vec<ScoredPoint> = c
                .sparse_points
                .iter()
                .filter_map(|(id, vec)| {
                    let point = c.points.get(id)?;
                    if filter.is_some_and(|f| !f.matches(&point.payload)) {
                        return None;
                    }
                    Some(ScoredPoint {
                        id: id.clone(),
                        score: sparse_dot(sparse, vec),
                        payload: point.payload.clone(),
                    })
                })
                .collect();
            scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(k);
            Ok(scored)
        })
    }

    async fn get_point(&self, name: &str, id: &str) -> Result<Option<ScoredPoint>> {
        self.with_collection(name, |c| {
            Ok(c.points.get(id).map(|p| ScoredPoint {
                id: p.id.clone(),
                score: 0.0,
                payload: p.payload.clone(),
            }))
        })
    }

    async fn set_payload(&self, name: &str, payload: Payload, target: PayloadTarget, _opts: WriteOptions) -> Result<()> {
        self.with_collection_mut(name, |c| {
            let ids: Vec<String> = match &target {
                PayloadTarget::Ids(ids) => ids.clone(),
                PayloadTarget::Filter(filter) => c
                    .points
                    .values()
                    .filter(|p| filter.matches(&p.payload))
                    .map(|p| p.id.clone())
                    .collect(),
            };
            for id in ids {
                if let Some(point) = c.points.get_mut(&id) {
                    for (k, v) in &payload {
                        point.payload.insert(k.clone(), v.clone());
                    }
                }
            }
            Ok(())
        })
    }

    async fn delete_points_by_paths(&self, name: &str, paths: &[String], _opts: WriteOptions) -> Result<()> {
        self.with_collection_mut(name, |c| {
            let to_remove: Vec<String> = c
                .points
                .values()
                .filter(|p| p.payload.get("relativePath").and_then(|v| v.as_str()).is_some_and(|rp| paths.iter().any(|path| path == rp)))
                .map(|p| p.id.clone())
                .collect();
            for id in to_remove {
                c.points.remove(&id);
                c.sparse_points.remove(&id);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload_with(field: &str, value: &str) -> Payload {
        let mut p = Payload::new();
        p.insert(field.to_string(), json!(value));
        p
    }

    #[tokio::test]
    async fn create_collection_is_idempotent() {
        let store = MemoryVectorStore::new();
        store.create_collection("c", 3, Distance::Cosine, false).await.unwrap();
        store.create_collection("c", 3, Distance::Cosine, false).await.unwrap();
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_similarity() {
        let store = MemoryVectorStore::new();
        store.create_collection("c", 2, Distance::Cosine, false).await.unwrap();
        store
            .add_points(
                "c",
                vec![
                    Point {
                        id: "a".into(),
                        vector: vec![1.0, 0.0],
                        payload: Payload::new(),
                    },
                    Point {
                        id: "b".into(),
                        vector: vec![0.0, 1.0],
                        payload: Payload::new(),
                    },
                ],
                WriteOptions::default(),
            )
            .await
            .unwrap();

        let results = store.search("c", &[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(results[0].id, "a");
    }

    #[tokio::test]
    async fn ensure_payload_index_reports_first_creation_only() {
        let store = MemoryVectorStore::new();
        store.create_collection("c", 2, Distance::Cosine, false).await.unwrap();
        let first = store.ensure_payload_index("c", "relativePath", PayloadIndexSchema::Keyword).await.unwrap();
        let second = store.ensure_payload_index("c", "relativePath", PayloadIndexSchema::Keyword).await.unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn set_payload_merges_patch_into_existing_fields() {
        let store = MemoryVectorStore::new();
        store.create_collection("c", 2, Distance::Cosine, false).await.unwrap();
        store
            .add_points(
                "c",
                vec![Point {
                    id: "a".into(),
                    vector: vec![1.0, 0.0],
                    payload: payload_with("content", "fn foo() {}"),
                }],
                WriteOptions::default(),
            )
            .await
            .unwrap();

        store
            .set_payload("c", payload_with("dominantAuthor", "alice"), PayloadTarget::Ids(vec!["a".into()]), WriteOptions::default())
            .await
            .unwrap();

        let point = store.get_point("c", "a").await.unwrap().unwrap();
        assert_eq!(point.payload.get("content").unwrap(), "fn foo() {}");
        assert_eq!(point.payload.get("dominantAuthor").unwrap(), "alice");
    }

    #[tokio::test]
    async fn delete_points_by_paths_removes_matching_points_only() {
        let store = MemoryVectorStore::new();
        store.create_collection("c", 2, Distance::Cosine, false).await.unwrap();
        store
            .add_points(
                "c",
                vec![
                    Point {
                        id: "a".into(),
                        vector: vec![1.0, 0.0],
                        payload: payload_with("relativePath", "src/a.rs"),
                    },
                    Point {
                        id: "b".into(),
                        vector: vec![0.0, 1.0],
                        payload: payload_with("relativePath", "src/b.rs"),
                    },
                ],
                WriteOptions::default(),
            )
            .await
            .unwrap();

        store.delete_points_by_paths("c", &["src/a.rs".to_string()], WriteOptions::wait()).await.unwrap();

        assert!(store.get_point("c", "a").await.unwrap().is_none());
        assert!(store.get_point("c", "b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn hybrid_search_fuses_dense_and_sparse_prefetches() {
        let store = MemoryVectorStore::new();
        store.create_collection("c", 2, Distance::Cosine, true).await.unwrap();
        store
            .add_points_with_sparse(
                "c",
                vec![
                    HybridPoint {
                        id: "a".into(),
                        dense: vec![1.0, 0.0],
                        sparse: SparseVector {
                            indices: vec![1],
                            values: vec![1.0],
                        },
                        payload: Payload::new(),
                    },
                    HybridPoint {
                        id: "b".into(),
                        dense: vec![0.0, 1.0],
                        sparse: SparseVector {
                            indices: vec![2],
                            values: vec![1.0],
                        },
                        payload: Payload::new(),
                    },
                ],
                WriteOptions::default(),
            )
            .await
            .unwrap();

        let query_sparse = SparseVector {
            indices: vec![1],
            values: vec![1.0],
        };
        let results = store.hybrid_search("c", &[1.0, 0.0], &query_sparse, 2, None).await.unwrap();
        assert_eq!(results[0].id, "a");
    }
}
