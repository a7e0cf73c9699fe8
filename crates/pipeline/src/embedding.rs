//! Abstract embedding boundary. A concrete backend (an HTTP client against
//! an embedding model server) is out of scope for the core crate; it only
//! needs to satisfy this trait.

use async_trait::async_trait;
use context_vector_store::SparseVector;

use crate::error::Result;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Dense embeddings, one per input text, same order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Sparse companion vectors for hybrid search, one per input text, same
    /// order. Default: none — a provider that doesn't support sparse
    /// vectors simply falls back to dense-only upserts even when the
    /// collection has sparse enabled.
    async fn embed_sparse_batch(&self, _texts: &[String]) -> Result<Vec<SparseVector>> {
        Ok(Vec::new())
    }
}
