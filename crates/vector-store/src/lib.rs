//! Abstract vector-store boundary (§4.9) and schema manager (§4.8).
//!
//! Nothing here talks to a real vector database directly; `VectorStore` is
//! the seam a concrete HTTP-backed client implements, and `MemoryVectorStore`
//! is the in-process reference implementation used by tests and by the rest
//! of this workspace.

mod error;
mod fusion;
mod point;
mod schema;
mod store;

pub use error::{Result, VectorStoreError};
pub use fusion::reciprocal_rank_fusion;
pub use point::{
    Distance, Filter, HybridPoint, Ordering, Payload, PayloadIndexSchema, PayloadTarget, Point, ScoredPoint, SparseVector, WriteOptions,
};
pub use schema::{ensure_current_schema, get_schema_version, initialize_schema, SchemaMigration, CURRENT_SCHEMA_VERSION, SCHEMA_SENTINEL_ID};
pub use store::{MemoryVectorStore, VectorStore};
