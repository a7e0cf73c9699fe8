//! # Context Indexer
//!
//! Project indexing for semantic code search.
//!
//! ## Pipeline
//!
//! ```text
//! Directory
//!     │
//!     ├──> File Scanner (.gitignore aware)
//!     │      └─> Source files
//!     │
//!     ├──> Chunker (AST-aware)
//!     │      └─> Code chunks
//!     │
//!     └──> Vector Store (batch embed)
//!            └─> Searchable index
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use context_indexer::{IndexerConfig, ProjectIndexer};
//!
//! # async fn run(store: Arc<dyn context_vector_store::VectorStore>, embedder: Arc<dyn context_pipeline::EmbeddingProvider>) -> anyhow::Result<()> {
//! let config = IndexerConfig::new("default", 1536);
//! let indexer = ProjectIndexer::new(Path::new("/path/to/project"), store, embedder, config);
//! let stats = indexer.index().await?;
//!
//! println!("Indexed {} files, {} chunks", stats.files_indexed, stats.chunks_created);
//! # Ok(())
//! # }
//! ```

mod chunk_index;
mod error;
mod health;
mod indexer;
mod scanner;
mod stats;
mod watcher;

pub use chunk_index::{chunk_index_path, load_chunk_index, save_chunk_index, ChunkIndex, ChunkRecord};
pub use error::{IndexerError, Result};
pub use health::append_failure_reason;
pub use health::{health_file_path, read_health_snapshot, write_health_snapshot, HealthSnapshot};
pub use indexer::{IndexerConfig, ProjectIndexer};
pub use scanner::FileScanner;
pub use stats::{EnrichmentOutcome, IndexStats, IndexStatus, LanguageStats, ReindexStats};
pub use watcher::{IndexUpdate, IndexerHealth, StreamingIndexer, StreamingIndexerConfig};
