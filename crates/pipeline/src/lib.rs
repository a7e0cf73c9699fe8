//! Chunk pipeline (§4.7 / §2.9): batches chunks, embeds them through an
//! abstract [`EmbeddingProvider`], and upserts the result into an abstract
//! `VectorStore`. Sits between the chunker and the vector store — neither of
//! which this crate talks to directly except through their published traits.

mod embedding;
mod error;
mod payload;
mod pipeline;
mod point_id;

pub use embedding::EmbeddingProvider;
pub use error::{PipelineError, Result};
pub use payload::{build_payload, relative_path};
pub use pipeline::{ChunkPipeline, ChunkPipelineConfig, OnBatchUpserted, PipelineItem};
pub use point_id::normalize_point_id;
