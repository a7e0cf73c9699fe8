use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Chunker error: {0}")]
    ChunkerError(#[from] context_code_chunker::ChunkerError),

    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] context_vector_store::VectorStoreError),

    #[error("Snapshot error: {0}")]
    SnapshotError(#[from] context_snapshot_store::SnapshotError),

    #[error("Pipeline error: {0}")]
    PipelineError(#[from] context_pipeline::PipelineError),

    #[error("Git enrichment error: {0}")]
    GitEnrichmentError(#[from] context_git_enrichment::GitEnrichmentError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
