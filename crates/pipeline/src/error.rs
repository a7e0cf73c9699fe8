use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    VectorStore(#[from] context_vector_store::VectorStoreError),

    #[error("embedding provider error: {0}")]
    Embedding(String),

    #[error("{0}")]
    Other(String),
}
