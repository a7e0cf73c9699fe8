use thiserror::Error;

pub type Result<T> = std::result::Result<T, GitEnrichmentError>;

#[derive(Error, Debug)]
pub enum GitEnrichmentError {
    #[error("not a git repository: {0}")]
    NotARepository(String),

    #[error(transparent)]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    VectorStore(#[from] context_vector_store::VectorStoreError),

    #[error("{0}")]
    Other(String),
}
