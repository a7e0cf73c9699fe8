use thiserror::Error;

pub type Result<T> = std::result::Result<T, SnapshotError>;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("shard {shard} checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        shard: usize,
        expected: String,
        actual: String,
    },

    #[error("snapshot metadata is corrupt: {0}")]
    CorruptMetadata(String),

    #[error("system time error: {0}")]
    SystemTimeError(#[from] std::time::SystemTimeError),

    #[error("{0}")]
    Other(String),
}
