use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChunkerError>;

#[derive(Error, Debug)]
pub enum ChunkerError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("parse error in {path}: {reason}")]
    ParseError { path: String, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ChunkerError {
    #[must_use]
    pub fn unsupported_language(name: &str) -> Self {
        Self::UnsupportedLanguage(name.to_string())
    }
}
