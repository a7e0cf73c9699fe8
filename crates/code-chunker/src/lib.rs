//! Tree-sitter-aware source chunker.
//!
//! Breaks a source file into syntactically meaningful [`CodeChunk`]s:
//! top-level AST nodes of a per-language "chunkable" type, split further
//! when oversized, falling back to character chunking on parse failure or
//! for languages with no tree-sitter grammar wired in. Ruby class/module
//! bodies are additionally passed through [`ruby_grouper`] to merge DSL
//! declarations (`has_many`, `validates`, ...) into semantic groups.

mod chunk;
mod chunker;
mod contextual_imports;
mod error;
mod language;
mod ruby_grouper;

pub use chunk::{ChunkMetadata, ChunkType, CodeChunk, GitChunkMetadata};
pub use chunker::{classify_node_type, Chunker, ChunkerConfig};
pub use error::{ChunkerError, Result};
pub use language::{Language, LanguageSizeLimits};
pub use ruby_grouper::{classify_body_lines, BodyGroup};
