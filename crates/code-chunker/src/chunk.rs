use serde::{Deserialize, Serialize};

/// Coarse classification derived from the AST node-type string that produced
/// a chunk (see [`crate::chunker::classify_node_type`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Function,
    Class,
    Interface,
    Block,
}

impl ChunkType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Block => "block",
        }
    }
}

/// Per-chunk git signal, attached once git enrichment has run for the
/// chunk's file. Blame-derived fields are always present when `git` is
/// `Some`; churn-overlay and file-churn fields are only set once the
/// whole-history pass has covered the chunk/file respectively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitChunkMetadata {
    pub dominant_author: Option<String>,
    pub authors: Vec<String>,
    pub commit_shas: Vec<String>,
    pub first_commit_at: Option<i64>,
    pub last_commit_at: Option<i64>,
    pub last_commit_hash: Option<String>,
    pub age_days: Option<u64>,
    #[serde(default)]
    pub task_ids: Vec<String>,

    pub chunk_commit_count: Option<u32>,
    pub chunk_churn_ratio: Option<f64>,
    pub chunk_contributor_count: Option<u32>,
    pub chunk_bug_fix_rate: Option<f64>,
    pub chunk_last_modified_at: Option<i64>,
    pub chunk_age_days: Option<u64>,

    /// File-level whole-history metrics (§4.11), duplicated across every
    /// chunk of the same file.
    pub relative_churn: Option<f64>,
    pub recency_weighted_freq: Option<f64>,
    pub change_density: Option<f64>,
    pub churn_volatility: Option<f64>,
    pub bug_fix_rate: Option<f64>,
    pub contributor_count: Option<u32>,
    pub dominant_author_pct: Option<f64>,
}

/// Everything about a chunk other than its text and line span.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_path: String,
    pub language: String,
    pub chunk_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_type: Option<ChunkType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_id: Option<String>,
    #[serde(default)]
    pub is_documentation: bool,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitChunkMetadata>,
    /// Non-contiguous `(start, end)` line spans (1-based, inclusive) making
    /// up this chunk. Only populated by the Ruby class-body grouper, whose
    /// semantic groups (e.g. all `validates` calls in a class) can skip
    /// over interleaved lines that belong to other groups or to extracted
    /// method chunks. Empty for ordinary contiguous chunks, where
    /// `start_line..=end_line` already describes the span.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line_ranges: Vec<(usize, usize)>,
}

/// A contiguous span of source text plus everything known about it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeChunk {
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub metadata: ChunkMetadata,
}

impl CodeChunk {
    #[must_use]
    pub fn symbol_id(&self) -> Option<&str> {
        self.metadata.symbol_id.as_deref()
    }

    #[must_use]
    pub const fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}
