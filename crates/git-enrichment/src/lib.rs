//! Git history enrichment (§4.10/§4.11): blame aggregation, whole-history
//! churn, and the chunk-level churn overlay, combined into per-chunk
//! [`context_code_chunker::GitChunkMetadata`] and written back through an
//! abstract `VectorStore`. Runs as a background pass after indexing; a repo
//! with no `.git` (or no `git` binary) degrades to a skipped, non-fatal run.

mod blame;
mod error;
mod log_reader;
mod overlay;
mod service;
mod task_ids;

pub use blame::{aggregate_chunk_blame, parse_log_bodies, parse_porcelain, run_blame, BlameCache, BlameLine, BlameMap, ChunkBlame};
pub use error::{GitEnrichmentError, Result};
pub use log_reader::{compute_file_metrics, CommitInfo, FileChurnData, FileChurnMetrics, GitLogReader};
pub use overlay::{compute_file_window, ChunkChurnOverlay, FileChurnWindow, DEFAULT_DEPTH_LIMIT, DEFAULT_MAX_FILE_LINES};
pub use service::{ChunkRef, EnrichmentReport, EnrichmentStatus, GitEnrichmentService};
pub use task_ids::extract_task_ids;
