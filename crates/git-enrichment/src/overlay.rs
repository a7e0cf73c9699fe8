//! Chunk-level churn overlay (§4.11 step 4): for a bounded window of the most
//! recent commits touching a file, diffs trees and attributes each touched
//! line range to its commit, so a chunk's overlay is "how many of the recent
//! commits to this file touched lines inside me".

use std::path::Path;

use git2::{DiffOptions, Patch, Repository, Sort};

use crate::error::Result;

pub const DEFAULT_DEPTH_LIMIT: usize = 200;
pub const DEFAULT_MAX_FILE_LINES: usize = 10_000;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChunkChurnOverlay {
    pub chunk_commit_count: u32,
    /// Already normalized to `[0, 1]` — fraction of the examined window's
    /// commits that touched this chunk's line range.
    pub chunk_churn_ratio: f64,
}

/// Per-file window of recent commit/hunk touches, built once and then
/// queried per chunk.
pub struct FileChurnWindow {
    commits_examined: u32,
    /// `(commit sha, hunk new-side start line, hunk new-side line count)`.
    touches: Vec<(String, u32, u32)>,
}

impl FileChurnWindow {
    #[must_use]
    pub fn chunk_overlay(&self, start_line: usize, end_line: usize) -> ChunkChurnOverlay {
        let mut touching_shas: Vec<&str> = Vec::new();
        for (sha, new_start, new_lines) in &self.touches {
            let hunk_start = *new_start as usize;
            let hunk_end = if *new_lines == 0 { hunk_start } else { hunk_start + (*new_lines as usize) - 1 };
            let overlaps = hunk_start <= end_line && hunk_end >= start_line;
            if overlaps && !touching_shas.contains(&sha.as_str()) {
                touching_shas.push(sha.as_str());
            }
        }

        let chunk_commit_count = touching_shas.len() as u32;
        let chunk_churn_ratio = if self.commits_examined == 0 {
            0.0
        } else {
            (chunk_commit_count as f64 / self.commits_examined as f64).min(1.0)
        };

        ChunkChurnOverlay { chunk_commit_count, chunk_churn_ratio }
    }
}

/// Builds the churn window for one file. Returns `Ok(None)` when the file's
/// current line count exceeds `max_file_lines` (skipped per
/// `GIT_CHUNK_MAX_FILE_LINES`, §6).
pub fn compute_file_window(repo_root: &Path, rel_path: &str, depth_limit: usize, max_file_lines: usize, current_line_count: usize) -> Result<Option<FileChurnWindow>> {
    if current_line_count > max_file_lines {
        return Ok(None);
    }

    let repo = Repository::open(repo_root)?;
    let mut walk = repo.revwalk()?;
    walk.push_head()?;
    walk.set_sorting(Sort::TIME)?;

    let mut diffopts = DiffOptions::new();
    diffopts.pathspec(rel_path);

    let mut touches = Vec::new();
    let mut commits_examined = 0u32;

    for oid in walk {
        if commits_examined as usize >= depth_limit {
            break;
        }
        let oid = oid?;
        let commit = repo.find_commit(oid)?;
        let tree = commit.tree()?;
        let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());
        let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut diffopts))?;

        if diff.deltas().len() == 0 {
            continue;
        }
        commits_examined += 1;
        let sha = commit.id().to_string();

        for delta_idx in 0..diff.deltas().len() {
            let Some(patch) = Patch::from_diff(&diff, delta_idx)? else {
                continue;
            };
            for hunk_idx in 0..patch.num_hunks() {
                let (hunk, _lines) = patch.hunk(hunk_idx)?;
                touches.push((sha.clone(), hunk.new_start(), hunk.new_lines()));
            }
        }
    }

    Ok(Some(FileChurnWindow { commits_examined, touches }))
}
