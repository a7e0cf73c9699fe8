//! Signal computation (§4.12 table). Reads directly from the JSON payload
//! shape `context-pipeline::build_payload` writes: top-level fields
//! (`startLine`, `endLine`, `isDocumentation`, `imports`, `relativePath`,
//! `chunkType`) plus a nested `git` object carrying blame/churn fields.

use serde_json::Value;

use crate::bounds::{normalize, SignalBounds};
use crate::RerankCandidate;

const RISKY_PATH_SUBSTRINGS: &[&str] = &["auth", "security", "crypto", "password", "secret", "token", "credential", "permission", "access"];

fn git(candidate: &RerankCandidate) -> Option<&serde_json::Map<String, Value>> {
    candidate.payload.get("git").and_then(Value::as_object)
}

fn git_f64(candidate: &RerankCandidate, field: &str) -> Option<f64> {
    git(candidate)?.get(field)?.as_f64()
}

fn git_u64(candidate: &RerankCandidate, field: &str) -> Option<u64> {
    git(candidate)?.get(field)?.as_u64()
}

/// Prefers the chunk-scoped field when present, falling back to the
/// file-scoped one (§4.12: "chunk-level fields are preferred when present").
fn preferred(candidate: &RerankCandidate, chunk_field: &str, file_field: &str) -> Option<f64> {
    git_f64(candidate, chunk_field).or_else(|| git_f64(candidate, file_field))
}

fn authors_len(candidate: &RerankCandidate) -> usize {
    git(candidate).and_then(|g| g.get("authors")).and_then(Value::as_array).map_or(0, Vec::len)
}

fn commit_count(candidate: &RerankCandidate) -> f64 {
    if let Some(n) = git_f64(candidate, "chunkCommitCount") {
        return n;
    }
    git(candidate).and_then(|g| g.get("commitShas")).and_then(Value::as_array).map_or(0.0, |a| a.len() as f64)
}

pub fn compute(name: &str, candidate: &RerankCandidate, bounds: &SignalBounds) -> f64 {
    match name {
        "similarity" => candidate.score,
        "recency" => {
            let age = preferred(candidate, "chunkAgeDays", "ageDays").unwrap_or(bounds.max_age_days);
            1.0 - normalize(age, bounds.max_age_days)
        }
        "age" => normalize(preferred(candidate, "chunkAgeDays", "ageDays").unwrap_or(0.0), bounds.max_age_days),
        "stability" => 1.0 - normalize(commit_count(candidate), bounds.max_commit_count),
        "churn" => normalize(commit_count(candidate), bounds.max_commit_count),
        "ownership" => {
            if let Some(pct) = git_f64(candidate, "dominantAuthorPct") {
                pct / 100.0
            } else {
                let n = authors_len(candidate);
                if n == 0 {
                    0.0
                } else {
                    1.0 / n as f64
                }
            }
        }
        "chunkSize" => {
            let start = candidate.payload.get("startLine").and_then(Value::as_u64).unwrap_or(0);
            let end = candidate.payload.get("endLine").and_then(Value::as_u64).unwrap_or(0);
            normalize(end.saturating_sub(start) as f64, bounds.max_chunk_size_lines)
        }
        "documentation" => {
            if candidate.payload.get("isDocumentation").and_then(Value::as_bool).unwrap_or(false) {
                1.0
            } else {
                0.0
            }
        }
        "imports" => {
            let n = candidate.payload.get("imports").and_then(Value::as_array).map_or(0, Vec::len);
            normalize(n as f64, bounds.max_imports)
        }
        "pathRisk" => {
            let path = candidate.payload.get("relativePath").and_then(Value::as_str).unwrap_or("").to_lowercase();
            if RISKY_PATH_SUBSTRINGS.iter().any(|needle| path.contains(needle)) {
                1.0
            } else {
                0.0
            }
        }
        "bugFix" => normalize(preferred(candidate, "chunkBugFixRate", "bugFixRate").unwrap_or(0.0), bounds.max_bug_fix_rate),
        "volatility" => normalize(git_f64(candidate, "churnVolatility").unwrap_or(0.0), bounds.max_volatility),
        "density" => normalize(git_f64(candidate, "changeDensity").unwrap_or(0.0), bounds.max_change_density),
        "chunkChurn" => normalize(git_f64(candidate, "chunkCommitCount").unwrap_or(0.0), bounds.max_chunk_commit_count),
        "relativeChurnNorm" => normalize(git_f64(candidate, "relativeChurn").unwrap_or(0.0), bounds.max_relative_churn),
        "chunkRelativeChurn" => git_f64(candidate, "chunkChurnRatio").unwrap_or(0.0).clamp(0.0, 1.0),
        "burstActivity" => normalize(git_f64(candidate, "recencyWeightedFreq").unwrap_or(0.0), bounds.max_burst_activity),
        "knowledgeSilo" => {
            let contributors = preferred(candidate, "chunkContributorCount", "contributorCount");
            match contributors.map(|c| c.round() as u64) {
                Some(1) => 1.0,
                Some(2) => 0.5,
                Some(n) if n >= 3 => 0.0,
                _ => 0.0,
            }
        }
        "blockPenalty" => {
            let is_block = candidate.payload.get("chunkType").and_then(Value::as_str) == Some("block");
            let has_commit_count = git_u64(candidate, "chunkCommitCount").is_some();
            if is_block && !has_commit_count {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}
