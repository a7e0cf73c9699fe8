//! Reciprocal Rank Fusion over two ranked result lists, keyed by point id.

use crate::point::ScoredPoint;
use std::collections::HashMap;

/// RRF constant. Qdrant and most hybrid-search write-ups use 60; nothing in
/// this crate's contract calls for a different value.
const RRF_K: f32 = 60.0;

/// Fuses a dense and a sparse prefetch into a single ranking: each list
/// contributes `1 / (k + rank)` per point (rank is 1-based), summed across
/// lists, then sorted descending and truncated to `limit`.
#[must_use]
pub fn reciprocal_rank_fusion(dense: &[ScoredPoint], sparse: &[ScoredPoint], limit: usize) -> Vec<ScoredPoint> {
    let mut fused: HashMap<String, f32> = HashMap::new();
    let mut payloads: HashMap<String, ScoredPoint> = HashMap::new();

    for (rank, point) in dense.iter().enumerate() {
        *fused.entry(point.id.clone()).or_insert(0.0) += 1.0 / (RRF_K + rank as f32 + 1.0);
        payloads.entry(point.id.clone()).or_insert_with(|| point.clone());
    }
    for (rank, point) in sparse.iter().enumerate() {
        *fused.entry(point.id.clone()).or_insert(0.0) += 1.0 / (RRF_K + rank as f32 + 1.0);
        payloads.entry(point.id.clone()).or_insert_with(|| point.clone());
    }

    let mut results: Vec<ScoredPoint> = fused
        .into_iter()
        .filter_map(|(id, score)| {
            payloads.remove(&id).map(|p| ScoredPoint {
                id,
                score,
                payload: p.payload,
            })
        })
        .collect();
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(limit);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn point(id: &str) -> ScoredPoint {
        ScoredPoint {
            id: id.to_string(),
            score: 0.0,
            payload: Map::new(),
        }
    }

    #[test]
    fn points_present_in_both_lists_rank_above_single_list_hits() {
        let dense = vec![point("a"), point("b"), point("c")];
        let sparse = vec![point("c"), point("a"), point("d")];

        let fused = reciprocal_rank_fusion(&dense, &sparse, 10);
        assert_eq!(fused[0].id, "a");
    }

    #[test]
    fn result_is_truncated_to_limit() {
        let dense = vec![point("a"), point("b"), point("c")];
        let sparse = vec![];

        let fused = reciprocal_rank_fusion(&dense, &sparse, 2);
        assert_eq!(fused.len(), 2);
    }
}
