//! Signal-normalizing weighted reranker (§4.12).
//!
//! A pure function over scored search results: derive a fixed signal vector
//! from each result's payload, combine it with a named preset (or custom)
//! weight set, and resort. Carries no dependency on the vector store or any
//! network client — it only reads `serde_json` payload values, the same
//! wire shape the pipeline writes.

mod bounds;
mod presets;
mod signals;

pub use bounds::SignalBounds;
pub use presets::Preset;

use serde_json::{Map, Value};

/// One candidate handed to [`rerank`]: a similarity score plus the payload
/// the vector store returned alongside it.
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    pub id: String,
    pub score: f64,
    pub payload: Map<String, Value>,
}

/// Either a named preset or an arbitrary custom weight set (signal name →
/// weight, including negative penalty weights).
#[derive(Debug, Clone)]
pub enum Mode {
    Preset(Preset),
    Custom(Vec<(String, f64)>),
}

impl Mode {
    #[must_use]
    pub fn weights(&self) -> Vec<(&str, f64)> {
        match self {
            Self::Preset(preset) => preset.weights().to_vec(),
            Self::Custom(weights) => weights.iter().map(|(k, v)| (k.as_str(), *v)).collect(),
        }
    }
}

/// Reranks `candidates` in place order (returns a new, possibly resorted
/// vector) per §4.12:
/// 1. compute each active signal, normalized to `[0,1]`;
/// 2. combine via weighted sum divided by `Σ|w|`;
/// 3. if the only active weight is `similarity`, return unchanged (no
///    resorting cost for the default preset); otherwise sort descending.
#[must_use]
pub fn rerank(candidates: Vec<RerankCandidate>, mode: &Mode, bounds: &SignalBounds) -> Vec<RerankCandidate> {
    let weights = mode.weights();
    if weights.len() == 1 && weights[0].0 == "similarity" {
        return candidates;
    }

    let sum_abs_weight: f64 = weights.iter().map(|(_, w)| w.abs()).sum();
    if sum_abs_weight == 0.0 {
        return candidates;
    }

    let mut scored: Vec<(f64, RerankCandidate)> = candidates
        .into_iter()
        .map(|candidate| {
            let combined: f64 = weights.iter().map(|(name, w)| w * signals::compute(name, &candidate, bounds)).sum::<f64>() / sum_abs_weight;
            (combined, candidate)
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(_, c)| c).collect()
}
