//! Wire-level types shared by every [`crate::VectorStore`] operation.

use serde_json::{Map, Value};

/// A point's metadata. Backed by `serde_json::Map` rather than a fixed
/// struct since callers attach an open-ended set of fields (content,
/// relative path, optional chunk metadata, git signals, ...).
pub type Payload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Distance {
    #[default]
    Cosine,
    Euclid,
    Dot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    Weak,
    Medium,
    Strong,
}

/// Durability knobs threaded through every write operation. The default
/// favors throughput (`wait=false, ordering="weak"`); callers doing a
/// schema migration or the final batch of a bulk delete ask for `wait=true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub wait: bool,
    pub ordering: Ordering,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            wait: false,
            ordering: Ordering::Weak,
        }
    }
}

impl WriteOptions {
    #[must_use]
    pub const fn wait() -> Self {
        Self {
            wait: true,
            ordering: Ordering::Strong,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadIndexSchema {
    Keyword,
    Integer,
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HybridPoint {
    pub id: String,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// A boolean combination of equality checks over a point's payload. Covers
/// the only two shapes the core needs: an OR over a single field's values
/// (bulk delete by relative path) and a conjunction of equalities (schema
/// sentinel lookup, filtered search).
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equals { field: String, value: Value },
    AnyOf(Vec<Filter>),
    AllOf(Vec<Filter>),
}

impl Filter {
    #[must_use]
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// `field IN values`, expressed as an OR of equalities — the shape used
    /// by `deletePointsByPaths`.
    #[must_use]
    pub fn any_of_field(field: &str, values: impl IntoIterator<Item = String>) -> Self {
        Self::AnyOf(
            values
                .into_iter()
                .map(|v| Self::equals(field, v))
                .collect(),
        )
    }

    #[must_use]
    pub fn matches(&self, payload: &Payload) -> bool {
        match self {
            Self::Equals { field, value } => payload.get(field) == Some(value),
            Self::AnyOf(clauses) => clauses.iter().any(|c| c.matches(payload)),
            Self::AllOf(clauses) => clauses.iter().all(|c| c.matches(payload)),
        }
    }
}

/// Which points a payload write applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadTarget {
    Ids(Vec<String>),
    Filter(Filter),
}
