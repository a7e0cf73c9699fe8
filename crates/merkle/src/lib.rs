//! Merkle tree over a `path -> content-hash` map.
//!
//! Leaves are `SHA-256(path || hash)` in lexicographic path order; inner
//! nodes are `SHA-256(left || right)`, duplicating the last leaf on odd
//! levels. The root hash is the snapshot's identity: equal roots imply
//! equal file sets.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// A built Merkle tree. Only the root hash and leaf count are retained;
/// intermediate levels aren't needed once the root is computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    root_hash: String,
    leaf_count: usize,
}

impl MerkleTree {
    /// Build a tree from a `path -> content-hash` map. Keys are sorted
    /// lexicographically so the same file set always yields the same tree
    /// regardless of map iteration order.
    #[must_use]
    pub fn build(files: &BTreeMap<String, String>) -> Self {
        if files.is_empty() {
            return Self {
                root_hash: hex::encode(Sha256::digest(b"")),
                leaf_count: 0,
            };
        }

        let mut level: Vec<String> = files
            .iter()
            .map(|(path, hash)| leaf_hash(path, hash))
            .collect();

        while level.len() > 1 {
            level = combine_level(&level);
        }

        Self {
            root_hash: level.into_iter().next().expect("non-empty level"),
            leaf_count: files.len(),
        }
    }

    #[must_use]
    pub fn root_hash(&self) -> &str {
        &self.root_hash
    }

    #[must_use]
    pub const fn leaf_count(&self) -> usize {
        self.leaf_count
    }
}

fn leaf_hash(path: &str, content_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(content_hash.as_bytes());
    hex::encode(hasher.finalize())
}

fn combine_level(level: &[String]) -> Vec<String> {
    let mut next = Vec::with_capacity(level.len().div_ceil(2));
    let mut iter = level.chunks(2);
    while let Some(pair) = iter.next() {
        let left = &pair[0];
        let right = pair.get(1).unwrap_or(left); // duplicate last leaf on odd levels
        let mut hasher = Sha256::new();
        hasher.update(left.as_bytes());
        hasher.update(right.as_bytes());
        next.push(hex::encode(hasher.finalize()));
    }
    next
}

/// Result of comparing two `path -> content-hash` maps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    pub added: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
    pub modified: BTreeSet<String>,
}

impl DiffResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.modified.is_empty()
    }
}

/// Diff two file-hash maps into `{added, deleted, modified}`. Short-circuits
/// to an empty result when both maps build to the same Merkle root.
#[must_use]
pub fn compare(prev: &BTreeMap<String, String>, curr: &BTreeMap<String, String>) -> DiffResult {
    if MerkleTree::build(prev).root_hash() == MerkleTree::build(curr).root_hash() {
        return DiffResult::default();
    }

    let mut added = BTreeSet::new();
    let mut deleted = BTreeSet::new();
    let mut modified = BTreeSet::new();

    for (path, curr_hash) in curr {
        match prev.get(path) {
            None => {
                added.insert(path.clone());
            }
            Some(prev_hash) if prev_hash != curr_hash => {
                modified.insert(path.clone());
            }
            Some(_) => {}
        }
    }

    for path in prev.keys() {
        if !curr.contains_key(path) {
            deleted.insert(path.clone());
        }
    }

    DiffResult {
        added,
        deleted,
        modified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn same_file_sets_yield_same_root() {
        let a = map(&[("a.rs", "h1"), ("b.rs", "h2")]);
        let b = map(&[("b.rs", "h2"), ("a.rs", "h1")]);
        assert_eq!(MerkleTree::build(&a).root_hash(), MerkleTree::build(&b).root_hash());
    }

    #[test]
    fn different_hash_changes_root() {
        let a = map(&[("a.rs", "h1")]);
        let b = map(&[("a.rs", "h2")]);
        assert_ne!(MerkleTree::build(&a).root_hash(), MerkleTree::build(&b).root_hash());
    }

    #[test]
    fn odd_leaf_count_duplicates_last() {
        let three = map(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let tree = MerkleTree::build(&three);
        assert_eq!(tree.leaf_count(), 3);
        assert!(!tree.root_hash().is_empty());
    }

    #[test]
    fn compare_identical_sets_is_empty() {
        let a = map(&[("a.rs", "h1"), ("b.rs", "h2")]);
        let diff = compare(&a, &a.clone());
        assert!(diff.is_empty());
    }

    #[test]
    fn compare_detects_added_modified_deleted() {
        let prev = map(&[("a.rs", "h1"), ("b.rs", "h2"), ("c.rs", "h3")]);
        let curr = map(&[("a.rs", "h1"), ("b.rs", "h2-changed"), ("d.rs", "h4")]);
        let diff = compare(&prev, &curr);
        assert_eq!(diff.added, BTreeSet::from(["d.rs".to_string()]));
        assert_eq!(diff.deleted, BTreeSet::from(["c.rs".to_string()]));
        assert_eq!(diff.modified, BTreeSet::from(["b.rs".to_string()]));
    }

    #[test]
    fn empty_tree_has_stable_root() {
        let empty: BTreeMap<String, String> = BTreeMap::new();
        let t1 = MerkleTree::build(&empty);
        let t2 = MerkleTree::build(&empty);
        assert_eq!(t1, t2);
        assert_eq!(t1.leaf_count(), 0);
    }
}
