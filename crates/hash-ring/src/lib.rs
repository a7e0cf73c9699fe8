//! Consistent-hash ring mapping a file path to one of N shards.
//!
//! Deterministic and immutable after construction: ring positions are
//! derived once from `"shard-<i>-vnode-<v>"` via MD5, and `get_shard`
//! binary-searches the sorted position table.

use md5::{Digest, Md5};

/// A consistent-hash ring over `shard_count` shards, each represented by
/// `virtual_nodes` points on the ring.
#[derive(Debug, Clone)]
pub struct HashRing {
    shard_count: usize,
    /// Sorted `(ring_position, shard_index)` pairs.
    positions: Vec<(u32, usize)>,
}

const DEFAULT_VIRTUAL_NODES: usize = 150;

impl HashRing {
    /// Build a new ring for `shard_count` shards (must be `>= 1`) using the
    /// default 150 virtual nodes per shard.
    #[must_use]
    pub fn new(shard_count: usize) -> Self {
        Self::with_virtual_nodes(shard_count, DEFAULT_VIRTUAL_NODES)
    }

    /// Build a new ring with an explicit virtual-node count per shard.
    #[must_use]
    pub fn with_virtual_nodes(shard_count: usize, virtual_nodes: usize) -> Self {
        let shard_count = shard_count.max(1);
        let mut positions = Vec::with_capacity(shard_count * virtual_nodes.max(1));

        for shard in 0..shard_count {
            for vnode in 0..virtual_nodes.max(1) {
                let label = format!("shard-{shard}-vnode-{vnode}");
                positions.push((ring_position(&label), shard));
            }
        }

        positions.sort_unstable_by_key(|(pos, _)| *pos);

        Self {
            shard_count,
            positions,
        }
    }

    #[must_use]
    pub const fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Map `path` to a shard index in `[0, shard_count)`.
    #[must_use]
    pub fn get_shard(&self, path: &str) -> usize {
        if self.shard_count == 1 {
            return 0;
        }

        let target = ring_position(path);
        match self.positions.binary_search_by_key(&target, |(pos, _)| *pos) {
            Ok(idx) => self.positions[idx].1,
            Err(idx) => {
                // First position >= target, wrapping to the start of the ring.
                let idx = if idx == self.positions.len() { 0 } else { idx };
                self.positions[idx].1
            }
        }
    }
}

/// Hash `label` with MD5 and read the first 4 bytes big-endian as the ring
/// position.
fn ring_position(label: &str) -> u32 {
    let digest = Md5::digest(label.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[test]
    fn single_shard_short_circuits() {
        let ring = HashRing::new(1);
        assert_eq!(ring.get_shard("any/path.rs"), 0);
        assert_eq!(ring.get_shard("other/path.py"), 0);
    }

    #[test]
    fn deterministic_for_same_path() {
        let ring = HashRing::new(8);
        let a = ring.get_shard("src/main.rs");
        let b = ring.get_shard("src/main.rs");
        assert_eq!(a, b);
    }

    #[test]
    fn all_shards_in_range() {
        let ring = HashRing::new(16);
        for i in 0..500 {
            let shard = ring.get_shard(&format!("path/to/file_{i}.rs"));
            assert!(shard < 16);
        }
    }

    #[test]
    fn distributes_across_shards() {
        let ring = HashRing::new(4);
        let mut seen = HashSet::new();
        for i in 0..2000 {
            seen.insert(ring.get_shard(&format!("file_{i}.rs")));
        }
        // With 2000 paths over 4 shards and 150 vnodes each, every shard
        // should get at least one path.
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn wraps_past_the_last_ring_position() {
        // A ring with a single virtual node per shard makes wraparound easy
        // to exercise: whichever path hashes past the highest position must
        // fall back to the first entry.
        let ring = HashRing::with_virtual_nodes(3, 1);
        let max_pos = ring.positions.last().copied().unwrap().0;
        // Brute-force a path whose hash is > max_pos, if one exists in a
        // small search space; otherwise the ring trivially covers the space.
        for i in 0..10_000u32 {
            let candidate = format!("probe-{i}");
            if ring_position(&candidate) > max_pos {
                let shard = ring.get_shard(&candidate);
                assert_eq!(shard, ring.positions[0].1);
                return;
            }
        }
    }
}
