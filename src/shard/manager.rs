//! Shard manager (§4.8): the pure partitioning function every process must
//! compute identically.
//!
//! `NumShards` is required to be a perfect square `q²`; shard `i`'s
//! neighborhood is its row and column in the `q×q` grid (including itself).
//! This guarantees any two shards share at least one candidate for the
//! master of an edge between their vertex masters (§3 "Partitioning",
//! grounded on `original_source`'s `sharding_constraint::make_grid_constraint`).

use std::hash::Hasher;

use crate::error::{DbError, DbResult};
use crate::ids::{ShardId, VertexId};

#[derive(Debug, Clone)]
pub struct ShardManager {
    num_shards: u16,
    neighbors: Vec<Vec<ShardId>>,
}

impl ShardManager {
    pub fn new(num_shards: u16) -> DbResult<Self> {
        let q = (num_shards as f64).sqrt().round() as u16;
        if q == 0 || q * q != num_shards {
            return Err(DbError::InvalidCommand(format!(
                "num_shards {num_shards} is not a perfect square"
            )));
        }
        let neighbors = Self::grid_neighbors(num_shards, q);
        let manager = ShardManager {
            num_shards,
            neighbors,
        };
        manager.check_grid_invariant()?;
        Ok(manager)
    }

    fn grid_neighbors(num_shards: u16, q: u16) -> Vec<Vec<ShardId>> {
        let mut out = Vec::with_capacity(num_shards as usize);
        for i in 0..num_shards {
            let mut adj: Vec<ShardId> = vec![i];
            let row_begin = (i / q) * q;
            for j in row_begin..row_begin + q {
                if j != i {
                    adj.push(j);
                }
            }
            let mut j = i % q;
            while j < num_shards {
                if j != i {
                    adj.push(j);
                }
                j += q;
            }
            adj.sort_unstable();
            adj.dedup();
            out.push(adj);
        }
        out
    }

    fn check_grid_invariant(&self) -> DbResult<()> {
        for i in 0..self.num_shards {
            for j in (i + 1)..self.num_shards {
                if self.joint_neighbors(i, j).is_empty() {
                    return Err(DbError::InvalidCommand(format!(
                        "grid sharding constraint violated for shards {i}, {j}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn num_shards(&self) -> u16 {
        self.num_shards
    }

    pub fn neighbors(&self, shard: ShardId) -> &[ShardId] {
        &self.neighbors[shard as usize]
    }

    /// Sorted-merge intersection of two shards' neighbor lists, `O(|n_i| +
    /// |n_j|)`.
    pub fn joint_neighbors(&self, a: ShardId, b: ShardId) -> Vec<ShardId> {
        let ls1 = &self.neighbors[a as usize];
        let ls2 = &self.neighbors[b as usize];
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < ls1.len() && j < ls2.len() {
            match ls1[i].cmp(&ls2[j]) {
                std::cmp::Ordering::Equal => {
                    out.push(ls1[i]);
                    i += 1;
                    j += 1;
                }
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
            }
        }
        out
    }

    fn hash_vid(v: VertexId) -> u64 {
        let mut h = seahash::SeaHasher::default();
        h.write_u64(v);
        h.finish()
    }

    fn hash_edge(src: VertexId, dst: VertexId) -> u64 {
        let mut h = seahash::SeaHasher::default();
        h.write_u64(src);
        h.write_u64(dst);
        h.finish()
    }

    /// `master(V) = hash(V) mod NumShards`.
    pub fn master(&self, v: VertexId) -> ShardId {
        (Self::hash_vid(v) % self.num_shards as u64) as ShardId
    }

    /// `master(u,v) = candidates[hash((u,v)) mod |candidates|]`.
    pub fn master_edge(&self, src: VertexId, dst: VertexId) -> ShardId {
        let candidates = self.joint_neighbors(self.master(src), self.master(dst));
        debug_assert!(!candidates.is_empty(), "grid invariant guarantees this");
        let idx = (Self::hash_edge(src, dst) % candidates.len() as u64) as usize;
        candidates[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_perfect_square() {
        assert!(ShardManager::new(5).is_err());
        assert!(ShardManager::new(0).is_err());
    }

    #[test]
    fn accepts_perfect_squares() {
        for n in [1u16, 4, 9, 16, 25] {
            assert!(ShardManager::new(n).is_ok());
        }
    }

    #[test]
    fn joint_neighbors_always_non_empty() {
        let mgr = ShardManager::new(9).unwrap();
        for i in 0..9 {
            for j in 0..9 {
                assert!(!mgr.joint_neighbors(i, j).is_empty(), "{i},{j}");
            }
        }
    }

    #[test]
    fn master_edge_is_always_a_joint_neighbor() {
        let mgr = ShardManager::new(9).unwrap();
        for (u, v) in [(0u64, 1u64), (17, 900), (123456, 1), (9999999, 42)] {
            let shard = mgr.master_edge(u, v);
            let candidates = mgr.joint_neighbors(mgr.master(u), mgr.master(v));
            assert!(candidates.contains(&shard));
        }
    }

    #[test]
    fn master_is_deterministic() {
        let mgr = ShardManager::new(16).unwrap();
        for v in [0u64, 1, 42, u64::MAX] {
            assert_eq!(mgr.master(v), mgr.master(v));
        }
    }

    #[test]
    fn grid_neighbors_include_full_row_and_column() {
        // 3x3 grid: shard 4 (row 1, col 1) neighbors row {3,4,5} and col {1,4,7}.
        let mgr = ShardManager::new(9).unwrap();
        let mut expected = vec![1u16, 3, 4, 5, 7];
        expected.sort_unstable();
        assert_eq!(mgr.neighbors(4), expected.as_slice());
    }
}
