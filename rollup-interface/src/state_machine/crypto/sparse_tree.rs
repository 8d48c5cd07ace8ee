use std::collections::BTreeMap;

use super::merkle::{inner_hash, zero_hashes, MerkleError};
use crate::{Hash, ZERO_HASH};

/// A fixed-depth Merkle tree that only stores its non-empty leaves.
///
/// Used by operators to maintain the account, strategy and staking-pool trees, and to
/// produce the sibling paths a disputer needs. Empty ranges are resolved from the
/// precomputed zero hashes instead of being walked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseStateTree {
    depth: usize,
    leaves: BTreeMap<u64, Hash>,
    zero_hashes: Vec<Hash>,
}

impl SparseStateTree {
    /// Creates an empty tree of the given depth.
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            leaves: BTreeMap::new(),
            zero_hashes: zero_hashes(depth),
        }
    }

    /// Depth of the tree, i.e. the length of every sibling path.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns the leaf at `index`, or [`ZERO_HASH`] if unset.
    pub fn leaf(&self, index: u64) -> Hash {
        self.leaves.get(&index).copied().unwrap_or(ZERO_HASH)
    }

    /// Sets the leaf at `index`. Setting [`ZERO_HASH`] clears it.
    pub fn set(&mut self, index: u64, leaf: Hash) -> Result<(), MerkleError> {
        self.check_index(index)?;
        if leaf == ZERO_HASH {
            self.leaves.remove(&index);
        } else {
            self.leaves.insert(index, leaf);
        }
        Ok(())
    }

    /// The current root.
    pub fn root(&self) -> Hash {
        self.node(self.depth, 0)
    }

    /// The sibling path of `index`, from the leaf level upwards.
    pub fn proof(&self, index: u64) -> Result<Vec<Hash>, MerkleError> {
        self.check_index(index)?;
        Ok((0..self.depth)
            .map(|level| self.node(level, (index >> level) ^ 1))
            .collect())
    }

    fn node(&self, level: usize, index: u64) -> Hash {
        if level == 0 {
            return self.leaf(index);
        }
        let first = index << level;
        let last = first + ((1u64 << level) - 1);
        if self.leaves.range(first..=last).next().is_none() {
            return self.zero_hashes[level];
        }
        let left = self.node(level - 1, index << 1);
        let right = self.node(level - 1, (index << 1) | 1);
        inner_hash(&left, &right)
    }

    fn check_index(&self, index: u64) -> Result<(), MerkleError> {
        if index >> self.depth != 0 {
            return Err(MerkleError::IndexOutOfRange {
                index,
                depth: self.depth,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::merkle::{compute_root_with_depth, leaf_hash, verify_proof};

    #[test]
    fn matches_dense_tree() {
        let mut tree = SparseStateTree::new(4);
        let mut dense = vec![ZERO_HASH; 16];
        for index in [1u64, 6, 7, 15] {
            let leaf = leaf_hash(index.to_le_bytes());
            tree.set(index, leaf).unwrap();
            dense[index as usize] = leaf;
        }
        assert_eq!(tree.root(), compute_root_with_depth(&dense, 4).unwrap());

        let proof = tree.proof(6).unwrap();
        assert!(verify_proof(&tree.root(), &dense[6], 6, &proof));
    }

    #[test]
    fn clearing_a_leaf_restores_empty_root() {
        let mut tree = SparseStateTree::new(32);
        let empty = tree.root();
        tree.set(1 << 20, leaf_hash(b"account")).unwrap();
        assert_ne!(tree.root(), empty);
        tree.set(1 << 20, ZERO_HASH).unwrap();
        assert_eq!(tree.root(), empty);
    }

    #[test]
    fn rejects_index_beyond_depth() {
        let mut tree = SparseStateTree::new(2);
        assert!(tree.set(4, leaf_hash(b"x")).is_err());
        assert!(tree.proof(4).is_err());
    }
}
