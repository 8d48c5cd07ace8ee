//! Binary Merkle trees over 32-byte leaves.
//!
//! Trees are perfect: a list of leaves is padded with [`ZERO_HASH`] up to the next power of
//! two (or up to an explicit depth), so an empty subtree of height `h` always hashes to
//! `zero_hashes(h)[h]`. Leaves and inner nodes are domain separated.
use thiserror::Error;

use super::hash;
use crate::{Hash, ZERO_HASH};

/// Prefix of every leaf preimage.
pub const DEFAULT_LEAF_DOMAIN_SEPARATOR: [u8; 1] = [0];
/// Prefix of every inner-node preimage.
pub const DEFAULT_INTERNAL_DOMAIN_SEPARATOR: [u8; 1] = [1];

/// Errors raised while building trees or replaying proofs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MerkleError {
    /// More leaves than a tree of the requested depth can hold.
    #[error("{leaves} leaves do not fit in a tree of depth {depth}")]
    TooManyLeaves {
        /// Number of leaves supplied.
        leaves: usize,
        /// Requested depth.
        depth: usize,
    },
    /// The index does not address a leaf of the tree.
    #[error("leaf index {index} is out of range for depth {depth}")]
    IndexOutOfRange {
        /// Offending index.
        index: u64,
        /// Depth of the tree.
        depth: usize,
    },
    /// Two proofs of different length were combined.
    #[error("proof depths differ: {0} != {1}")]
    DepthMismatch(usize, usize),
    /// A two-leaf update was requested for the same leaf twice.
    #[error("two-leaf update requires distinct indices, got {0} twice")]
    SameLeaf(u64),
}

/// Hashes raw bytes into a leaf.
pub fn leaf_hash(bytes: impl AsRef<[u8]>) -> Hash {
    let bytes = bytes.as_ref();
    let mut preimage = Vec::with_capacity(1 + bytes.len());
    preimage.extend_from_slice(&DEFAULT_LEAF_DOMAIN_SEPARATOR);
    preimage.extend_from_slice(bytes);
    hash(preimage)
}

/// Hashes two child nodes into their parent.
pub fn inner_hash(left: &Hash, right: &Hash) -> Hash {
    let mut preimage = [0u8; 65];
    preimage[..1].copy_from_slice(&DEFAULT_INTERNAL_DOMAIN_SEPARATOR);
    preimage[1..33].copy_from_slice(left);
    preimage[33..].copy_from_slice(right);
    hash(preimage)
}

/// Returns the roots of empty subtrees of height `0..=depth`.
pub fn zero_hashes(depth: usize) -> Vec<Hash> {
    let mut zeros = Vec::with_capacity(depth + 1);
    zeros.push(ZERO_HASH);
    for level in 0..depth {
        let below = zeros[level];
        zeros.push(inner_hash(&below, &below));
    }
    zeros
}

/// The root of a tree of the given depth with no leaves set.
pub fn empty_root(depth: usize) -> Hash {
    zero_hashes(depth)[depth]
}

/// The smallest depth whose tree holds `leaf_count` leaves.
pub fn depth_for(leaf_count: usize) -> usize {
    leaf_count.next_power_of_two().trailing_zeros() as usize
}

/// Computes the root of the smallest perfect tree holding `leaves`.
pub fn compute_root(leaves: &[Hash]) -> Hash {
    let depth = depth_for(leaves.len().max(1));
    // The depth is derived from the leaf count, so the leaves always fit.
    build(leaves, depth, &zero_hashes(depth))
}

/// Computes the root of a tree of `depth` whose first leaves are `leaves`.
pub fn compute_root_with_depth(leaves: &[Hash], depth: usize) -> Result<Hash, MerkleError> {
    ensure_fits(leaves.len(), depth)?;
    Ok(build(leaves, depth, &zero_hashes(depth)))
}

/// Produces the sibling path of `index` in the smallest perfect tree holding `leaves`.
pub fn generate_proof(leaves: &[Hash], index: u64) -> Result<Vec<Hash>, MerkleError> {
    generate_proof_with_depth(leaves, index, depth_for(leaves.len().max(1)))
}

/// Produces the sibling path of `index` in a tree of `depth` whose first leaves are `leaves`.
pub fn generate_proof_with_depth(
    leaves: &[Hash],
    index: u64,
    depth: usize,
) -> Result<Vec<Hash>, MerkleError> {
    ensure_fits(leaves.len(), depth)?;
    ensure_index(index, depth)?;

    let zeros = zero_hashes(depth);
    let mut level_nodes = leaves.to_vec();
    let mut siblings = Vec::with_capacity(depth);
    let mut position = index as usize;

    for level in 0..depth {
        let sibling = position ^ 1;
        siblings.push(level_nodes.get(sibling).copied().unwrap_or(zeros[level]));
        level_nodes = level_nodes
            .chunks(2)
            .map(|pair| inner_hash(&pair[0], pair.get(1).unwrap_or(&zeros[level])))
            .collect();
        position >>= 1;
    }

    Ok(siblings)
}

/// Recomputes the root implied by `leaf` sitting at `index` with the given sibling path.
pub fn compute_root_from_proof(leaf: &Hash, index: u64, siblings: &[Hash]) -> Hash {
    let mut node = *leaf;
    let mut position = index;
    for sibling in siblings {
        node = if position & 1 == 0 {
            inner_hash(&node, sibling)
        } else {
            inner_hash(sibling, &node)
        };
        position >>= 1;
    }
    node
}

/// Checks that `leaf` is included at `index` in the tree committed to by `root`.
///
/// The depth of the tree is the length of `siblings`; indices beyond it are rejected.
pub fn verify_proof(root: &Hash, leaf: &Hash, index: u64, siblings: &[Hash]) -> bool {
    ensure_index(index, siblings.len()).is_ok()
        && compute_root_from_proof(leaf, index, siblings) == *root
}

/// Recomputes the root after replacing two distinct leaves of the same tree.
///
/// Both sibling paths must come from the tree *before* either update. Where the path of `b`
/// passes next to the path of `a`, the updated node of `a` is used instead of the stale sibling.
pub fn compute_root_two_leaves(
    (leaf_a, index_a, siblings_a): (&Hash, u64, &[Hash]),
    (leaf_b, index_b, siblings_b): (&Hash, u64, &[Hash]),
) -> Result<Hash, MerkleError> {
    if siblings_a.len() != siblings_b.len() {
        return Err(MerkleError::DepthMismatch(
            siblings_a.len(),
            siblings_b.len(),
        ));
    }
    let depth = siblings_a.len();
    ensure_index(index_a, depth)?;
    ensure_index(index_b, depth)?;
    if index_a == index_b {
        return Err(MerkleError::SameLeaf(index_a));
    }

    let mut path_a = Vec::with_capacity(depth);
    let mut node = *leaf_a;
    let mut position = index_a;
    for sibling in siblings_a {
        path_a.push(node);
        node = if position & 1 == 0 {
            inner_hash(&node, sibling)
        } else {
            inner_hash(sibling, &node)
        };
        position >>= 1;
    }

    let mut node = *leaf_b;
    let mut position = index_b;
    for (level, sibling) in siblings_b.iter().enumerate() {
        let sibling = if index_a >> level == position ^ 1 {
            &path_a[level]
        } else {
            sibling
        };
        node = if position & 1 == 0 {
            inner_hash(&node, sibling)
        } else {
            inner_hash(sibling, &node)
        };
        position >>= 1;
    }

    Ok(node)
}

fn build(leaves: &[Hash], depth: usize, zeros: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return zeros[depth];
    }
    if depth == 0 {
        return leaves[0];
    }
    let half = 1usize << (depth - 1);
    let split = leaves.len().min(half);
    let left = build(&leaves[..split], depth - 1, zeros);
    let right = build(&leaves[split..], depth - 1, zeros);
    inner_hash(&left, &right)
}

fn ensure_fits(leaves: usize, depth: usize) -> Result<(), MerkleError> {
    if depth < usize::BITS as usize && leaves > 1usize << depth {
        return Err(MerkleError::TooManyLeaves { leaves, depth });
    }
    Ok(())
}

fn ensure_index(index: u64, depth: usize) -> Result<(), MerkleError> {
    if depth < u64::BITS as usize && index >> depth != 0 {
        return Err(MerkleError::IndexOutOfRange { index, depth });
    }
    Ok(())
}
