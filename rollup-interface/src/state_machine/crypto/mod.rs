//! Defines the cryptographic primitives that are needed by every rollup component.
pub mod merkle;
pub mod signature;
mod sparse_tree;

use borsh::BorshSerialize;
use sha2::{Digest, Sha256};
pub use sparse_tree::SparseStateTree;
use tiny_keccak::{Hasher, Keccak};

use crate::Hash;

/// The commitment hash used for Merkle nodes, entity leaves and content hashes.
pub fn hash(bytes: impl AsRef<[u8]>) -> Hash {
    Sha256::digest(bytes.as_ref()).into()
}

/// Hashes the borsh encoding of `value`.
pub fn hash_encoded<T: BorshSerialize>(value: &T) -> Hash {
    // Serialization to a vector is infallible.
    let encoded = value
        .try_to_vec()
        .expect("Serialization to vec is infallible");
    hash(encoded)
}

/// The base-ledger hash, used for signed messages and address derivation.
pub fn keccak256(bytes: impl AsRef<[u8]>) -> Hash {
    let mut hasher = Keccak::v256();
    hasher.update(bytes.as_ref());
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}
