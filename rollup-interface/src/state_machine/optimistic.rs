//! Inputs of the fraud-proof protocol.
//!
//! A dispute names two adjacent committed transitions and supplies Merkle proofs for every
//! state component, because the composite state root commits to all four at once.
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::entities::{AccountInfo, GlobalInfo, StakingPoolInfo, StrategyInfo};
use crate::Hash;

/// Inclusion of one encoded transition in a committed block.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct TransitionProof {
    /// The block the transition was committed in.
    pub block_id: u64,
    /// Position of the transition inside the block.
    pub index: u64,
    /// The transition exactly as committed.
    pub transition: Vec<u8>,
    /// Sibling path against the block's root hash.
    pub siblings: Vec<Hash>,
}

/// Inclusion of an entity leaf in one of the state sub-trees.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct EntityProof<T> {
    /// The sub-tree root the leaf is proven against.
    pub state_root: Hash,
    /// Leaf index, equal to the entity id.
    pub index: u64,
    /// The entity, `None` for an empty leaf.
    pub value: Option<T>,
    /// Sibling path, leaf level first.
    pub siblings: Vec<Hash>,
}

/// Proof of an account leaf.
pub type AccountProof = EntityProof<AccountInfo>;
/// Proof of a strategy leaf.
pub type StrategyProof = EntityProof<StrategyInfo>;
/// Proof of a staking-pool leaf.
pub type StakingPoolProof = EntityProof<StakingPoolInfo>;

/// Pre-state witnesses of a disputed transition.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct DisputeProofs {
    /// One proof, or two for transfers. All share one account root.
    pub account_proofs: Vec<AccountProof>,
    /// Strategy proof. Supplied even when the transition touches no strategy.
    pub strategy_proof: StrategyProof,
    /// Staking-pool proof. Supplied even when the transition touches no pool.
    pub staking_pool_proof: StakingPoolProof,
    /// The global info of the pre-state.
    pub global_info: GlobalInfo,
}
