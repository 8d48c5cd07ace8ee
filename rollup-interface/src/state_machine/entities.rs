//! Ledger entities and the composite state commitment.
//!
//! Accounts, strategies and staking pools are leaves of three fixed-depth Merkle trees, keyed by
//! their id. The global info is small and is hashed directly. The state root is the hash of the
//! three sub-tree roots and the global-info hash.
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::crypto::{hash, merkle};
use crate::{AccountId, Address, AggregateId, AssetId, Hash, PoolId, StrategyId, ZERO_HASH};

/// Depth of the account tree.
pub const ACCOUNT_TREE_DEPTH: usize = 32;
/// Depth of the strategy tree.
pub const STRATEGY_TREE_DEPTH: usize = 16;
/// Depth of the staking-pool tree.
pub const STAKING_POOL_TREE_DEPTH: usize = 16;

/// Largest strategy id, the last leaf of the strategy tree.
pub const MAX_STRATEGY_ID: StrategyId = (1 << STRATEGY_TREE_DEPTH) - 1;
/// Largest staking-pool id, the last leaf of the staking-pool tree.
pub const MAX_POOL_ID: PoolId = (1 << STAKING_POOL_TREE_DEPTH) - 1;
/// Largest asset id. Balances are vectors indexed by asset id, so this bounds their length.
pub const MAX_ASSET_ID: AssetId = u16::MAX as AssetId;

fn slot<T: Default>(values: &mut Vec<T>, index: u32) -> &mut T {
    let index = index as usize;
    if values.len() <= index {
        values.resize_with(index + 1, T::default);
    }
    &mut values[index]
}

fn read<T: Copy + Default>(values: &[T], index: u32) -> T {
    values.get(index as usize).copied().unwrap_or_default()
}

/// An account's contribution to one aggregate order of one strategy.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct PendingAccountInfo {
    pub aggregate_id: AggregateId,
    pub buy_amount: u128,
    pub buy_fees: u128,
    pub sell_shares: u128,
    pub sell_fees: u128,
}

/// A rollup account. Vectors are indexed by id and grow on first use.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct AccountInfo {
    /// Base-ledger owner of the account.
    pub account: Address,
    /// Leaf index in the account tree.
    pub account_id: AccountId,
    /// Uncommitted balances by asset id.
    pub idle_assets: Vec<u128>,
    /// Strategy shares by strategy id.
    pub shares: Vec<u128>,
    /// In-flight buys and sells by strategy id, oldest aggregate first.
    pub pending: Vec<Vec<PendingAccountInfo>>,
    /// Raw staked shares by pool id.
    pub staked_shares: Vec<u128>,
    /// Adjusted stakes by pool id.
    pub stakes: Vec<u128>,
    /// Reward debts by pool id, then by reward-asset position.
    pub reward_debts: Vec<Vec<u128>>,
    /// Timestamp of the last signed transition. Strictly increasing.
    pub timestamp: u64,
}

impl AccountInfo {
    /// A fresh account.
    pub fn new(account: Address, account_id: AccountId) -> Self {
        Self {
            account,
            account_id,
            ..Default::default()
        }
    }

    /// Idle balance of an asset.
    pub fn idle_asset(&self, asset_id: AssetId) -> u128 {
        read(&self.idle_assets, asset_id)
    }

    /// Mutable idle balance of an asset.
    pub fn idle_asset_mut(&mut self, asset_id: AssetId) -> &mut u128 {
        slot(&mut self.idle_assets, asset_id)
    }

    /// Shares held in a strategy.
    pub fn share(&self, strategy_id: StrategyId) -> u128 {
        read(&self.shares, strategy_id)
    }

    /// Mutable shares held in a strategy.
    pub fn share_mut(&mut self, strategy_id: StrategyId) -> &mut u128 {
        slot(&mut self.shares, strategy_id)
    }

    /// Pending entries for a strategy.
    pub fn pending_mut(&mut self, strategy_id: StrategyId) -> &mut Vec<PendingAccountInfo> {
        slot(&mut self.pending, strategy_id)
    }

    /// Staked shares in a pool.
    pub fn staked_share(&self, pool_id: u32) -> u128 {
        read(&self.staked_shares, pool_id)
    }

    /// Mutable staked shares in a pool.
    pub fn staked_share_mut(&mut self, pool_id: u32) -> &mut u128 {
        slot(&mut self.staked_shares, pool_id)
    }

    /// Adjusted stake in a pool.
    pub fn stake(&self, pool_id: u32) -> u128 {
        read(&self.stakes, pool_id)
    }

    /// Mutable adjusted stake in a pool.
    pub fn stake_mut(&mut self, pool_id: u32) -> &mut u128 {
        slot(&mut self.stakes, pool_id)
    }

    /// Mutable reward debts in a pool, sized to `rewards` entries.
    pub fn reward_debts_mut(&mut self, pool_id: u32, rewards: usize) -> &mut Vec<u128> {
        let debts = slot(&mut self.reward_debts, pool_id);
        if debts.len() < rewards {
            debts.resize(rewards, 0);
        }
        debts
    }
}

/// One outstanding aggregate order of a strategy.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct PendingStrategyInfo {
    pub aggregate_id: AggregateId,
    pub max_share_price_for_buy: u128,
    pub min_share_price_for_sell: u128,
    pub buy_amount: u128,
    pub sell_shares: u128,
    pub shares_from_buy: u128,
    pub amount_from_sell: u128,
    pub unsettled_buy_amount: u128,
    pub unsettled_sell_shares: u128,
    pub execution_succeed: bool,
}

/// A strategy leaf.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct StrategyInfo {
    /// The asset the strategy is bought with.
    pub asset_id: AssetId,
    /// Total shares held by rollup accounts.
    pub share_supply: u128,
    /// Id of the aggregate currently being collected.
    pub next_aggregate_id: AggregateId,
    /// Id of the last aggregate whose execution result was applied.
    pub last_exec_aggregate_id: AggregateId,
    /// Aggregates that are collecting, executing or awaiting settlement.
    pub pending: Vec<PendingStrategyInfo>,
}

impl StrategyInfo {
    /// A strategy bound to an asset, collecting its first aggregate.
    pub fn new(asset_id: AssetId) -> Self {
        Self {
            asset_id,
            next_aggregate_id: 1,
            ..Default::default()
        }
    }

    /// The pending entry of an aggregate.
    pub fn pending_mut(&mut self, aggregate_id: AggregateId) -> Option<&mut PendingStrategyInfo> {
        self.pending
            .iter_mut()
            .find(|p| p.aggregate_id == aggregate_id)
    }
}

/// A staking-pool leaf.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct StakingPoolInfo {
    /// Strategy whose shares are staked.
    pub strategy_id: StrategyId,
    /// Assets paid out as rewards.
    pub reward_asset_ids: Vec<AssetId>,
    /// Emission per epoch, parallel to `reward_asset_ids`.
    pub reward_per_epoch: Vec<u128>,
    /// Raw staked shares.
    pub total_shares: u128,
    /// Sum of adjusted stakes.
    pub total_stakes: u128,
    /// Rewards per unit of adjusted stake, scaled, parallel to `reward_asset_ids`.
    pub accumulated_reward_per_unit: Vec<u128>,
    /// Epoch up to which rewards are accounted.
    pub last_reward_epoch: u64,
    /// Curvature of the adjusted-stake curve, scaled.
    pub stake_adjustment_factor: u128,
    /// First epoch that emits rewards.
    pub start_epoch: u64,
}

/// Operator fees pending transfer.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct OperatorFees {
    /// Fees by asset id.
    pub assets: Vec<u128>,
    /// Fees by strategy id, in shares.
    pub shares: Vec<u128>,
}

/// State that is not keyed by id.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct GlobalInfo {
    /// Protocol fees pending withdrawal, by asset id.
    pub protocol_fees: Vec<u128>,
    /// Operator fees pending transfer.
    pub op_fees: OperatorFees,
    /// The staking-reward clock.
    pub curr_epoch: u64,
    /// Reward pools, by asset id.
    pub rewards: Vec<u128>,
}

impl GlobalInfo {
    /// Mutable protocol fees of an asset.
    pub fn protocol_fee_mut(&mut self, asset_id: AssetId) -> &mut u128 {
        slot(&mut self.protocol_fees, asset_id)
    }

    /// Mutable operator fees of an asset.
    pub fn op_fee_asset_mut(&mut self, asset_id: AssetId) -> &mut u128 {
        slot(&mut self.op_fees.assets, asset_id)
    }

    /// Mutable operator fees of a strategy, in shares.
    pub fn op_fee_share_mut(&mut self, strategy_id: StrategyId) -> &mut u128 {
        slot(&mut self.op_fees.shares, strategy_id)
    }

    /// Reward pool of an asset.
    pub fn reward(&self, asset_id: AssetId) -> u128 {
        read(&self.rewards, asset_id)
    }

    /// Mutable reward pool of an asset.
    pub fn reward_mut(&mut self, asset_id: AssetId) -> &mut u128 {
        slot(&mut self.rewards, asset_id)
    }

    /// Direct hash of the global info, the fourth component of the state root.
    pub fn hash(&self) -> Hash {
        crate::crypto::hash_encoded(self)
    }
}

/// An entity stored as a leaf of one of the state trees.
pub trait StateLeaf: BorshSerialize {
    /// The leaf hash of this entity.
    fn leaf_hash(&self) -> Hash {
        let encoded = self
            .try_to_vec()
            .expect("Serialization to vec is infallible");
        merkle::leaf_hash(encoded)
    }
}

impl StateLeaf for AccountInfo {}
impl StateLeaf for StrategyInfo {}
impl StateLeaf for StakingPoolInfo {}

/// The leaf hash of an optional entity. Absent entities are empty leaves.
pub fn leaf_hash_of<T: StateLeaf>(entity: Option<&T>) -> Hash {
    entity.map(StateLeaf::leaf_hash).unwrap_or(ZERO_HASH)
}

/// The four components of a state root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateRoots {
    /// Root of the account tree.
    pub account_root: Hash,
    /// Root of the strategy tree.
    pub strategy_root: Hash,
    /// Root of the staking-pool tree.
    pub staking_pool_root: Hash,
    /// Hash of the global info.
    pub global_info_hash: Hash,
}

impl StateRoots {
    /// The composite state root.
    pub fn composite(&self) -> Hash {
        composite_state_root(
            &self.account_root,
            &self.strategy_root,
            &self.staking_pool_root,
            &self.global_info_hash,
        )
    }
}

/// Hashes the sub-tree roots and the global-info hash into the state root.
pub fn composite_state_root(
    account_root: &Hash,
    strategy_root: &Hash,
    staking_pool_root: &Hash,
    global_info_hash: &Hash,
) -> Hash {
    let mut preimage = [0u8; 128];
    preimage[..32].copy_from_slice(account_root);
    preimage[32..64].copy_from_slice(strategy_root);
    preimage[64..96].copy_from_slice(staking_pool_root);
    preimage[96..].copy_from_slice(global_info_hash);
    hash(preimage)
}

/// The sub-roots of a ledger with no entities and default global info.
pub fn empty_state_roots() -> StateRoots {
    StateRoots {
        account_root: merkle::empty_root(ACCOUNT_TREE_DEPTH),
        strategy_root: merkle::empty_root(STRATEGY_TREE_DEPTH),
        staking_pool_root: merkle::empty_root(STAKING_POOL_TREE_DEPTH),
        global_info_hash: GlobalInfo::default().hash(),
    }
}

/// The state root the Init transition must claim.
pub fn empty_state_root() -> Hash {
    empty_state_roots().composite()
}
