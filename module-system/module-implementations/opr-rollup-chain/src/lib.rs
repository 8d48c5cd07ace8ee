#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod call;
pub mod config;
pub mod genesis;
pub mod query;

use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
pub use call::{CallContext, CallMessage, Collaborators, RollupChainError};
pub use genesis::RollupChainConfig;
use opr_priority_queues::PriorityQueues;
use opr_rollup_interface::crypto::hash_encoded;
use opr_rollup_interface::{Address, AggregateId, AssetId, Hash, StrategyId};
use opr_state::{Prefix, StateMap, StateValue, StateVec};
use serde::{Deserialize, Serialize};

/// Value of [`Block::intent_exec_count`] once every intent of the block was executed.
pub const INTENT_EXECUTED: u32 = u32::MAX;

/// A committed block of transitions.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Block {
    /// Merkle root over the encoded transitions.
    pub root_hash: Hash,
    /// Digest of the block's intents, see [`intent_hash`].
    pub intent_hash: Hash,
    /// Intents executed so far, or [`INTENT_EXECUTED`].
    pub intent_exec_count: u32,
    /// Base-ledger height at commit time. The challenge window is measured from here.
    pub block_time: u64,
    /// Number of transitions in the block.
    pub block_size: u64,
}

impl Block {
    /// True once every intent was executed.
    pub fn is_executed(&self) -> bool {
        self.intent_exec_count == INTENT_EXECUTED
    }
}

/// Why the chain stopped accepting blocks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum HaltReason {
    /// A transition of block `batch_id` was proven fraudulent and the ledger rolled back to it.
    Fraud {
        /// The reverted block.
        batch_id: u64,
    },
    /// The operator left a priority event out of the ledger for too long.
    PriorityDelay,
}

/// Whether the chain accepts commits, executions and withdrawals.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub enum ChainStatus {
    /// Normal operation.
    #[default]
    Active,
    /// Paused by the owner.
    Paused,
    /// Stopped by a dispute.
    Halted(HaltReason),
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainStatus::Active => write!(f, "active"),
            ChainStatus::Paused => write!(f, "paused"),
            ChainStatus::Halted(HaltReason::Fraud { batch_id }) => {
                write!(f, "halted after fraud in block {batch_id}")
            }
            ChainStatus::Halted(HaltReason::PriorityDelay) => {
                write!(f, "halted on priority delay")
            }
        }
    }
}

/// A withdrawal committed in a block, claimable once the block is executed.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct WithdrawCommit {
    /// Receiver on the base ledger.
    pub account: Address,
    /// Withdrawn asset.
    pub asset_id: AssetId,
    /// Amount paid out.
    pub amount: u128,
}

/// The digest committing to the intents of a block, in order.
pub fn intent_hash<T: AsRef<[u8]>>(intents: &[T]) -> Hash {
    let intents: Vec<&[u8]> = intents.iter().map(AsRef::as_ref).collect();
    hash_encoded(&intents)
}

/// The rollup chain: its block ledger, its priority queues and the withdrawals it owes.
#[derive(Debug, Clone, PartialEq)]
pub struct RollupChain {
    /// Committed blocks, indexed by block id.
    pub(crate) blocks: StateVec<Block>,

    /// Number of fully executed blocks. The next block to execute.
    pub(crate) executed_count: StateValue<u64>,

    /// Current status.
    pub(crate) status: StateValue<ChainStatus>,

    /// May pause, resume and replace the operator.
    pub(crate) owner: StateValue<Address>,

    /// May commit blocks.
    pub(crate) operator: StateValue<Address>,

    /// The custody address holding deposited funds on the base ledger.
    pub(crate) chain_address: StateValue<Address>,

    /// Receives withdrawn protocol fees.
    pub(crate) protocol_fee_receiver: StateValue<Address>,

    pub(crate) challenge_period: StateValue<u64>,

    pub(crate) max_priority_delay: StateValue<u64>,

    pub(crate) blocks_per_epoch: StateValue<u64>,

    /// Last epoch enqueued by `update_epoch`.
    pub(crate) last_epoch: StateValue<u64>,

    /// Withdrawals of blocks that are not executed yet.
    pub(crate) withdraw_commits: StateMap<u64, Vec<WithdrawCommit>>,

    /// Claimable withdrawals by receiver and asset.
    pub(crate) pending_withdraws: StateMap<(Address, AssetId), u128>,

    /// Id the next executed aggregate of each strategy receives.
    pub(crate) next_aggregate_ids: StateMap<StrategyId, AggregateId>,

    pub(crate) queues: PriorityQueues,
}

impl Default for RollupChain {
    fn default() -> Self {
        Self::new(Prefix::from("opr_rollup_chain"))
    }
}

impl RollupChain {
    /// Creates the chain with every container under `prefix`.
    pub fn new(prefix: Prefix) -> Self {
        Self {
            blocks: StateVec::new(prefix.extended(b"/blocks")),
            executed_count: StateValue::new(prefix.extended(b"/executed_count")),
            status: StateValue::new(prefix.extended(b"/status")),
            owner: StateValue::new(prefix.extended(b"/owner")),
            operator: StateValue::new(prefix.extended(b"/operator")),
            chain_address: StateValue::new(prefix.extended(b"/chain_address")),
            protocol_fee_receiver: StateValue::new(prefix.extended(b"/protocol_fee_receiver")),
            challenge_period: StateValue::new(prefix.extended(b"/challenge_period")),
            max_priority_delay: StateValue::new(prefix.extended(b"/max_priority_delay")),
            blocks_per_epoch: StateValue::new(prefix.extended(b"/blocks_per_epoch")),
            last_epoch: StateValue::new(prefix.extended(b"/last_epoch")),
            withdraw_commits: StateMap::new(prefix.extended(b"/withdraw_commits")),
            pending_withdraws: StateMap::new(prefix.extended(b"/pending_withdraws")),
            next_aggregate_ids: StateMap::new(prefix.extended(b"/next_aggregate_ids")),
            queues: PriorityQueues::new(prefix.extended(b"/priority_queues")),
        }
    }

    /// The priority queues of the chain.
    pub fn queues(&self) -> &PriorityQueues {
        &self.queues
    }
}
