#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

mod queue;
pub mod query;

#[cfg(test)]
mod tests;

use borsh::{BorshDeserialize, BorshSerialize};
use opr_rollup_interface::crypto::hash_encoded;
use opr_rollup_interface::{Address, AggregateId, AssetId, Hash, StrategyId};
use opr_state::{Prefix, StateValue, Storage, WorkingSet};
pub use queue::{EventQueuePointer, EventStatus, PendingEvent, PriorityQueue, PriorityQueueError};
use serde::{Deserialize, Serialize};
use tracing::info;

/// The payload of a priority event. Its content hash is what committed transitions are
/// matched against.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum PriorityEvent {
    /// Funds deposited on the base ledger. Reward deposits use the zero address.
    Deposit {
        /// The depositor.
        account: Address,
        /// Registered id of the deposited asset.
        asset_id: AssetId,
        /// Deposited amount.
        amount: u128,
    },
    /// The staking clock advanced.
    EpochUpdate {
        /// The new epoch.
        epoch: u64,
    },
    /// A strategy executed an aggregate order.
    ExecutionResult {
        /// The executing strategy.
        strategy_id: StrategyId,
        /// The executed aggregate.
        aggregate_id: AggregateId,
        /// False if the strategy call failed.
        success: bool,
        /// Shares the strategy minted for the buy side.
        shares_from_buy: u128,
        /// Assets the strategy returned for the sell side.
        amount_from_sell: u128,
    },
}

impl PriorityEvent {
    /// Digest of the payload.
    pub fn content_hash(&self) -> Hash {
        hash_encoded(self)
    }
}

/// Which queue an event travels through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Deposits and reward deposits.
    Deposit,
    /// Epoch updates.
    EpochUpdate,
    /// Execution results of one strategy.
    ExecutionResult(StrategyId),
}

impl PriorityEvent {
    /// The queue this event belongs to.
    pub fn queue_kind(&self) -> QueueKind {
        match self {
            PriorityEvent::Deposit { .. } => QueueKind::Deposit,
            PriorityEvent::EpochUpdate { .. } => QueueKind::EpochUpdate,
            PriorityEvent::ExecutionResult { strategy_id, .. } => {
                QueueKind::ExecutionResult(*strategy_id)
            }
        }
    }
}

/// The priority queues of the rollup: one for deposits, one for epoch updates and one per
/// strategy for execution results.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorityQueues {
    prefix: Prefix,
    deposits: PriorityQueue,
    epoch_updates: PriorityQueue,
    /// Strategies that have an execution-result queue.
    strategies: StateValue<Vec<StrategyId>>,
}

impl Default for PriorityQueues {
    fn default() -> Self {
        Self::new(Prefix::from("opr_priority_queues"))
    }
}

impl PriorityQueues {
    /// Creates the queues under `prefix`.
    pub fn new(prefix: Prefix) -> Self {
        Self {
            deposits: PriorityQueue::new(prefix.extended(b"/deposits")),
            epoch_updates: PriorityQueue::new(prefix.extended(b"/epoch_updates")),
            strategies: StateValue::new(prefix.extended(b"/strategies")),
            prefix,
        }
    }

    fn execution_results(&self, strategy_id: StrategyId) -> PriorityQueue {
        let mut suffix = b"/execution_results/".to_vec();
        suffix.extend_from_slice(&strategy_id.to_be_bytes());
        PriorityQueue::new(self.prefix.extended(&suffix))
    }

    /// The queue of the given kind.
    pub fn queue(&self, kind: QueueKind) -> PriorityQueue {
        match kind {
            QueueKind::Deposit => self.deposits.clone(),
            QueueKind::EpochUpdate => self.epoch_updates.clone(),
            QueueKind::ExecutionResult(strategy_id) => self.execution_results(strategy_id),
        }
    }

    fn all_queues<S: Storage>(&self, working_set: &mut WorkingSet<S>) -> Vec<PriorityQueue> {
        let mut queues = vec![self.deposits.clone(), self.epoch_updates.clone()];
        queues.extend(
            self.strategies
                .get(working_set)
                .unwrap_or_default()
                .into_iter()
                .map(|strategy_id| self.execution_results(strategy_id)),
        );
        queues
    }

    /// Appends a pending event emitted while `block_count` blocks were committed.
    /// Returns its index in its queue.
    pub fn enqueue<S: Storage>(
        &self,
        event: &PriorityEvent,
        block_count: u64,
        working_set: &mut WorkingSet<S>,
    ) -> u64 {
        let kind = event.queue_kind();
        if let QueueKind::ExecutionResult(strategy_id) = kind {
            let mut strategies = self.strategies.get(working_set).unwrap_or_default();
            if !strategies.contains(&strategy_id) {
                strategies.push(strategy_id);
                self.strategies.set(&strategies, working_set);
            }
        }
        self.queue(kind)
            .enqueue(event.content_hash(), block_count, working_set)
    }

    /// Matches an event carried by a transition of block `block_id` against the oldest pending
    /// event of its queue.
    pub fn check_and_advance<S: Storage>(
        &self,
        event: &PriorityEvent,
        block_id: u64,
        working_set: &mut WorkingSet<S>,
    ) -> Result<u64, PriorityQueueError> {
        self.queue(event.queue_kind())
            .check_and_advance(&event.content_hash(), block_id, working_set)
    }

    /// Deletes every event consumed at or before `finalized_block` from every queue.
    pub fn cleanup<S: Storage>(&self, finalized_block: u64, working_set: &mut WorkingSet<S>) {
        let removed: u64 = self
            .all_queues(working_set)
            .iter()
            .map(|queue| queue.cleanup(finalized_block, working_set))
            .sum();
        info!(finalized_block, removed, "Finalized priority events");
    }

    /// Returns every event consumed by `from_block` or later to pending, in every queue.
    pub fn revert<S: Storage>(&self, from_block: u64, working_set: &mut WorkingSet<S>) {
        for queue in self.all_queues(working_set) {
            queue.revert(from_block, working_set);
        }
        info!(from_block, "Reverted priority queues");
    }

    /// True if the oldest pending deposit or epoch update has waited more than `max_delay`
    /// blocks.
    pub fn priority_delay_exceeded<S: Storage>(
        &self,
        block_count: u64,
        max_delay: u64,
        working_set: &mut WorkingSet<S>,
    ) -> bool {
        self.deposits
            .exceeds_delay(block_count, max_delay, working_set)
            || self
                .epoch_updates
                .exceeds_delay(block_count, max_delay, working_set)
    }
}
