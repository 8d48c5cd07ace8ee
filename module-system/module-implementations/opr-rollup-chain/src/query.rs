//! Read-only accessors for operators, watchers and indexers.
use opr_priority_queues::{EventQueuePointer, QueueKind};
use opr_rollup_interface::{Address, AssetId, Hash};
use opr_state::{Storage, WorkingSet};

use crate::{intent_hash, Block, ChainStatus, RollupChain, WithdrawCommit};

impl RollupChain {
    /// The block with the given id.
    pub fn get_block<S: Storage>(
        &self,
        block_id: u64,
        working_set: &mut WorkingSet<S>,
    ) -> Option<Block> {
        self.blocks.get(block_id, working_set)
    }

    /// Number of committed blocks.
    pub fn block_count<S: Storage>(&self, working_set: &mut WorkingSet<S>) -> u64 {
        self.blocks.len(working_set)
    }

    /// Number of fully executed blocks.
    pub fn executed_count<S: Storage>(&self, working_set: &mut WorkingSet<S>) -> u64 {
        self.executed_count.get(working_set).unwrap_or_default()
    }

    /// The current status.
    pub fn status<S: Storage>(&self, working_set: &mut WorkingSet<S>) -> ChainStatus {
        self.status.get(working_set).unwrap_or_default()
    }

    /// The current operator.
    pub fn operator<S: Storage>(&self, working_set: &mut WorkingSet<S>) -> Option<Address> {
        self.operator.get(working_set)
    }

    /// What `account` can withdraw in `asset_id`.
    pub fn pending_withdraw<S: Storage>(
        &self,
        account: &Address,
        asset_id: AssetId,
        working_set: &mut WorkingSet<S>,
    ) -> u128 {
        self.pending_withdraws
            .get(&(*account, asset_id), working_set)
            .unwrap_or_default()
    }

    /// Withdrawals committed in a block that is not executed yet.
    pub fn withdraw_commits<S: Storage>(
        &self,
        block_id: u64,
        working_set: &mut WorkingSet<S>,
    ) -> Vec<WithdrawCommit> {
        self.withdraw_commits
            .get(&block_id, working_set)
            .unwrap_or_default()
    }

    /// Watermarks of one of the priority queues.
    pub fn queue_pointer<S: Storage>(
        &self,
        kind: QueueKind,
        working_set: &mut WorkingSet<S>,
    ) -> EventQueuePointer {
        self.queues.queue(kind).pointer(working_set)
    }

    /// The intent hash a block committing `intents` carries.
    pub fn intent_hash_of(&self, intents: &[Vec<u8>]) -> Hash {
        intent_hash(intents)
    }
}
