//! Read-only accessors for operators and indexers.
use opr_rollup_interface::StrategyId;
use opr_state::{Storage, WorkingSet};

use crate::{EventQueuePointer, PendingEvent, PriorityQueues, QueueKind};

impl PriorityQueues {
    /// Watermarks of the deposit queue.
    pub fn deposit_pointer<S: Storage>(&self, working_set: &mut WorkingSet<S>) -> EventQueuePointer {
        self.queue(QueueKind::Deposit).pointer(working_set)
    }

    /// Watermarks of the epoch-update queue.
    pub fn epoch_update_pointer<S: Storage>(
        &self,
        working_set: &mut WorkingSet<S>,
    ) -> EventQueuePointer {
        self.queue(QueueKind::EpochUpdate).pointer(working_set)
    }

    /// Watermarks of a strategy's execution-result queue.
    pub fn execution_result_pointer<S: Storage>(
        &self,
        strategy_id: StrategyId,
        working_set: &mut WorkingSet<S>,
    ) -> EventQueuePointer {
        self.queue(QueueKind::ExecutionResult(strategy_id))
            .pointer(working_set)
    }

    /// The event stored at `index` of a queue.
    pub fn pending_event<S: Storage>(
        &self,
        kind: QueueKind,
        index: u64,
        working_set: &mut WorkingSet<S>,
    ) -> Option<PendingEvent> {
        self.queue(kind).event(index, working_set)
    }
}
