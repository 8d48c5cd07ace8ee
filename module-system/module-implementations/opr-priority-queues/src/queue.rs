use borsh::{BorshDeserialize, BorshSerialize};
use opr_rollup_interface::Hash;
use opr_state::{Prefix, StateMap, StateValue, Storage, WorkingSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Lifecycle of a priority event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum EventStatus {
    /// Emitted on the base ledger, not yet matched by a committed transition.
    Pending,
    /// Matched by a transition of block `block_id`.
    Done,
}

/// One slot of a priority queue.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct PendingEvent {
    /// Digest of the event payload.
    pub content_hash: Hash,
    /// While pending, the block count when the event was emitted. Once done, the block that
    /// consumed it.
    pub block_id: u64,
    /// Whether a committed block consumed the event.
    pub status: EventStatus,
}

/// The three watermarks of a queue. `execute_head <= commit_head <= tail` always holds.
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
pub struct EventQueuePointer {
    /// Next slot to delete.
    pub execute_head: u64,
    /// Next slot a committed transition must match.
    pub commit_head: u64,
    /// Next free slot.
    pub tail: u64,
}

/// Errors raised when a committed transition does not match the queue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PriorityQueueError {
    /// Every emitted event was already consumed.
    #[error("no pending priority event in queue {queue}")]
    NothingPending {
        /// The queue prefix.
        queue: String,
    },
    /// The transition does not match the oldest pending event.
    #[error("priority event {index} in queue {queue} does not match: expected 0x{expected}, got 0x{got}")]
    SequenceMismatch {
        /// The queue prefix.
        queue: String,
        /// Index of the oldest pending event.
        index: u64,
        /// Hex content hash stored in the queue.
        expected: String,
        /// Hex content hash of the transition.
        got: String,
    },
}

/// A FIFO queue of priority events stored under one prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorityQueue {
    prefix: Prefix,
    pointer: StateValue<EventQueuePointer>,
    events: StateMap<u64, PendingEvent>,
}

impl PriorityQueue {
    /// Creates a queue stored under `prefix`.
    pub fn new(prefix: Prefix) -> Self {
        Self {
            pointer: StateValue::new(prefix.extended(b"/pointer")),
            events: StateMap::new(prefix.extended(b"/events")),
            prefix,
        }
    }

    /// The current watermarks.
    pub fn pointer<S: Storage>(&self, working_set: &mut WorkingSet<S>) -> EventQueuePointer {
        self.pointer.get(working_set).unwrap_or_default()
    }

    /// The event stored at `index`, if it has not been cleaned up.
    pub fn event<S: Storage>(
        &self,
        index: u64,
        working_set: &mut WorkingSet<S>,
    ) -> Option<PendingEvent> {
        self.events.get(&index, working_set)
    }

    /// Appends a pending event emitted while `block_count` blocks were committed.
    /// Returns its index.
    pub fn enqueue<S: Storage>(
        &self,
        content_hash: Hash,
        block_count: u64,
        working_set: &mut WorkingSet<S>,
    ) -> u64 {
        let mut pointer = self.pointer(working_set);
        let index = pointer.tail;
        self.events.set(
            &index,
            &PendingEvent {
                content_hash,
                block_id: block_count,
                status: EventStatus::Pending,
            },
            working_set,
        );
        pointer.tail += 1;
        self.pointer.set(&pointer, working_set);
        debug!(queue = %self.prefix, index, "Enqueued priority event");
        index
    }

    /// Marks the oldest pending event as consumed by block `block_id`, provided its content hash
    /// equals `content_hash`.
    pub fn check_and_advance<S: Storage>(
        &self,
        content_hash: &Hash,
        block_id: u64,
        working_set: &mut WorkingSet<S>,
    ) -> Result<u64, PriorityQueueError> {
        let mut pointer = self.pointer(working_set);
        let index = pointer.commit_head;
        let event = match self.events.get(&index, working_set) {
            Some(event) if index < pointer.tail => event,
            _ => {
                return Err(PriorityQueueError::NothingPending {
                    queue: self.prefix.to_string(),
                })
            }
        };
        if &event.content_hash != content_hash {
            return Err(PriorityQueueError::SequenceMismatch {
                queue: self.prefix.to_string(),
                index,
                expected: hex::encode(event.content_hash),
                got: hex::encode(content_hash),
            });
        }

        self.events.set(
            &index,
            &PendingEvent {
                block_id,
                status: EventStatus::Done,
                ..event
            },
            working_set,
        );
        pointer.commit_head += 1;
        self.pointer.set(&pointer, working_set);
        Ok(index)
    }

    /// Deletes consumed events whose block is at or below `finalized_block`. Stops at the first
    /// event that is still pending or consumed by a later block. Returns how many were deleted.
    pub fn cleanup<S: Storage>(&self, finalized_block: u64, working_set: &mut WorkingSet<S>) -> u64 {
        let mut pointer = self.pointer(working_set);
        let start = pointer.execute_head;
        while pointer.execute_head < pointer.commit_head {
            match self.events.get(&pointer.execute_head, working_set) {
                Some(event)
                    if event.status == EventStatus::Done && event.block_id <= finalized_block =>
                {
                    self.events.delete(&pointer.execute_head, working_set);
                    pointer.execute_head += 1;
                }
                _ => break,
            }
        }
        let removed = pointer.execute_head - start;
        if removed > 0 {
            self.pointer.set(&pointer, working_set);
            debug!(queue = %self.prefix, removed, finalized_block, "Cleaned up priority events");
        }
        removed
    }

    /// Returns every event touched by block `from_block` or later to pending, with
    /// `from_block` as its baseline, and rewinds `commit_head` to the first reset event.
    pub fn revert<S: Storage>(&self, from_block: u64, working_set: &mut WorkingSet<S>) {
        let mut pointer = self.pointer(working_set);
        let mut first_reset = None;
        for index in pointer.execute_head..pointer.tail {
            let Some(event) = self.events.get(&index, working_set) else {
                continue;
            };
            if event.block_id < from_block {
                continue;
            }
            if event.status == EventStatus::Done && first_reset.is_none() {
                first_reset = Some(index);
            }
            self.events.set(
                &index,
                &PendingEvent {
                    block_id: from_block,
                    status: EventStatus::Pending,
                    ..event
                },
                working_set,
            );
        }
        if let Some(index) = first_reset {
            pointer.commit_head = pointer.commit_head.min(index);
            self.pointer.set(&pointer, working_set);
        }
        debug!(queue = %self.prefix, from_block, commit_head = pointer.commit_head, "Reverted priority events");
    }

    /// The oldest event not yet consumed by a committed block.
    pub fn oldest_pending<S: Storage>(
        &self,
        working_set: &mut WorkingSet<S>,
    ) -> Option<PendingEvent> {
        let pointer = self.pointer(working_set);
        if pointer.commit_head >= pointer.tail {
            return None;
        }
        self.events.get(&pointer.commit_head, working_set)
    }

    /// True if the oldest pending event has waited more than `max_delay` blocks, i.e.
    /// `block_count - 1 - block_id > max_delay`.
    pub fn exceeds_delay<S: Storage>(
        &self,
        block_count: u64,
        max_delay: u64,
        working_set: &mut WorkingSet<S>,
    ) -> bool {
        let Some(event) = self.oldest_pending(working_set) else {
            return false;
        };
        match block_count.checked_sub(1).and_then(|last| last.checked_sub(event.block_id)) {
            Some(delay) => delay > max_delay,
            None => false,
        }
    }
}
