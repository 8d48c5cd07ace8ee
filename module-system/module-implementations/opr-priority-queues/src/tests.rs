use opr_rollup_interface::Address;
use opr_state::{InMemoryStorage, Prefix, WorkingSet};
use proptest::prelude::*;

use crate::*;

fn deposit(amount: u128) -> PriorityEvent {
    PriorityEvent::Deposit {
        account: Address([0xaa; 20]),
        asset_id: 1,
        amount,
    }
}

fn new_working_set() -> WorkingSet<InMemoryStorage> {
    WorkingSet::new(InMemoryStorage::default())
}

#[test]
fn matching_deposit_is_marked_done() {
    let queues = PriorityQueues::default();
    let mut working_set = new_working_set();

    queues.enqueue(&deposit(100), 0, &mut working_set);
    assert_eq!(
        queues.check_and_advance(&deposit(100), 0, &mut working_set),
        Ok(0)
    );

    let event = queues
        .pending_event(QueueKind::Deposit, 0, &mut working_set)
        .unwrap();
    assert_eq!(event.status, EventStatus::Done);
    assert_eq!(event.block_id, 0);

    // A second identical deposit has nothing left to match.
    assert!(matches!(
        queues.check_and_advance(&deposit(100), 0, &mut working_set),
        Err(PriorityQueueError::NothingPending { .. })
    ));
}

#[test]
fn out_of_order_event_is_rejected() {
    let queues = PriorityQueues::default();
    let mut working_set = new_working_set();

    queues.enqueue(&deposit(1), 0, &mut working_set);
    queues.enqueue(&deposit(2), 0, &mut working_set);
    assert!(matches!(
        queues.check_and_advance(&deposit(2), 0, &mut working_set),
        Err(PriorityQueueError::SequenceMismatch { index: 0, .. })
    ));
    assert_eq!(queues.deposit_pointer(&mut working_set).commit_head, 0);
}

#[test]
fn queues_are_independent() {
    let queues = PriorityQueues::default();
    let mut working_set = new_working_set();

    let result = PriorityEvent::ExecutionResult {
        strategy_id: 2,
        aggregate_id: 1,
        success: true,
        shares_from_buy: 10,
        amount_from_sell: 0,
    };
    queues.enqueue(&PriorityEvent::EpochUpdate { epoch: 1 }, 0, &mut working_set);
    queues.enqueue(&result, 0, &mut working_set);

    assert_eq!(queues.deposit_pointer(&mut working_set).tail, 0);
    assert_eq!(queues.epoch_update_pointer(&mut working_set).tail, 1);
    assert_eq!(queues.execution_result_pointer(2, &mut working_set).tail, 1);
    assert_eq!(queues.execution_result_pointer(3, &mut working_set).tail, 0);

    queues
        .check_and_advance(&result, 4, &mut working_set)
        .unwrap();
    queues.cleanup(4, &mut working_set);
    let pointer = queues.execution_result_pointer(2, &mut working_set);
    assert_eq!(pointer.execute_head, 1);
}

#[test]
fn cleanup_stops_at_unfinalized_events() {
    let queue = PriorityQueue::new(Prefix::from("q"));
    let mut working_set = new_working_set();

    for amount in 0..3u8 {
        queue.enqueue([amount; 32], 0, &mut working_set);
    }
    queue.check_and_advance(&[0; 32], 0, &mut working_set).unwrap();
    queue.check_and_advance(&[1; 32], 1, &mut working_set).unwrap();

    assert_eq!(queue.cleanup(0, &mut working_set), 1);
    assert_eq!(queue.pointer(&mut working_set).execute_head, 1);
    assert!(queue.event(0, &mut working_set).is_none());

    // The pending third event blocks further cleanup even for far-future blocks.
    assert_eq!(queue.cleanup(10, &mut working_set), 1);
    assert_eq!(
        queue.pointer(&mut working_set),
        EventQueuePointer {
            execute_head: 2,
            commit_head: 2,
            tail: 3
        }
    );
}

#[test]
fn revert_rewinds_commit_head_and_resets_baselines() {
    let queue = PriorityQueue::new(Prefix::from("q"));
    let mut working_set = new_working_set();

    queue.enqueue([1; 32], 0, &mut working_set);
    queue.enqueue([2; 32], 1, &mut working_set);
    queue.enqueue([3; 32], 3, &mut working_set);
    queue.check_and_advance(&[1; 32], 0, &mut working_set).unwrap();
    queue.check_and_advance(&[2; 32], 2, &mut working_set).unwrap();

    queue.revert(2, &mut working_set);

    assert_eq!(queue.pointer(&mut working_set).commit_head, 1);
    let reset = queue.event(1, &mut working_set).unwrap();
    assert_eq!(reset.status, EventStatus::Pending);
    assert_eq!(reset.block_id, 2);
    assert_eq!(queue.event(2, &mut working_set).unwrap().block_id, 2);
    assert_eq!(
        queue.event(0, &mut working_set).unwrap().status,
        EventStatus::Done
    );

    // The reverted event can be consumed again.
    queue.check_and_advance(&[2; 32], 2, &mut working_set).unwrap();
}

#[test]
fn revert_and_recommit_reproduces_the_queue() {
    let queues = PriorityQueues::default();
    let mut working_set = new_working_set();

    queues.enqueue(&deposit(1), 0, &mut working_set);
    queues.enqueue(&deposit(2), 0, &mut working_set);
    queues.check_and_advance(&deposit(1), 0, &mut working_set).unwrap();
    let before = (
        queues.deposit_pointer(&mut working_set),
        queues.pending_event(QueueKind::Deposit, 1, &mut working_set),
    );

    queues.check_and_advance(&deposit(2), 1, &mut working_set).unwrap();
    queues.revert(1, &mut working_set);

    let pointer = queues.deposit_pointer(&mut working_set);
    assert_eq!(pointer, before.0);
    let event = queues.pending_event(QueueKind::Deposit, 1, &mut working_set);
    assert_eq!(event.as_ref().map(|e| e.status), Some(EventStatus::Pending));
    assert_eq!(event.map(|e| e.content_hash), before.1.map(|e| e.content_hash));
}

#[test]
fn priority_delay_boundary() {
    let queues = PriorityQueues::default();
    let mut working_set = new_working_set();
    let max_delay = 2;

    assert!(!queues.priority_delay_exceeded(10, max_delay, &mut working_set));

    // Emitted while 4 blocks existed.
    queues.enqueue(&PriorityEvent::EpochUpdate { epoch: 1 }, 4, &mut working_set);

    // block_count - 1 - 4 == max_delay is not a violation.
    assert!(!queues.priority_delay_exceeded(7, max_delay, &mut working_set));
    assert!(queues.priority_delay_exceeded(8, max_delay, &mut working_set));
    assert!(!queues.priority_delay_exceeded(0, max_delay, &mut working_set));

    queues
        .check_and_advance(&PriorityEvent::EpochUpdate { epoch: 1 }, 7, &mut working_set)
        .unwrap();
    assert!(!queues.priority_delay_exceeded(100, max_delay, &mut working_set));
}

#[derive(Debug, Clone)]
enum Operation {
    Enqueue(u8),
    CheckAndAdvance(u8),
    Cleanup(u64),
    Revert(u64),
}

fn operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        (0u8..4).prop_map(Operation::Enqueue),
        (0u8..4).prop_map(Operation::CheckAndAdvance),
        (0u64..6).prop_map(Operation::Cleanup),
        (0u64..6).prop_map(Operation::Revert),
    ]
}

proptest! {
    #[test]
    fn pointers_stay_ordered(operations in prop::collection::vec(operation(), 1..60)) {
        let queue = PriorityQueue::new(Prefix::from("fuzz"));
        let mut working_set = new_working_set();
        let mut block = 0u64;

        for operation in operations {
            let before = queue.pointer(&mut working_set);
            match operation {
                Operation::Enqueue(tag) => {
                    queue.enqueue([tag; 32], block, &mut working_set);
                }
                Operation::CheckAndAdvance(tag) => {
                    let expected = queue.oldest_pending(&mut working_set);
                    let result = queue.check_and_advance(&[tag; 32], block, &mut working_set);
                    match expected {
                        Some(event) if event.content_hash == [tag; 32] => {
                            prop_assert_eq!(result, Ok(before.commit_head));
                        }
                        _ => {
                            prop_assert!(result.is_err());
                            prop_assert_eq!(queue.pointer(&mut working_set), before);
                        }
                    }
                    block += 1;
                }
                Operation::Cleanup(finalized) => {
                    queue.cleanup(finalized, &mut working_set);
                }
                Operation::Revert(from) => {
                    queue.revert(from, &mut working_set);
                }
            }
            let pointer = queue.pointer(&mut working_set);
            prop_assert!(pointer.execute_head <= pointer.commit_head);
            prop_assert!(pointer.commit_head <= pointer.tail);
        }
    }
}
