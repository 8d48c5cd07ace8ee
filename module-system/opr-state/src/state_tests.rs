use proptest::prelude::*;

use super::*;

fn value_and_map() -> (StateValue<u64>, StateMap<u32, String>) {
    (
        StateValue::new(Prefix::from("value")),
        StateMap::new(Prefix::from("map")),
    )
}

#[test]
fn checkpoint_keeps_writes_and_revert_drops_them() {
    let storage = InMemoryStorage::default();
    let (value, map) = value_and_map();

    let mut working_set = WorkingSet::new(storage.clone());
    value.set(&7, &mut working_set);
    map.set(&1, &"one".to_owned(), &mut working_set);
    working_set.add_event("kept", "1");

    let mut working_set = working_set.checkpoint().to_revertable();
    assert_eq!(value.get(&mut working_set), Some(7));
    value.set(&8, &mut working_set);
    map.delete(&1, &mut working_set);
    working_set.add_event("dropped", "2");
    assert_eq!(working_set.events().len(), 1);

    let mut working_set = working_set.revert().to_revertable();
    assert!(working_set.events().is_empty());
    assert_eq!(value.get(&mut working_set), Some(7));
    assert_eq!(map.get(&1, &mut working_set), Some("one".to_owned()));

    // Nothing reaches the storage before the checkpoint is committed.
    assert!(storage.is_empty());
    assert_eq!(working_set.checkpoint().commit(), 1);
    assert!(!storage.is_empty());

    let mut working_set = WorkingSet::new(storage.clone());
    assert_eq!(value.get(&mut working_set), Some(7));
    assert_eq!(storage.version(), 1);
}

#[test]
fn deletes_shadow_committed_values() {
    let storage = InMemoryStorage::default();
    let (value, map) = value_and_map();

    let mut working_set = WorkingSet::new(storage.clone());
    value.set(&1, &mut working_set);
    map.set(&3, &"three".to_owned(), &mut working_set);
    working_set.checkpoint().commit();

    let mut working_set = WorkingSet::new(storage.clone());
    assert_eq!(value.remove(&mut working_set), Some(1));
    assert_eq!(value.get(&mut working_set), None);
    assert!(map.get_or_err(&4, &mut working_set).is_err());
    assert_eq!(map.remove(&3, &mut working_set), Some("three".to_owned()));
    working_set.checkpoint().commit();

    assert!(storage.is_empty());
    assert_eq!(storage.version(), 2);
}

#[test]
fn containers_with_distinct_prefixes_do_not_collide() {
    let mut working_set = WorkingSet::new(InMemoryStorage::default());
    let first = StateMap::<u32, u32>::new(Prefix::from("a"));
    let second = StateMap::<u32, u32>::new(Prefix::from("a").extended(b"/b"));
    first.set(&1, &10, &mut working_set);
    second.set(&1, &20, &mut working_set);
    assert_eq!(first.get(&1, &mut working_set), Some(10));
    assert_eq!(second.get(&1, &mut working_set), Some(20));
}

#[test]
fn take_events_drains_the_log() {
    let mut working_set = WorkingSet::new(InMemoryStorage::default());
    working_set.add_event("rollup_block_committed", "block 0");
    let events = working_set.take_events();
    assert_eq!(events.len(), 1);
    assert!(events[0].key().is("rollup_block_committed"));
    assert_eq!(events[0].value().as_str(), "block 0");
    assert!(working_set.events().is_empty());
}

#[derive(Debug, Clone)]
enum VecOp {
    Push(u32),
    Pop,
    Truncate(u64),
}

fn vec_op() -> impl Strategy<Value = VecOp> {
    prop_oneof![
        any::<u32>().prop_map(VecOp::Push),
        Just(VecOp::Pop),
        (0u64..8).prop_map(VecOp::Truncate),
    ]
}

proptest! {
    #[test]
    fn state_vec_behaves_like_vec(ops in prop::collection::vec(vec_op(), 1..40)) {
        let state_vec = StateVec::<u32>::new(Prefix::from("vec"));
        let mut working_set = WorkingSet::new(InMemoryStorage::default());
        let mut model = Vec::new();

        for op in ops {
            match op {
                VecOp::Push(value) => {
                    state_vec.push(&value, &mut working_set);
                    model.push(value);
                }
                VecOp::Pop => {
                    prop_assert_eq!(state_vec.pop(&mut working_set), model.pop());
                }
                VecOp::Truncate(len) => {
                    state_vec.truncate(len, &mut working_set);
                    model.truncate(len as usize);
                }
            }
            prop_assert_eq!(state_vec.len(&mut working_set), model.len() as u64);
        }
        let stored: Vec<u32> = state_vec.iter(&mut working_set).collect();
        prop_assert_eq!(stored, model);
    }
}
