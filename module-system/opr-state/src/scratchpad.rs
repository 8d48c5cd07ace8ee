use std::collections::HashMap;
use std::fmt::Debug;

use borsh::{BorshDeserialize, BorshSerialize};
use opr_rollup_interface::events::Event;

use crate::storage::{OrderedWrites, StorageKey, StorageValue};
use crate::{Prefix, Storage};

/// Writes accumulated on top of the underlying storage by calls that did not revert.
///
/// Obtained from a [`WorkingSet`] with either [`WorkingSet::checkpoint`] or
/// [`WorkingSet::revert`], and turned into a storage commit with [`StateCheckpoint::commit`].
pub struct StateCheckpoint<S: Storage> {
    inner: S,
    writes: OrderedWrites,
}

impl<S: Storage> StateCheckpoint<S> {
    /// Starts a checkpoint with no pending writes.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            writes: Default::default(),
        }
    }

    /// Opens a revertable working set on top of this checkpoint.
    pub fn to_revertable(self) -> WorkingSet<S> {
        WorkingSet {
            delta: RevertableDelta {
                inner: self,
                writes: Default::default(),
            },
            events: Default::default(),
        }
    }

    /// Takes the writes accumulated so far, leaving the checkpoint empty.
    pub fn freeze(&mut self) -> OrderedWrites {
        std::mem::take(&mut self.writes)
    }

    /// Persists the accumulated writes into the storage and returns its new version.
    pub fn commit(mut self) -> u64 {
        let writes = self.freeze();
        self.inner.commit(&writes)
    }

    /// The storage this checkpoint writes to.
    pub fn storage(&self) -> &S {
        &self.inner
    }

    fn get(&self, key: &StorageKey) -> Option<StorageValue> {
        match self.writes.get(key) {
            Some(value) => value.clone(),
            None => self.inner.get(key),
        }
    }
}

impl<S: Storage> Debug for StateCheckpoint<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCheckpoint")
            .field("writes", &self.writes.len())
            .finish()
    }
}

/// Writes of the call in progress. Reads are first checked against this map, then against
/// the checkpoint underneath.
struct RevertableDelta<S: Storage> {
    inner: StateCheckpoint<S>,
    writes: HashMap<StorageKey, Option<StorageValue>>,
}

impl<S: Storage> RevertableDelta<S> {
    fn get(&self, key: &StorageKey) -> Option<StorageValue> {
        if let Some(value) = self.writes.get(key) {
            return value.clone();
        }
        self.inner.get(key)
    }

    fn set(&mut self, key: StorageKey, value: StorageValue) {
        self.writes.insert(key, Some(value));
    }

    fn delete(&mut self, key: StorageKey) {
        self.writes.insert(key, None);
    }

    fn commit(self) -> StateCheckpoint<S> {
        let mut inner = self.inner;
        inner.writes.extend(self.writes);
        inner
    }

    fn revert(self) -> StateCheckpoint<S> {
        self.inner
    }
}

/// The writes and events of one call.
///
/// A call ends with [`WorkingSet::checkpoint`], which folds its writes into the checkpoint
/// underneath, or with [`WorkingSet::revert`], which drops its writes and its events.
pub struct WorkingSet<S: Storage> {
    delta: RevertableDelta<S>,
    events: Vec<Event>,
}

impl<S: Storage> WorkingSet<S> {
    /// Opens a working set directly on top of a storage.
    pub fn new(inner: S) -> Self {
        StateCheckpoint::new(inner).to_revertable()
    }

    /// Keeps the writes of the current call.
    pub fn checkpoint(self) -> StateCheckpoint<S> {
        self.delta.commit()
    }

    /// Drops the writes and events of the current call.
    pub fn revert(self) -> StateCheckpoint<S> {
        self.delta.revert()
    }

    /// Records an event for indexers.
    pub fn add_event(&mut self, key: &str, value: &str) {
        self.events.push(Event::new(key, value));
    }

    /// Removes and returns the events recorded so far.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// The events recorded so far.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// The storage under this working set.
    pub fn backing(&self) -> &S {
        self.delta.inner.storage()
    }

    pub(crate) fn get(&mut self, key: StorageKey) -> Option<StorageValue> {
        self.delta.get(&key)
    }

    pub(crate) fn set(&mut self, key: StorageKey, value: StorageValue) {
        self.delta.set(key, value)
    }

    pub(crate) fn delete(&mut self, key: StorageKey) {
        self.delta.delete(key)
    }
}

// Typed access used by the containers. Values are borsh-encoded under keys built from the
// container prefix.
impl<S: Storage> WorkingSet<S> {
    fn read<V: BorshDeserialize>(&mut self, key: StorageKey) -> Option<V> {
        let stored = self.get(key)?;
        // Only this crate writes under container prefixes, so a value that does not decode
        // means the store is corrupt.
        match V::deserialize(&mut stored.value()) {
            Ok(value) => Some(value),
            Err(e) => panic!("Corrupt value in storage: {e:?}"),
        }
    }

    fn take<V: BorshDeserialize>(&mut self, key: StorageKey) -> Option<V> {
        let value = self.read(key.clone())?;
        self.delete(key);
        Some(value)
    }

    pub(crate) fn set_value<K: BorshSerialize, V: BorshSerialize>(
        &mut self,
        prefix: &Prefix,
        key: &K,
        value: &V,
    ) {
        self.set(StorageKey::new(prefix, key), StorageValue::new(value));
    }

    pub(crate) fn get_value<K: BorshSerialize, V: BorshDeserialize>(
        &mut self,
        prefix: &Prefix,
        key: &K,
    ) -> Option<V> {
        self.read(StorageKey::new(prefix, key))
    }

    pub(crate) fn remove_value<K: BorshSerialize, V: BorshDeserialize>(
        &mut self,
        prefix: &Prefix,
        key: &K,
    ) -> Option<V> {
        self.take(StorageKey::new(prefix, key))
    }

    pub(crate) fn delete_value<K: BorshSerialize>(&mut self, prefix: &Prefix, key: &K) {
        self.delete(StorageKey::new(prefix, key));
    }

    pub(crate) fn set_singleton<V: BorshSerialize>(&mut self, prefix: &Prefix, value: &V) {
        self.set(StorageKey::singleton(prefix), StorageValue::new(value));
    }

    pub(crate) fn get_singleton<V: BorshDeserialize>(&mut self, prefix: &Prefix) -> Option<V> {
        self.read(StorageKey::singleton(prefix))
    }

    pub(crate) fn remove_singleton<V: BorshDeserialize>(&mut self, prefix: &Prefix) -> Option<V> {
        self.take(StorageKey::singleton(prefix))
    }

    pub(crate) fn delete_singleton(&mut self, prefix: &Prefix) {
        self.delete(StorageKey::singleton(prefix));
    }
}
