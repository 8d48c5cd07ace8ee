use std::marker::PhantomData;

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

use crate::storage::StorageKey;
use crate::{Prefix, Storage, WorkingSet};

/// Values keyed by a borsh-encoded key, all under one prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct StateMap<K, V> {
    prefix: Prefix,
    _types: PhantomData<(K, V)>,
}

/// Returned by [`StateMap::get_or_err`].
#[derive(Debug, Error)]
pub enum StateMapError {
    /// The key has no value.
    #[error("no value under {1} in {0}")]
    MissingValue(Prefix, StorageKey),
}

impl<K, V> StateMap<K, V>
where
    K: BorshSerialize,
    V: BorshSerialize + BorshDeserialize,
{
    /// Creates a map stored under `prefix`.
    pub fn new(prefix: Prefix) -> Self {
        Self {
            prefix,
            _types: PhantomData,
        }
    }

    /// The prefix the map was created with.
    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set<S: Storage>(&self, key: &K, value: &V, working_set: &mut WorkingSet<S>) {
        working_set.set_value(&self.prefix, key, value)
    }

    /// The value under `key`.
    pub fn get<S: Storage>(&self, key: &K, working_set: &mut WorkingSet<S>) -> Option<V> {
        working_set.get_value(&self.prefix, key)
    }

    /// The value under `key`, or an error naming the missing key.
    pub fn get_or_err<S: Storage>(
        &self,
        key: &K,
        working_set: &mut WorkingSet<S>,
    ) -> Result<V, StateMapError> {
        self.get(key, working_set).ok_or_else(|| {
            StateMapError::MissingValue(self.prefix.clone(), StorageKey::new(&self.prefix, key))
        })
    }

    /// Deletes the value under `key` and returns it.
    pub fn remove<S: Storage>(&self, key: &K, working_set: &mut WorkingSet<S>) -> Option<V> {
        working_set.remove_value(&self.prefix, key)
    }

    /// Deletes the value under `key` without decoding it.
    pub fn delete<S: Storage>(&self, key: &K, working_set: &mut WorkingSet<S>) {
        working_set.delete_value(&self.prefix, key);
    }
}
