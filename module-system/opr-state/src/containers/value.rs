use std::marker::PhantomData;

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

use crate::{Prefix, Storage, WorkingSet};

/// A single value stored under its prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct StateValue<V> {
    prefix: Prefix,
    _value: PhantomData<V>,
}

/// Returned by [`StateValue::get_or_err`].
#[derive(Debug, Error)]
pub enum StateValueError {
    /// Nothing was ever set, or the value was removed.
    #[error("no value in {0}")]
    MissingValue(Prefix),
}

impl<V: BorshSerialize + BorshDeserialize> StateValue<V> {
    /// Creates a value stored under `prefix`.
    pub fn new(prefix: Prefix) -> Self {
        Self {
            prefix,
            _value: PhantomData,
        }
    }

    /// The prefix the value was created with.
    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    /// Replaces the value.
    pub fn set<S: Storage>(&self, value: &V, working_set: &mut WorkingSet<S>) {
        working_set.set_singleton(&self.prefix, value)
    }

    /// The current value.
    pub fn get<S: Storage>(&self, working_set: &mut WorkingSet<S>) -> Option<V> {
        working_set.get_singleton(&self.prefix)
    }

    /// The current value, or an error naming the prefix.
    pub fn get_or_err<S: Storage>(
        &self,
        working_set: &mut WorkingSet<S>,
    ) -> Result<V, StateValueError> {
        self.get(working_set)
            .ok_or_else(|| StateValueError::MissingValue(self.prefix.clone()))
    }

    /// Clears the value and returns it.
    pub fn remove<S: Storage>(&self, working_set: &mut WorkingSet<S>) -> Option<V> {
        working_set.remove_singleton(&self.prefix)
    }

    /// Clears the value without decoding it.
    pub fn delete<S: Storage>(&self, working_set: &mut WorkingSet<S>) {
        working_set.delete_singleton(&self.prefix);
    }
}
