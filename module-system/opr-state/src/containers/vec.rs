use std::marker::PhantomData;

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

use crate::{Prefix, StateMap, StateValue, Storage, WorkingSet};

/// An append-mostly sequence stored as a length plus one entry per index.
///
/// Rolling back appended values is a `truncate`.
#[derive(Debug, Clone, PartialEq)]
pub struct StateVec<V> {
    prefix: Prefix,
    length: StateValue<u64>,
    items: StateMap<u64, V>,
    _value: PhantomData<V>,
}

/// Errors of indexed [`StateVec`] access.
#[derive(Debug, Error)]
pub enum StateVecError {
    /// The index is past the end.
    #[error("index {index} is out of bounds for {prefix} of length {len}")]
    OutOfBounds {
        /// Prefix of the vector.
        prefix: Prefix,
        /// Requested index.
        index: u64,
        /// Current length.
        len: u64,
    },
    /// The index is in bounds but its entry is gone.
    #[error("no value at index {1} of {0}")]
    MissingValue(Prefix, u64),
}

impl<V> StateVec<V>
where
    V: BorshSerialize + BorshDeserialize,
{
    /// Creates a vector stored under `prefix`.
    pub fn new(prefix: Prefix) -> Self {
        Self {
            length: StateValue::new(prefix.extended(b"/len")),
            items: StateMap::new(prefix.extended(b"/items")),
            prefix,
            _value: PhantomData,
        }
    }

    /// The prefix the vector was created with.
    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    /// Number of values.
    pub fn len<S: Storage>(&self, working_set: &mut WorkingSet<S>) -> u64 {
        self.length.get(working_set).unwrap_or_default()
    }

    /// True if the vector holds no values.
    pub fn is_empty<S: Storage>(&self, working_set: &mut WorkingSet<S>) -> bool {
        self.len(working_set) == 0
    }

    fn check_bounds<S: Storage>(
        &self,
        index: u64,
        working_set: &mut WorkingSet<S>,
    ) -> Result<(), StateVecError> {
        let len = self.len(working_set);
        if index >= len {
            return Err(StateVecError::OutOfBounds {
                prefix: self.prefix.clone(),
                index,
                len,
            });
        }
        Ok(())
    }

    /// The value at `index`, if any.
    pub fn get<S: Storage>(&self, index: u64, working_set: &mut WorkingSet<S>) -> Option<V> {
        self.items.get(&index, working_set)
    }

    /// The value at `index`, or why there is none.
    pub fn get_or_err<S: Storage>(
        &self,
        index: u64,
        working_set: &mut WorkingSet<S>,
    ) -> Result<V, StateVecError> {
        self.check_bounds(index, working_set)?;
        self.items
            .get(&index, working_set)
            .ok_or_else(|| StateVecError::MissingValue(self.prefix.clone(), index))
    }

    /// Overwrites the value at `index`. Only existing indices can be set; use
    /// [`StateVec::push`] to grow the vector.
    pub fn set<S: Storage>(
        &self,
        index: u64,
        value: &V,
        working_set: &mut WorkingSet<S>,
    ) -> Result<(), StateVecError> {
        self.check_bounds(index, working_set)?;
        self.items.set(&index, value, working_set);
        Ok(())
    }

    /// Appends a value.
    pub fn push<S: Storage>(&self, value: &V, working_set: &mut WorkingSet<S>) {
        let len = self.len(working_set);
        self.items.set(&len, value, working_set);
        self.length.set(&(len + 1), working_set);
    }

    /// Removes and returns the last value.
    pub fn pop<S: Storage>(&self, working_set: &mut WorkingSet<S>) -> Option<V> {
        let last = self.len(working_set).checked_sub(1)?;
        let value = self.items.remove(&last, working_set)?;
        self.length.set(&last, working_set);
        Some(value)
    }

    /// The last value.
    pub fn last<S: Storage>(&self, working_set: &mut WorkingSet<S>) -> Option<V> {
        let last = self.len(working_set).checked_sub(1)?;
        self.items.get(&last, working_set)
    }

    /// Shortens the vector to `new_len`, deleting everything after it. No-op if the vector
    /// is not longer than that.
    pub fn truncate<S: Storage>(&self, new_len: u64, working_set: &mut WorkingSet<S>) {
        let len = self.len(working_set);
        if new_len >= len {
            return;
        }
        for index in new_len..len {
            self.items.delete(&index, working_set);
        }
        self.length.set(&new_len, working_set);
    }

    /// Iterates over the values in index order.
    pub fn iter<'a, 'ws, S: Storage>(
        &'a self,
        working_set: &'ws mut WorkingSet<S>,
    ) -> StateVecIter<'a, 'ws, V, S> {
        let end = self.len(working_set);
        StateVecIter {
            vec: self,
            working_set,
            next: 0,
            end,
        }
    }
}

/// Iterator returned by [`StateVec::iter`]. Stops early at a missing entry.
pub struct StateVecIter<'a, 'ws, V, S: Storage> {
    vec: &'a StateVec<V>,
    working_set: &'ws mut WorkingSet<S>,
    next: u64,
    end: u64,
}

impl<'a, 'ws, V, S> Iterator for StateVecIter<'a, 'ws, V, S>
where
    V: BorshSerialize + BorshDeserialize,
    S: Storage,
{
    type Item = V;

    fn next(&mut self) -> Option<V> {
        if self.next >= self.end {
            return None;
        }
        let value = self.vec.get(self.next, self.working_set);
        self.next = match value {
            Some(_) => self.next + 1,
            None => self.end,
        };
        value
    }
}
