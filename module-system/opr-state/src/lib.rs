//! Storage and state management interfaces for the optimistic rollup modules.

#![deny(missing_docs)]

mod containers;
mod scratchpad;
/// Keys, values and the [`Storage`] backend.
pub mod storage;

#[cfg(test)]
mod state_tests;

use std::fmt::Display;
use std::str;

pub use containers::*;
pub use opr_rollup_interface::events::Event;
pub use scratchpad::{StateCheckpoint, WorkingSet};
pub use storage::{InMemoryStorage, OrderedWrites, Storage};

/// Namespace of one state container. Modules share a working set, so no two containers
/// may use the same prefix.
#[derive(
    borsh::BorshDeserialize,
    borsh::BorshSerialize,
    Debug,
    PartialEq,
    Eq,
    Clone,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Prefix {
    prefix: Vec<u8>,
}

impl Display for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match str::from_utf8(&self.prefix) {
            Ok(s) => write!(f, "{:?}", s),
            Err(_) => write!(f, "0x{}", hex::encode(&self.prefix)),
        }
    }
}

impl Prefix {
    /// Wraps raw bytes.
    pub fn new(prefix: Vec<u8>) -> Self {
        Self { prefix }
    }

    /// The prefix bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.prefix
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.prefix.len()
    }

    /// True for the empty prefix.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prefix.is_empty()
    }

    /// This prefix followed by `suffix`. Containers built from one parent use it to
    /// derive the prefixes of their parts.
    pub fn extended(&self, suffix: &[u8]) -> Self {
        Self::new([self.prefix.as_slice(), suffix].concat())
    }
}

impl From<&str> for Prefix {
    fn from(prefix: &str) -> Self {
        Self::new(prefix.as_bytes().to_vec())
    }
}
