//! Events observable by external indexers.
use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// Something a call reports to the outside, such as `rollup_block_committed` with the
/// id of the block.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Event {
    key: EventKey,
    value: EventValue,
}

impl Event {
    /// Creates an event.
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: EventKey(key.to_owned()),
            value: EventValue(value.to_owned()),
        }
    }

    /// What happened.
    pub fn key(&self) -> &EventKey {
        &self.key
    }

    /// Details, in human readable form.
    pub fn value(&self) -> &EventValue {
        &self.value
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key.0, self.value.0)
    }
}

/// Name of an [`Event`].
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct EventKey(String);

impl EventKey {
    /// True if this is the `name` event.
    pub fn is(&self, name: &str) -> bool {
        self.0 == name
    }

    /// The name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Payload of an [`Event`].
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct EventValue(String);

impl EventValue {
    /// The payload text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
