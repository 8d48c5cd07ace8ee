use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use borsh::BorshSerialize;

use crate::Prefix;

fn encode<T: BorshSerialize>(item: &T) -> Vec<u8> {
    item.try_to_vec()
        .expect("Serialization to vec is infallible")
}

/// Raw key under which a [`Storage`] keeps a value: a container prefix followed by the
/// borsh encoding of the container key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct StorageKey {
    key: Arc<Vec<u8>>,
}

impl StorageKey {
    /// Key of entry `key` in the map under `prefix`.
    pub fn new<K: BorshSerialize>(prefix: &Prefix, key: &K) -> Self {
        let mut bytes = prefix.as_bytes().to_vec();
        bytes.extend(encode(key));
        Self {
            key: Arc::new(bytes),
        }
    }

    /// Key of the single value kept under `prefix`.
    pub fn singleton(prefix: &Prefix) -> Self {
        Self {
            key: Arc::new(prefix.as_bytes().to_vec()),
        }
    }

    /// Raw bytes.
    pub fn key(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.key)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.key.as_slice()))
    }
}

/// Borsh-encoded value. Clones share the bytes.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct StorageValue {
    value: Arc<Vec<u8>>,
}

impl StorageValue {
    /// Encodes `value`.
    pub fn new<V: BorshSerialize>(value: &V) -> Self {
        Self {
            value: Arc::new(encode(value)),
        }
    }

    /// Raw bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

/// The writes of a frozen checkpoint, ordered by key. `None` deletes the key.
pub type OrderedWrites = BTreeMap<StorageKey, Option<StorageValue>>;

/// Versioned key-value store the working sets read from and commit into.
pub trait Storage: Clone {
    /// The committed value of `key`.
    fn get(&self, key: &StorageKey) -> Option<StorageValue>;

    /// Applies `writes` as one version and returns its number.
    fn commit(&self, writes: &OrderedWrites) -> u64;

    /// Number of versions committed so far.
    fn version(&self) -> u64;

    /// True if the store holds no values.
    fn is_empty(&self) -> bool;
}

#[derive(Debug, Default)]
struct VersionedState {
    version: u64,
    values: BTreeMap<StorageKey, StorageValue>,
}

/// A [`Storage`] that keeps every value in memory.
///
/// Clones share the same underlying state, like handles to one database.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    state: Rc<RefCell<VersionedState>>,
}

impl Storage for InMemoryStorage {
    fn get(&self, key: &StorageKey) -> Option<StorageValue> {
        self.state.borrow().values.get(key).cloned()
    }

    fn commit(&self, writes: &OrderedWrites) -> u64 {
        let mut state = self.state.borrow_mut();
        for (key, value) in writes {
            match value {
                Some(value) => {
                    state.values.insert(key.clone(), value.clone());
                }
                None => {
                    state.values.remove(key);
                }
            }
        }
        state.version += 1;
        tracing::debug!(
            version = state.version,
            writes = writes.len(),
            "Committed state update"
        );
        state.version
    }

    fn version(&self) -> u64 {
        self.state.borrow().version
    }

    fn is_empty(&self) -> bool {
        self.state.borrow().values.is_empty()
    }
}
