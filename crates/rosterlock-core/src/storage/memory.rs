#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
};

use super::{Storage, StorageError, Transaction};

type Entries = BTreeMap<(String, String), Vec<u8>>;

/// In-memory storage implementation for testing and simulation
///
/// Committed entries live in one ordered map behind Arc<Mutex<>>. A
/// transaction never touches that map until commit: writes are buffered in
/// an overlay and applied under a single lock acquisition, so concurrent
/// transactions on distinct groups never observe each other's partial state.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<Entries>>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed entries across all collections.
    ///
    /// Useful for debugging and testing.
    pub fn entry_count(&self) -> Result<usize, StorageError> {
        Ok(self.entries.lock().map_err(|_| StorageError::Poisoned)?.len())
    }

    /// Snapshot of every committed entry.
    ///
    /// Used by chaos tests to assert that failed commits left no trace.
    pub fn snapshot(&self) -> Result<Vec<((String, String), Vec<u8>)>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

impl Storage for MemoryStorage {
    type Transaction = MemoryTransaction;

    fn begin(&self) -> Result<MemoryTransaction, StorageError> {
        Ok(MemoryTransaction {
            entries: Arc::clone(&self.entries),
            cleared: BTreeSet::new(),
            writes: BTreeMap::new(),
        })
    }
}

/// Buffered transaction over [`MemoryStorage`].
pub struct MemoryTransaction {
    entries: Arc<Mutex<Entries>>,
    /// Collections removed wholesale, applied before `writes`
    cleared: BTreeSet<String>,
    /// Pending writes; `None` marks a removal
    writes: BTreeMap<(String, String), Option<Vec<u8>>>,
}

impl MemoryTransaction {
    fn composite(collection: &str, key: &str) -> (String, String) {
        (collection.to_string(), key.to_string())
    }
}

impl Transaction for MemoryTransaction {
    fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let composite = Self::composite(collection, key);

        if let Some(pending) = self.writes.get(&composite) {
            return Ok(pending.clone());
        }
        if self.cleared.contains(collection) {
            return Ok(None);
        }

        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(&composite).cloned())
    }

    fn set(&mut self, collection: &str, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.writes.insert(Self::composite(collection, key), Some(value));
        Ok(())
    }

    fn remove(&mut self, collection: &str, key: &str) -> Result<(), StorageError> {
        self.writes.insert(Self::composite(collection, key), None);
        Ok(())
    }

    fn remove_collection(&mut self, collection: &str) -> Result<(), StorageError> {
        self.writes.retain(|(c, _), _| c != collection);
        self.cleared.insert(collection.to_string());
        Ok(())
    }

    fn scan(&self, collection: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let mut merged: BTreeMap<String, Vec<u8>> = BTreeMap::new();

        if !self.cleared.contains(collection) {
            let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
            for ((c, k), v) in entries.range(Self::composite(collection, "")..) {
                if c != collection {
                    break;
                }
                merged.insert(k.clone(), v.clone());
            }
        }

        for ((c, k), pending) in self.writes.range(Self::composite(collection, "")..) {
            if c != collection {
                break;
            }
            match pending {
                Some(v) => merged.insert(k.clone(), v.clone()),
                None => merged.remove(k),
            };
        }

        Ok(merged.into_iter().collect())
    }

    fn commit(self) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;

        for collection in &self.cleared {
            entries.retain(|(c, _), _| c != collection);
        }
        for (composite, pending) in self.writes {
            match pending {
                Some(value) => entries.insert(composite, value),
                None => entries.remove(&composite),
            };
        }

        Ok(())
    }
}
