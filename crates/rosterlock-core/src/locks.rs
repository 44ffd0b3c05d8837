//! Per-group mutual exclusion.
//!
//! Membership and key updates are read-modify-write, so messages for the
//! same group are serialized. Distinct groups proceed concurrently.
//!
//! Entries live only while some caller holds them, so the table is bounded
//! by the number of in-flight transactions rather than by every group key
//! a peer ever named.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{storage::StorageError, types::GroupPublicKey};

#[derive(Default)]
pub(crate) struct GroupLocks {
    locks: Mutex<HashMap<GroupPublicKey, Arc<Mutex<()>>>>,
}

impl GroupLocks {
    /// Lock for `group`, created on first use.
    pub(crate) fn lock_for(&self, group: &GroupPublicKey) -> Result<Arc<Mutex<()>>, StorageError> {
        let mut locks = self.locks.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(Arc::clone(locks.entry(*group).or_default()))
    }

    /// Drop the entry for `group` once no caller holds its lock.
    ///
    /// Call after the `Arc` from [`lock_for`](Self::lock_for) was dropped.
    pub(crate) fn release(&self, group: &GroupPublicKey) {
        // Poisoned: the next lock_for reports it
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        if locks.get(group).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(group);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}
