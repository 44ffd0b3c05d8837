//! Group key material and polling registrations.
//!
//! - V2 key pairs: append-only history per group plus an "active" marker
//!   naming the entry used to protect new content
//! - V1 group private keys
//! - The set of groups the local client polls for

use rosterlock_crypto::GroupKeyPair;

use crate::{
    storage::{StorageError, Transaction},
    types::{GroupPrivateKey, GroupPublicKey},
};

const POLLED_GROUPS: &str = "polled_groups";
const ACTIVE_KEY_PAIRS: &str = "active_key_pairs";
const GROUP_PRIVATE_KEYS: &str = "group_private_keys";

fn key_pairs_collection(group: &GroupPublicKey) -> String {
    format!("group_key_pairs.{}", group.to_hex())
}

/// Key material persistence inside a transaction.
pub trait GroupKeyStore {
    /// Append `key_pair` to the history and mark it active.
    ///
    /// Returns `false` without writing if the history already holds a pair
    /// with the same public key, so redelivery is a no-op.
    fn add_key_pair(
        &mut self,
        group: &GroupPublicKey,
        key_pair: &GroupKeyPair,
    ) -> Result<bool, StorageError>;

    /// Ordered key-pair history, oldest first.
    fn key_pairs(&self, group: &GroupPublicKey) -> Result<Vec<GroupKeyPair>, StorageError>;

    /// Key pair used to protect new content, if any.
    fn active_key_pair(
        &self,
        group: &GroupPublicKey,
    ) -> Result<Option<GroupKeyPair>, StorageError>;

    /// Point the active marker at the history entry with `public_key`.
    ///
    /// Returns `false` without writing if no such entry exists.
    fn activate_key_pair(
        &mut self,
        group: &GroupPublicKey,
        public_key: &[u8; 32],
    ) -> Result<bool, StorageError>;

    /// Drop the active marker. History is kept.
    fn clear_active_key_pair(&mut self, group: &GroupPublicKey) -> Result<(), StorageError>;

    /// Register or unregister `group` for polling.
    fn set_active_polling(
        &mut self,
        group: &GroupPublicKey,
        polling: bool,
    ) -> Result<(), StorageError>;

    /// Whether `group` is polled.
    fn is_polling(&self, group: &GroupPublicKey) -> Result<bool, StorageError>;

    /// Every polled group, ordered.
    fn polled_groups(&self) -> Result<Vec<GroupPublicKey>, StorageError>;

    /// Store the V1 group private key.
    fn set_group_private_key(
        &mut self,
        group: &GroupPublicKey,
        key: &GroupPrivateKey,
    ) -> Result<(), StorageError>;

    /// V1 group private key.
    fn group_private_key(
        &self,
        group: &GroupPublicKey,
    ) -> Result<Option<GroupPrivateKey>, StorageError>;

    /// Remove the V1 group private key.
    fn remove_group_private_key(&mut self, group: &GroupPublicKey) -> Result<(), StorageError>;
}

impl<T: Transaction> GroupKeyStore for T {
    fn add_key_pair(
        &mut self,
        group: &GroupPublicKey,
        key_pair: &GroupKeyPair,
    ) -> Result<bool, StorageError> {
        let history = self.key_pairs(group)?;
        if history.iter().any(|existing| existing.public_key() == key_pair.public_key()) {
            return Ok(false);
        }

        let index = history.len() as u64;
        self.set_value(&key_pairs_collection(group), &format!("{index:016x}"), key_pair)?;
        self.set_value(ACTIVE_KEY_PAIRS, &group.to_hex(), &index)?;
        Ok(true)
    }

    fn key_pairs(&self, group: &GroupPublicKey) -> Result<Vec<GroupKeyPair>, StorageError> {
        Ok(self
            .scan_values::<GroupKeyPair>(&key_pairs_collection(group))?
            .into_iter()
            .map(|(_, key_pair)| key_pair)
            .collect())
    }

    fn active_key_pair(
        &self,
        group: &GroupPublicKey,
    ) -> Result<Option<GroupKeyPair>, StorageError> {
        let Some(index) = self.get_value::<u64>(ACTIVE_KEY_PAIRS, &group.to_hex())? else {
            return Ok(None);
        };
        self.get_value(&key_pairs_collection(group), &format!("{index:016x}"))
    }

    fn activate_key_pair(
        &mut self,
        group: &GroupPublicKey,
        public_key: &[u8; 32],
    ) -> Result<bool, StorageError> {
        let history = self.key_pairs(group)?;
        let Some(index) = history.iter().position(|existing| existing.public_key() == public_key)
        else {
            return Ok(false);
        };

        self.set_value(ACTIVE_KEY_PAIRS, &group.to_hex(), &(index as u64))?;
        Ok(true)
    }

    fn clear_active_key_pair(&mut self, group: &GroupPublicKey) -> Result<(), StorageError> {
        self.remove(ACTIVE_KEY_PAIRS, &group.to_hex())
    }

    fn set_active_polling(
        &mut self,
        group: &GroupPublicKey,
        polling: bool,
    ) -> Result<(), StorageError> {
        if polling {
            self.set_value(POLLED_GROUPS, &group.to_hex(), &true)
        } else {
            self.remove(POLLED_GROUPS, &group.to_hex())
        }
    }

    fn is_polling(&self, group: &GroupPublicKey) -> Result<bool, StorageError> {
        Ok(self.get(POLLED_GROUPS, &group.to_hex())?.is_some())
    }

    fn polled_groups(&self) -> Result<Vec<GroupPublicKey>, StorageError> {
        self.scan(POLLED_GROUPS)?
            .into_iter()
            .map(|(key, _)| {
                key.parse()
                    .map_err(|e| StorageError::Serialization(format!("polled group {key}: {e}")))
            })
            .collect()
    }

    fn set_group_private_key(
        &mut self,
        group: &GroupPublicKey,
        key: &GroupPrivateKey,
    ) -> Result<(), StorageError> {
        self.set_value(GROUP_PRIVATE_KEYS, &group.to_hex(), key)
    }

    fn group_private_key(
        &self,
        group: &GroupPublicKey,
    ) -> Result<Option<GroupPrivateKey>, StorageError> {
        self.get_value(GROUP_PRIVATE_KEYS, &group.to_hex())
    }

    fn remove_group_private_key(&mut self, group: &GroupPublicKey) -> Result<(), StorageError> {
        self.remove(GROUP_PRIVATE_KEYS, &group.to_hex())
    }
}
