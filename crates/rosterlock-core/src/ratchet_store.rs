//! Persistent per-(group, sender) V1 ratchets.
//!
//! Two generations per group:
//!
//! - current: at most one ratchet per sender, replaced wholesale
//! - old: one append-only bucket per rotation, never merged or deleted
//!
//! A rotation moves every current ratchet into a new old bucket and clears
//! the current generation. The rotation counter lives in `ratchets.meta`, so
//! a rotation with no current ratchets still yields a (empty) generation.

use rosterlock_crypto::Ratchet;

use crate::{
    storage::{StorageError, Transaction},
    types::{GroupPublicKey, PublicKey},
};

const RATCHET_META: &str = "ratchets.meta";

/// Which generation of ratchets an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatchetGeneration {
    /// Ratchets in active use
    Current,
    /// Ratchets retained after rotations, for in-flight messages
    Old,
}

/// Ratchets moved out of the current generation by one rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OldGeneration {
    /// Rotation number, starting at 1
    pub rotation: u64,
    /// Ratchets by sender, ordered by sender
    pub ratchets: Vec<(PublicKey, Ratchet)>,
}

fn current_collection(group: &GroupPublicKey) -> String {
    format!("ratchets.current.{}", group.to_hex())
}

fn old_collection(group: &GroupPublicKey) -> String {
    format!("ratchets.old.{}", group.to_hex())
}

fn old_key(rotation: u64, sender: &PublicKey) -> String {
    format!("{rotation:016x}.{}", sender.to_hex())
}

fn parse_sender(key: &str) -> Result<PublicKey, StorageError> {
    key.parse().map_err(|e| StorageError::Serialization(format!("ratchet key {key}: {e}")))
}

fn parse_old_key(key: &str) -> Result<(u64, PublicKey), StorageError> {
    let Some((rotation, sender)) = key.split_once('.') else {
        return Err(StorageError::Serialization(format!("malformed old ratchet key {key}")));
    };
    let rotation = u64::from_str_radix(rotation, 16)
        .map_err(|e| StorageError::Serialization(format!("old ratchet key {key}: {e}")))?;
    Ok((rotation, parse_sender(sender)?))
}

/// Ratchet persistence inside a transaction.
pub trait RatchetStore {
    /// Ratchet of `sender`. For [`RatchetGeneration::Old`], the one from the
    /// newest rotation that holds a ratchet for `sender`.
    fn ratchet(
        &self,
        group: &GroupPublicKey,
        sender: &PublicKey,
        generation: RatchetGeneration,
    ) -> Result<Option<Ratchet>, StorageError>;

    /// Overwrite the ratchet of `sender`. For [`RatchetGeneration::Old`],
    /// writes into the newest rotation.
    fn set_ratchet(
        &mut self,
        group: &GroupPublicKey,
        sender: &PublicKey,
        ratchet: &Ratchet,
        generation: RatchetGeneration,
    ) -> Result<(), StorageError>;

    /// Overwrite the ratchet of `sender` in a specific old rotation.
    fn set_old_ratchet(
        &mut self,
        group: &GroupPublicKey,
        rotation: u64,
        sender: &PublicKey,
        ratchet: &Ratchet,
    ) -> Result<(), StorageError>;

    /// Every ratchet of a generation. Old ratchets are returned oldest
    /// rotation first.
    fn ratchets(
        &self,
        group: &GroupPublicKey,
        generation: RatchetGeneration,
    ) -> Result<Vec<(PublicKey, Ratchet)>, StorageError>;

    /// Remove every ratchet of a generation.
    fn remove_ratchets(
        &mut self,
        group: &GroupPublicKey,
        generation: RatchetGeneration,
    ) -> Result<(), StorageError>;

    /// Number of rotations performed for `group`.
    fn rotation_count(&self, group: &GroupPublicKey) -> Result<u64, StorageError>;

    /// Move all current ratchets into a new old generation and clear the
    /// current generation. Returns the new rotation number.
    fn rotate_ratchets(&mut self, group: &GroupPublicKey) -> Result<u64, StorageError>;

    /// Old generations, oldest first. Contains exactly one entry per
    /// rotation.
    fn old_generations(&self, group: &GroupPublicKey) -> Result<Vec<OldGeneration>, StorageError>;
}

impl<T: Transaction> RatchetStore for T {
    fn ratchet(
        &self,
        group: &GroupPublicKey,
        sender: &PublicKey,
        generation: RatchetGeneration,
    ) -> Result<Option<Ratchet>, StorageError> {
        match generation {
            RatchetGeneration::Current => {
                self.get_value(&current_collection(group), &sender.to_hex())
            },
            RatchetGeneration::Old => {
                for rotation in (1..=self.rotation_count(group)?).rev() {
                    let found = self.get_value(&old_collection(group), &old_key(rotation, sender))?;
                    if found.is_some() {
                        return Ok(found);
                    }
                }
                Ok(None)
            },
        }
    }

    fn set_ratchet(
        &mut self,
        group: &GroupPublicKey,
        sender: &PublicKey,
        ratchet: &Ratchet,
        generation: RatchetGeneration,
    ) -> Result<(), StorageError> {
        match generation {
            RatchetGeneration::Current => {
                self.set_value(&current_collection(group), &sender.to_hex(), ratchet)
            },
            RatchetGeneration::Old => {
                let rotation = match self.rotation_count(group)? {
                    0 => {
                        self.set_value(RATCHET_META, &group.to_hex(), &1u64)?;
                        1
                    },
                    latest => latest,
                };
                self.set_old_ratchet(group, rotation, sender, ratchet)
            },
        }
    }

    fn set_old_ratchet(
        &mut self,
        group: &GroupPublicKey,
        rotation: u64,
        sender: &PublicKey,
        ratchet: &Ratchet,
    ) -> Result<(), StorageError> {
        self.set_value(&old_collection(group), &old_key(rotation, sender), ratchet)
    }

    fn ratchets(
        &self,
        group: &GroupPublicKey,
        generation: RatchetGeneration,
    ) -> Result<Vec<(PublicKey, Ratchet)>, StorageError> {
        match generation {
            RatchetGeneration::Current => self
                .scan_values::<Ratchet>(&current_collection(group))?
                .into_iter()
                .map(|(key, ratchet)| Ok::<_, StorageError>((parse_sender(&key)?, ratchet)))
                .collect(),
            RatchetGeneration::Old => Ok(self
                .old_generations(group)?
                .into_iter()
                .flat_map(|generation| generation.ratchets)
                .collect()),
        }
    }

    fn remove_ratchets(
        &mut self,
        group: &GroupPublicKey,
        generation: RatchetGeneration,
    ) -> Result<(), StorageError> {
        match generation {
            RatchetGeneration::Current => self.remove_collection(&current_collection(group)),
            RatchetGeneration::Old => {
                self.remove(RATCHET_META, &group.to_hex())?;
                self.remove_collection(&old_collection(group))
            },
        }
    }

    fn rotation_count(&self, group: &GroupPublicKey) -> Result<u64, StorageError> {
        Ok(self.get_value(RATCHET_META, &group.to_hex())?.unwrap_or(0))
    }

    fn rotate_ratchets(&mut self, group: &GroupPublicKey) -> Result<u64, StorageError> {
        let rotation = self.rotation_count(group)? + 1;

        for (sender, ratchet) in self.ratchets(group, RatchetGeneration::Current)? {
            self.set_old_ratchet(group, rotation, &sender, &ratchet)?;
        }
        self.remove_ratchets(group, RatchetGeneration::Current)?;
        self.set_value(RATCHET_META, &group.to_hex(), &rotation)?;

        Ok(rotation)
    }

    fn old_generations(&self, group: &GroupPublicKey) -> Result<Vec<OldGeneration>, StorageError> {
        let count = self.rotation_count(group)?;
        let mut generations: Vec<OldGeneration> = (1..=count)
            .map(|rotation| OldGeneration { rotation, ratchets: Vec::new() })
            .collect();

        for (key, ratchet) in self.scan_values::<Ratchet>(&old_collection(group))? {
            let (rotation, sender) = parse_old_key(&key)?;
            let slot = usize::try_from(rotation).ok().and_then(|r| r.checked_sub(1));
            let Some(slot) = slot.filter(|&i| i < generations.len()) else {
                return Err(StorageError::Serialization(format!(
                    "old ratchet rotation {rotation} beyond counter {count}"
                )));
            };
            generations[slot].ratchets.push((sender, ratchet));
        }

        Ok(generations)
    }
}
