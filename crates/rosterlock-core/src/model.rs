//! Group membership model and the thread records that own it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    storage::{StorageError, Transaction},
    types::{GroupId, GroupPublicKey, PublicKey},
};

const THREADS: &str = "threads";

/// Roster of a closed group.
///
/// # Invariants
///
/// - `admins ⊆ members`, enforced at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupModel {
    group: GroupPublicKey,
    group_id: GroupId,
    name: String,
    members: BTreeSet<PublicKey>,
    admins: BTreeSet<PublicKey>,
}

impl GroupModel {
    /// Build a model. Admins that are not members are dropped.
    pub fn new(
        group: GroupPublicKey,
        name: impl Into<String>,
        members: BTreeSet<PublicKey>,
        admins: &BTreeSet<PublicKey>,
    ) -> Self {
        let admins = admins.intersection(&members).copied().collect();
        Self { group, group_id: GroupId::for_group(&group), name: name.into(), members, admins }
    }

    /// Group public key.
    pub fn group(&self) -> GroupPublicKey {
        self.group
    }

    /// Thread id.
    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current members.
    pub fn members(&self) -> &BTreeSet<PublicKey> {
        &self.members
    }

    /// Current admins.
    pub fn admins(&self) -> &BTreeSet<PublicKey> {
        &self.admins
    }

    /// Whether `key` is a member.
    pub fn is_member(&self, key: &PublicKey) -> bool {
        self.members.contains(key)
    }

    /// Whether `key` is an admin.
    pub fn is_admin(&self, key: &PublicKey) -> bool {
        self.admins.contains(key)
    }

    /// Literal removal check: `members ∩ old ≠ old`.
    ///
    /// Every peer evaluates exactly this comparison to decide whether to
    /// rotate, so it must not be replaced by a different notion of removal.
    pub fn removes_any(&self, new_members: &BTreeSet<PublicKey>) -> bool {
        let kept: BTreeSet<PublicKey> = new_members.intersection(&self.members).copied().collect();
        kept != self.members
    }

    /// Human-readable summary of the change from `self` to `new`.
    pub fn describe_update(&self, new: &GroupModel) -> String {
        let mut parts = Vec::new();

        if self.name != new.name {
            parts.push(format!("Title is now '{}'.", new.name));
        }

        let joined: Vec<String> = new.members.difference(&self.members).map(short).collect();
        if !joined.is_empty() {
            parts.push(format!("{} joined the group.", joined.join(", ")));
        }

        let left: Vec<String> = self.members.difference(&new.members).map(short).collect();
        if !left.is_empty() {
            parts.push(format!("{} left the group.", left.join(", ")));
        }

        if parts.is_empty() && self.admins != new.admins {
            parts.push("Admins changed.".to_string());
        }

        if parts.is_empty() {
            return "Group updated.".to_string();
        }
        parts.join(" ")
    }
}

fn short(key: &PublicKey) -> String {
    key.to_hex()[..8].to_string()
}

/// Persistence of [`GroupModel`]s, keyed by group.
pub trait ThreadStore {
    /// Stored model, `None` if the thread does not exist.
    fn group_model(&self, group: &GroupPublicKey) -> Result<Option<GroupModel>, StorageError>;

    /// Create or overwrite the thread's model.
    fn set_group_model(&mut self, model: &GroupModel) -> Result<(), StorageError>;
}

impl<T: Transaction> ThreadStore for T {
    fn group_model(&self, group: &GroupPublicKey) -> Result<Option<GroupModel>, StorageError> {
        self.get_value(THREADS, &group.to_hex())
    }

    fn set_group_model(&mut self, model: &GroupModel) -> Result<(), StorageError> {
        self.set_value(THREADS, &model.group.to_hex(), model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, Storage};

    fn key(b: u8) -> PublicKey {
        PublicKey::from_bytes([b; 32])
    }

    fn set(keys: &[u8]) -> BTreeSet<PublicKey> {
        keys.iter().map(|&b| key(b)).collect()
    }

    fn group() -> GroupPublicKey {
        GroupPublicKey::from_bytes([9; 32])
    }

    #[test]
    fn admins_are_restricted_to_members() {
        let model = GroupModel::new(group(), "g", set(&[1, 2]), &set(&[2, 3]));
        assert_eq!(model.admins(), &set(&[2]));
    }

    #[test]
    fn removes_any_is_literal_intersection() {
        let model = GroupModel::new(group(), "g", set(&[1, 2, 3]), &set(&[]));

        assert!(model.removes_any(&set(&[1, 2])));
        assert!(model.removes_any(&set(&[1, 2, 4])));
        assert!(!model.removes_any(&set(&[1, 2, 3, 4])));
        assert!(!model.removes_any(&set(&[1, 2, 3])));
    }

    #[test]
    fn describe_update_lists_changes() {
        let group = GroupPublicKey::from_bytes([9; 32]);
        let old = GroupModel::new(group, "old", set(&[1, 2]), &set(&[1]));
        let new = GroupModel::new(group, "new", set(&[1, 3]), &set(&[1]));

        let details = old.describe_update(&new);
        assert!(details.contains("Title is now 'new'"));
        assert!(details.contains(&format!("{} joined", &key(3).to_hex()[..8])));
        assert!(details.contains(&format!("{} left", &key(2).to_hex()[..8])));
    }

    #[test]
    fn thread_store_roundtrip() {
        let storage = MemoryStorage::new();
        let mut txn = storage.begin().unwrap();
        let model = GroupModel::new(group(), "g", set(&[1]), &set(&[1]));

        txn.set_group_model(&model).unwrap();

        assert_eq!(txn.group_model(&model.group()).unwrap(), Some(model));
        assert_eq!(txn.group_model(&GroupPublicKey::from_bytes([8; 32])).unwrap(), None);
    }
}
