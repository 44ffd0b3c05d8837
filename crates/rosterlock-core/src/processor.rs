//! Control-message state machine.
//!
//! The processor consumes typed [`ControlMessage`]s and mutates group
//! membership, ratchets and key pairs under the authorization and rotation
//! rules of each protocol generation.
//!
//! # Transactions
//!
//! Each message is applied under its group's lock inside one storage
//! transaction. A handler that rejects the message returns early, the
//! transaction is dropped and nothing it wrote becomes visible. Actions are
//! only handed out once the commit succeeded.
//!
//! # Outcomes
//!
//! - applied: `Ok(actions)`
//! - rejected by protocol rules: `Ok(vec![Rejected])`, logged
//! - storage failure: `Err(ProcessError::Storage)`, nothing applied

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{collections::BTreeSet, sync::Mutex};

use rosterlock_crypto::{EncryptedMessage, GroupKeyPair, Ratchet};
use tracing::{debug, error, info, warn};

use crate::{
    action::{Destination, InfoEventKind, ProcessorAction},
    config::ProcessorConfig,
    env::Environment,
    error::{ProcessError, Role},
    group_key_store::GroupKeyStore,
    identity::LocalIdentity,
    key_distribution,
    locks::GroupLocks,
    message::{
        ControlKind, ControlMessage, GroupInfoV1, KeyPairDistribution, KeyPairUpdate,
        MembershipUpdate, NewGroupV1, NewGroupV2, SenderKey, SenderKeyDistribution,
        SenderKeyRequest, SenderKeyUpdate,
    },
    model::{GroupModel, ThreadStore},
    ratchet_store::{OldGeneration, RatchetGeneration, RatchetStore},
    sender_keys,
    storage::{Storage, StorageError, Transaction},
    types::{GroupPrivateKey, GroupPublicKey, PublicKey},
};

/// Result of [`ControlMessageProcessor::process_batch`].
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Actions of every applied message, in input order
    pub actions: Vec<ProcessorAction>,
    /// Messages applied
    pub applied: usize,
    /// Messages rejected by protocol rules
    pub rejected: usize,
    /// Input indices of messages that hit a storage failure
    pub failed: Vec<usize>,
}

/// Closed-group control-message processor.
///
/// Generic over the [`Environment`] (randomness) and the [`Storage`]
/// engine. Shareable across threads: messages for distinct groups are
/// processed concurrently, messages for the same group are serialized.
pub struct ControlMessageProcessor<E: Environment, S: Storage> {
    env: E,
    storage: S,
    identity: LocalIdentity,
    config: ProcessorConfig,
    locks: GroupLocks,
}

impl<E: Environment, S: Storage> ControlMessageProcessor<E, S> {
    /// Create a processor for the local identity.
    pub fn new(env: E, storage: S, identity: LocalIdentity, config: ProcessorConfig) -> Self {
        Self { env, storage, identity, config, locks: GroupLocks::default() }
    }

    /// Local member identity.
    pub fn local_key(&self) -> PublicKey {
        self.identity.public_key()
    }

    /// Underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Apply one control message.
    ///
    /// # Errors
    ///
    /// Only storage failures. Protocol rejections are returned as a single
    /// [`ProcessorAction::Rejected`].
    pub fn process(&self, message: &ControlMessage) -> Result<Vec<ProcessorAction>, ProcessError> {
        match self.apply(message) {
            Ok(actions) => Ok(actions),
            Err(e) if e.is_rejection() => {
                warn!(sender = %message.sender, error = %e, "Rejected control message");
                Ok(vec![ProcessorAction::Rejected { reason: e.to_string() }])
            },
            Err(e) => {
                error!(sender = %message.sender, error = %e, "Failed to apply control message");
                Err(e)
            },
        }
    }

    /// Apply messages in order. A rejected or failed message never stops
    /// the batch.
    pub fn process_batch(&self, messages: &[ControlMessage]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for (index, message) in messages.iter().enumerate() {
            match self.process(message) {
                Ok(actions) => {
                    if matches!(actions.as_slice(), [ProcessorAction::Rejected { .. }]) {
                        outcome.rejected += 1;
                    } else {
                        outcome.applied += 1;
                    }
                    outcome.actions.extend(actions);
                },
                Err(_) => outcome.failed.push(index),
            }
        }

        debug!(
            applied = outcome.applied,
            rejected = outcome.rejected,
            failed = outcome.failed.len(),
            "Processed control message batch"
        );
        outcome
    }

    fn apply(&self, message: &ControlMessage) -> Result<Vec<ProcessorAction>, ProcessError> {
        let sender = message.sender;

        match &message.kind {
            ControlKind::V1(update) => {
                let group = update.group();
                self.transact(&group, |txn| self.handle_v1(txn, sender, update))
            },
            ControlKind::V2(update) => {
                let Some(group) = message.target_group() else {
                    return Err(ProcessError::IntegrityViolation {
                        reason: "V2 message without group public key".to_string(),
                    });
                };
                self.transact(&group, |txn| self.handle_v2(txn, sender, group, update))
            },
            ControlKind::Unrecognized { generation, kind } => {
                Err(ProcessError::UnrecognizedKind { generation: *generation, kind: *kind })
            },
        }
    }

    /// Run `f` under the group lock inside one transaction, committing on
    /// success.
    fn transact<R>(
        &self,
        group: &GroupPublicKey,
        f: impl FnOnce(&mut S::Transaction) -> Result<R, ProcessError>,
    ) -> Result<R, ProcessError> {
        let lock = self.locks.lock_for(group)?;
        let result = self.commit_locked(&lock, f);
        drop(lock);
        self.locks.release(group);

        result
    }

    fn commit_locked<R>(
        &self,
        lock: &Mutex<()>,
        f: impl FnOnce(&mut S::Transaction) -> Result<R, ProcessError>,
    ) -> Result<R, ProcessError> {
        let _guard = lock.lock().map_err(|_| StorageError::Poisoned)?;

        let mut txn = self.storage.begin()?;
        let result = f(&mut txn)?;
        txn.commit()?;

        Ok(result)
    }

    fn read<R>(
        &self,
        f: impl FnOnce(&S::Transaction) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        let txn = self.storage.begin()?;
        f(&txn)
    }

    fn handle_v1(
        &self,
        txn: &mut S::Transaction,
        sender: PublicKey,
        update: &SenderKeyUpdate,
    ) -> Result<Vec<ProcessorAction>, ProcessError> {
        match update {
            SenderKeyUpdate::New(new) => self.handle_new_v1(txn, sender, new),
            SenderKeyUpdate::Info(info) => self.handle_info_v1(txn, sender, info),
            SenderKeyUpdate::SenderKeyRequest(request) => {
                self.handle_sender_key_request(txn, sender, request)
            },
            SenderKeyUpdate::SenderKey(distribution) => {
                self.handle_sender_key(txn, sender, distribution)
            },
        }
    }

    fn handle_v2(
        &self,
        txn: &mut S::Transaction,
        sender: PublicKey,
        group: GroupPublicKey,
        update: &KeyPairUpdate,
    ) -> Result<Vec<ProcessorAction>, ProcessError> {
        match update {
            KeyPairUpdate::New(new) => self.handle_new_v2(txn, sender, new),
            KeyPairUpdate::Update(update) => self.handle_update_v2(txn, sender, group, update),
            KeyPairUpdate::KeyPair(distribution) => {
                self.handle_key_pair(txn, sender, group, distribution)
            },
        }
    }

    /// V2 New: trusted by delivery scope, no authorization check.
    fn handle_new_v2(
        &self,
        txn: &mut S::Transaction,
        sender: PublicKey,
        new: &NewGroupV2,
    ) -> Result<Vec<ProcessorAction>, ProcessError> {
        let group = new.group;
        let model = GroupModel::new(group, &new.name, new.members.clone(), &new.admins);
        let previous = txn.group_model(&group)?;

        txn.set_group_model(&model)?;
        txn.set_active_polling(&group, true)?;
        if !txn.add_key_pair(&group, &new.key_pair)? && txn.active_key_pair(&group)?.is_none() {
            // Re-added with a pair kept from before the removal
            txn.activate_key_pair(&group, new.key_pair.public_key())?;
            debug!(%group, "Reactivated known group key pair");
        }

        let mut actions = Vec::new();
        self.push_subscribe(&mut actions, group);
        if previous.as_ref() != Some(&model) {
            actions.push(created_event(&model));
        }

        info!(%group, %sender, members = model.members().len(), "Joined V2 closed group");
        Ok(actions)
    }

    /// V2 Update: any pre-update member may change name and members; admins
    /// are kept. A pre-update admin rotates the key pair when anyone was
    /// removed.
    fn handle_update_v2(
        &self,
        txn: &mut S::Transaction,
        sender: PublicKey,
        group: GroupPublicKey,
        update: &MembershipUpdate,
    ) -> Result<Vec<ProcessorAction>, ProcessError> {
        let old = require_model(txn, &group)?;
        require_role(&old, &sender, Role::Member)?;

        let local = self.local_key();
        let removed_self = !update.members.contains(&local);
        let mut actions = Vec::new();

        if old.removes_any(&update.members) && old.is_admin(&local) {
            if self.config.distribute_on_removal {
                actions.extend(key_distribution::rotate(
                    &self.env,
                    txn,
                    local,
                    group,
                    &update.members,
                    !removed_self,
                )?);
            } else {
                debug!(%group, "Key pair redistribution disabled");
            }
        }

        if removed_self {
            txn.set_active_polling(&group, false)?;
            txn.clear_active_key_pair(&group)?;
            self.push_unsubscribe(&mut actions, group);
            info!(%group, %sender, "Removed from V2 closed group");
        }

        let new = GroupModel::new(group, &update.name, update.members.clone(), old.admins());
        txn.set_group_model(&new)?;

        if new.members() != old.members() || new.name() != old.name() {
            actions.push(update_event(&old, &new, removed_self));
            info!(%group, %sender, members = new.members().len(), "Updated V2 closed group");
        }

        Ok(actions)
    }

    /// V2 KeyPair: only pre-change admins may distribute.
    fn handle_key_pair(
        &self,
        txn: &mut S::Transaction,
        sender: PublicKey,
        group: GroupPublicKey,
        distribution: &KeyPairDistribution,
    ) -> Result<Vec<ProcessorAction>, ProcessError> {
        let model = require_model(txn, &group)?;
        require_role(&model, &sender, Role::Admin)?;

        let wrappers = &distribution.wrappers;
        let Some(unwrapped) = key_distribution::unwrap_for_local(&self.identity, wrappers) else {
            debug!(%group, %sender, "Key pair not addressed to us");
            return Ok(Vec::new());
        };
        let key_pair = unwrapped?;

        if txn.add_key_pair(&group, &key_pair)? {
            info!(%group, %sender, "Stored new group key pair");
        } else {
            debug!(%group, %sender, "Group key pair already known");
        }

        Ok(Vec::new())
    }

    /// V1 New: store provided sender keys of members, fill in what is
    /// missing, then create the group.
    fn handle_new_v1(
        &self,
        txn: &mut S::Transaction,
        sender: PublicKey,
        new: &NewGroupV1,
    ) -> Result<Vec<ProcessorAction>, ProcessError> {
        let group = new.group;
        let local = self.local_key();
        let mut actions = Vec::new();

        sender_keys::store_sender_keys(txn, &group, &new.sender_keys, Some(&new.members))?;

        let provided: BTreeSet<PublicKey> =
            new.sender_keys.iter().map(SenderKey::public_key).collect();
        let missing: BTreeSet<PublicKey> = new.members.difference(&provided).copied().collect();

        if missing.contains(&local) {
            let ratchet = sender_keys::current_or_generate(&self.env, txn, &group, &local)?;
            actions.extend(sender_keys::distribute(local, group, &ratchet, &new.members));
        }
        for member in missing.iter().filter(|member| **member != local) {
            actions.push(sender_keys::request(local, group, *member));
        }

        let model = GroupModel::new(group, &new.name, new.members.clone(), &new.admins);
        let previous = txn.group_model(&group)?;

        txn.set_group_model(&model)?;
        txn.set_group_private_key(&group, &new.group_private_key)?;
        txn.set_active_polling(&group, true)?;

        self.push_subscribe(&mut actions, group);
        if previous.as_ref() != Some(&model) {
            actions.push(created_event(&model));
        }

        info!(
            %group,
            %sender,
            members = model.members().len(),
            missing = missing.len(),
            "Joined V1 closed group"
        );
        Ok(actions)
    }

    /// V1 Info: any pre-update member may change the group. Sender keys are
    /// stored before the rotation check so joining members' keys are kept.
    fn handle_info_v1(
        &self,
        txn: &mut S::Transaction,
        sender: PublicKey,
        info: &GroupInfoV1,
    ) -> Result<Vec<ProcessorAction>, ProcessError> {
        let group = info.group;
        let old = require_model(txn, &group)?;
        require_role(&old, &sender, Role::Member)?;

        sender_keys::store_sender_keys(txn, &group, &info.sender_keys, None)?;

        let local = self.local_key();
        let removed_self = !info.members.contains(&local);
        let mut actions = Vec::new();

        if old.removes_any(&info.members) {
            let rotation = txn.rotate_ratchets(&group)?;
            info!(%group, %sender, rotation, "Rotated sender keys");

            if removed_self {
                txn.remove_group_private_key(&group)?;
                txn.set_active_polling(&group, false)?;
                self.push_unsubscribe(&mut actions, group);
                info!(%group, %sender, "Removed from V1 closed group");
            } else {
                let ratchet = sender_keys::generate_ratchet(&self.env, txn, &group, &local)?;
                actions.extend(sender_keys::distribute(local, group, &ratchet, &info.members));
            }
        }

        let new = GroupModel::new(group, &info.name, info.members.clone(), &info.admins);
        txn.set_group_model(&new)?;

        if new.members() != old.members()
            || new.admins() != old.admins()
            || new.name() != old.name()
        {
            actions.push(update_event(&old, &new, removed_self));
            info!(%group, %sender, members = new.members().len(), "Updated V1 closed group");
        }

        Ok(actions)
    }

    /// V1 SenderKeyRequest: answer members with the local current ratchet,
    /// generating it on first request.
    fn handle_sender_key_request(
        &self,
        txn: &mut S::Transaction,
        sender: PublicKey,
        request: &SenderKeyRequest,
    ) -> Result<Vec<ProcessorAction>, ProcessError> {
        let group = request.group;
        let model = require_model(txn, &group)?;
        require_role(&model, &sender, Role::Member)?;

        let local = self.local_key();
        let ratchet = sender_keys::current_or_generate(&self.env, txn, &group, &local)?;

        info!(%group, requester = %sender, "Responding to sender key request");
        Ok(sender_keys::distribute(local, group, &ratchet, &[sender]))
    }

    /// V1 SenderKey: the embedded owner must be the authenticated sender.
    fn handle_sender_key(
        &self,
        txn: &mut S::Transaction,
        sender: PublicKey,
        distribution: &SenderKeyDistribution,
    ) -> Result<Vec<ProcessorAction>, ProcessError> {
        let owner = distribution.sender_key.public_key();
        if owner != sender {
            return Err(ProcessError::IntegrityViolation {
                reason: format!("sender key of {owner} delivered by {sender}"),
            });
        }

        let group = distribution.group;
        let stored = sender_keys::store_sender_keys(
            txn,
            &group,
            std::slice::from_ref(&distribution.sender_key),
            None,
        )?;

        if stored > 0 {
            let key_index = distribution.sender_key.key_index();
            info!(%group, %sender, key_index, "Received sender key");
        }
        Ok(Vec::new())
    }

    fn push_subscribe(&self, actions: &mut Vec<ProcessorAction>, group: GroupPublicKey) {
        if self.config.push_notifications {
            actions.push(ProcessorAction::PushSubscribe { group, local: self.local_key() });
        }
    }

    fn push_unsubscribe(&self, actions: &mut Vec<ProcessorAction>, group: GroupPublicKey) {
        if self.config.push_notifications {
            actions.push(ProcessorAction::PushUnsubscribe { group, local: self.local_key() });
        }
    }

    /// Create a V2 group with the local user as member and admin.
    ///
    /// Applies the New message locally and returns it addressed to every
    /// other member.
    pub fn create_group_v2(
        &self,
        name: &str,
        members: BTreeSet<PublicKey>,
        admins: BTreeSet<PublicKey>,
    ) -> Result<(GroupPublicKey, Vec<ProcessorAction>), ProcessError> {
        let local = self.local_key();
        let group = self.generate_group_key().0;

        let mut members = members;
        members.insert(local);
        let mut admins = admins;
        admins.insert(local);

        let new = NewGroupV2 {
            group,
            name: name.to_string(),
            key_pair: key_distribution::generate_key_pair(&self.env),
            members,
            admins,
        };

        let mut actions = self.transact(&group, |txn| self.handle_new_v2(txn, local, &new))?;
        actions.extend(new.members.iter().filter(|member| **member != local).map(|member| {
            ProcessorAction::Send {
                message: ControlMessage::v2(local, None, KeyPairUpdate::New(new.clone())),
                destination: Destination::Contact(*member),
            }
        }));

        info!(%group, members = new.members.len(), "Created V2 closed group");
        Ok((group, actions))
    }

    /// Change name and members of a V2 group as the local user.
    ///
    /// Applies the Update locally (rotating the key pair if the local user is
    /// an admin and anyone was removed), sends it to the group and sends a New
    /// with the active key pair to every joining member.
    pub fn update_group_v2(
        &self,
        group: GroupPublicKey,
        name: &str,
        members: BTreeSet<PublicKey>,
    ) -> Result<Vec<ProcessorAction>, ProcessError> {
        let local = self.local_key();
        let update = MembershipUpdate { name: name.to_string(), members };

        self.transact(&group, |txn| {
            let old = require_model(txn, &group)?;
            let mut actions = self.handle_update_v2(txn, local, group, &update)?;

            actions.push(ProcessorAction::Send {
                message: ControlMessage::v2(
                    local,
                    Some(group),
                    KeyPairUpdate::Update(update.clone()),
                ),
                destination: Destination::Group(group),
            });

            let joined: Vec<PublicKey> =
                update.members.difference(old.members()).copied().collect();
            if !joined.is_empty() {
                let Some(key_pair) = txn.active_key_pair(&group)? else {
                    return Err(ProcessError::StateNotFound { group, what: "active key pair" });
                };
                let new = NewGroupV2 {
                    group,
                    name: update.name.clone(),
                    key_pair,
                    members: update.members.clone(),
                    admins: old.admins().clone(),
                };
                actions.extend(joined.into_iter().map(|member| ProcessorAction::Send {
                    message: ControlMessage::v2(local, None, KeyPairUpdate::New(new.clone())),
                    destination: Destination::Contact(member),
                }));
            }

            Ok(actions)
        })
    }

    /// Create a V1 group with the local user as member and admin.
    ///
    /// The creator's ratchet is the only provided sender key; every other
    /// member generates and distributes its own on receipt.
    pub fn create_group_v1(
        &self,
        name: &str,
        members: BTreeSet<PublicKey>,
        admins: BTreeSet<PublicKey>,
    ) -> Result<(GroupPublicKey, Vec<ProcessorAction>), ProcessError> {
        let local = self.local_key();
        let (group, group_private_key) = self.generate_group_key();

        let mut members = members;
        members.insert(local);
        let mut admins = admins;
        admins.insert(local);

        let mut actions = Vec::new();
        let new = self.transact(&group, |txn| {
            let ratchet = sender_keys::generate_ratchet(&self.env, txn, &group, &local)?;
            let new = NewGroupV1 {
                group,
                name: name.to_string(),
                group_private_key,
                sender_keys: vec![SenderKey::from_ratchet(&ratchet, local)],
                members,
                admins,
            };

            let model = GroupModel::new(group, &new.name, new.members.clone(), &new.admins);
            txn.set_group_model(&model)?;
            txn.set_group_private_key(&group, &new.group_private_key)?;
            txn.set_active_polling(&group, true)?;

            self.push_subscribe(&mut actions, group);
            actions.push(created_event(&model));
            Ok(new)
        })?;

        actions.extend(new.members.iter().filter(|member| **member != local).map(|member| {
            ProcessorAction::Send {
                message: ControlMessage::v1(local, SenderKeyUpdate::New(new.clone())),
                destination: Destination::Contact(*member),
            }
        }));

        info!(%group, members = new.members.len(), "Created V1 closed group");
        Ok((group, actions))
    }

    /// Ask `member` for its current V1 sender key.
    pub fn request_sender_key(
        &self,
        group: GroupPublicKey,
        member: PublicKey,
    ) -> Result<Vec<ProcessorAction>, ProcessError> {
        let local = self.local_key();

        self.transact(&group, |txn| {
            let model = require_model(txn, &group)?;
            require_role(&model, &member, Role::Member)?;

            debug!(%group, %member, "Requesting sender key");
            Ok(vec![sender_keys::request(local, group, member)])
        })
    }

    /// Encrypt V1 group content with the local ratchet.
    pub fn encrypt_group_message(
        &self,
        group: GroupPublicKey,
        plaintext: &[u8],
    ) -> Result<EncryptedMessage, ProcessError> {
        let local = self.local_key();
        self.transact(&group, |txn| sender_keys::encrypt(&self.env, txn, &group, &local, plaintext))
    }

    /// Decrypt V1 group content from `sender`, falling back to retained old
    /// ratchets.
    pub fn decrypt_group_message(
        &self,
        group: GroupPublicKey,
        sender: PublicKey,
        encrypted: &EncryptedMessage,
    ) -> Result<Vec<u8>, ProcessError> {
        self.transact(&group, |txn| sender_keys::decrypt(txn, &group, &sender, encrypted))
    }

    /// Seal V2 group content to the active key pair.
    pub fn seal_group_message(
        &self,
        group: GroupPublicKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, ProcessError> {
        let txn = self.storage.begin()?;
        key_distribution::seal_content(&self.env, &txn, &group, plaintext)
    }

    /// Open V2 group content with any key pair in the history.
    pub fn open_group_message(
        &self,
        group: GroupPublicKey,
        sealed: &[u8],
    ) -> Result<Vec<u8>, ProcessError> {
        let txn = self.storage.begin()?;
        key_distribution::open_content(&txn, &group, sealed)
    }

    /// Stored group model.
    pub fn group_model(&self, group: &GroupPublicKey) -> Result<Option<GroupModel>, StorageError> {
        self.read(|txn| txn.group_model(group))
    }

    /// Whether the local client polls `group`.
    pub fn is_polling(&self, group: &GroupPublicKey) -> Result<bool, StorageError> {
        self.read(|txn| txn.is_polling(group))
    }

    /// Every polled group.
    pub fn polled_groups(&self) -> Result<Vec<GroupPublicKey>, StorageError> {
        self.read(|txn| txn.polled_groups())
    }

    /// V2 key-pair history, oldest first.
    pub fn key_pair_history(
        &self,
        group: &GroupPublicKey,
    ) -> Result<Vec<GroupKeyPair>, StorageError> {
        self.read(|txn| txn.key_pairs(group))
    }

    /// Stored ratchet of `sender`.
    pub fn ratchet(
        &self,
        group: &GroupPublicKey,
        sender: &PublicKey,
        generation: RatchetGeneration,
    ) -> Result<Option<Ratchet>, StorageError> {
        self.read(|txn| txn.ratchet(group, sender, generation))
    }

    /// Retained V1 ratchet generations, oldest first.
    pub fn old_ratchet_generations(
        &self,
        group: &GroupPublicKey,
    ) -> Result<Vec<OldGeneration>, StorageError> {
        self.read(|txn| txn.old_generations(group))
    }

    /// Fresh group identity. The private half is only kept by V1 groups.
    fn generate_group_key(&self) -> (GroupPublicKey, GroupPrivateKey) {
        let key_pair = GroupKeyPair::from_secret(self.env.random_array());
        (
            GroupPublicKey::from_bytes(*key_pair.public_key()),
            GroupPrivateKey::from_bytes(*key_pair.private_key()),
        )
    }
}

fn require_model<T: Transaction>(
    txn: &T,
    group: &GroupPublicKey,
) -> Result<GroupModel, ProcessError> {
    txn.group_model(group)?.ok_or(ProcessError::StateNotFound { group: *group, what: "thread" })
}

/// Check `sender` against the pre-message snapshot.
fn require_role(model: &GroupModel, sender: &PublicKey, role: Role) -> Result<(), ProcessError> {
    let allowed = match role {
        Role::Member => model.is_member(sender),
        Role::Admin => model.is_admin(sender),
    };

    if allowed {
        Ok(())
    } else {
        Err(ProcessError::Unauthorized { sender: *sender, group: model.group(), required: role })
    }
}

fn created_event(model: &GroupModel) -> ProcessorAction {
    ProcessorAction::InfoEvent {
        thread: model.group_id().clone(),
        kind: InfoEventKind::GroupCreated,
        details: format!("Joined '{}' with {} members.", model.name(), model.members().len()),
    }
}

fn update_event(old: &GroupModel, new: &GroupModel, removed_self: bool) -> ProcessorAction {
    let kind = if removed_self { InfoEventKind::GroupQuit } else { InfoEventKind::GroupUpdated };
    ProcessorAction::InfoEvent {
        thread: new.group_id().clone(),
        kind,
        details: old.describe_update(new),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{env::SeededEnv, storage::MemoryStorage};

    fn processor(seed: u8) -> ControlMessageProcessor<SeededEnv, MemoryStorage> {
        ControlMessageProcessor::new(
            SeededEnv::new(u64::from(seed)),
            MemoryStorage::new(),
            LocalIdentity::from_secret([seed; 32]),
            ProcessorConfig::default(),
        )
    }

    fn peer(seed: u8) -> PublicKey {
        LocalIdentity::from_secret([seed; 32]).public_key()
    }

    #[test]
    fn create_group_v2_addresses_other_members() {
        let processor = processor(1);
        let members: BTreeSet<PublicKey> = [peer(2), peer(3)].into_iter().collect();

        let (group, actions) = processor.create_group_v2("Team", members, BTreeSet::new()).unwrap();

        let destinations: Vec<Destination> =
            actions.iter().filter_map(ProcessorAction::as_send).map(|(_, d)| d).collect();
        assert_eq!(destinations.len(), 2);
        assert!(destinations.contains(&Destination::Contact(peer(2))));
        assert!(destinations.contains(&Destination::Contact(peer(3))));
        assert!(actions.contains(&ProcessorAction::PushSubscribe {
            group,
            local: processor.local_key()
        }));

        let model = processor.group_model(&group).unwrap().unwrap();
        assert!(model.is_admin(&processor.local_key()));
        assert_eq!(processor.key_pair_history(&group).unwrap().len(), 1);
    }

    #[test]
    fn push_actions_follow_config() {
        let processor = ControlMessageProcessor::new(
            SeededEnv::new(1),
            MemoryStorage::new(),
            LocalIdentity::from_secret([1; 32]),
            ProcessorConfig { push_notifications: false, ..ProcessorConfig::default() },
        );

        let members = [peer(2)].into_iter().collect();
        let (_, actions) = processor.create_group_v1("Team", members, BTreeSet::new()).unwrap();

        assert!(!actions.iter().any(|action| matches!(
            action,
            ProcessorAction::PushSubscribe { .. } | ProcessorAction::PushUnsubscribe { .. }
        )));
    }

    #[test]
    fn rejected_handler_rolls_back_partial_writes() {
        let processor = processor(1);
        let (group, _) = processor
            .create_group_v1("Team", [peer(2)].into_iter().collect(), BTreeSet::new())
            .unwrap();
        let before = processor.storage().snapshot().unwrap();

        // Writes, then fails
        let result = processor.transact(&group, |txn| {
            let other = GroupModel::new(group, "Other", BTreeSet::new(), &BTreeSet::new());
            txn.set_group_model(&other)?;
            Err::<(), _>(ProcessError::IntegrityViolation { reason: "late failure".to_string() })
        });

        assert!(result.is_err());
        assert_eq!(processor.storage().snapshot().unwrap(), before);
    }

    #[test]
    fn unknown_member_request_is_unauthorized() {
        let processor = processor(1);
        let (group, _) = processor
            .create_group_v1("Team", [peer(2)].into_iter().collect(), BTreeSet::new())
            .unwrap();

        let result = processor.request_sender_key(group, peer(9));

        assert!(matches!(result, Err(ProcessError::Unauthorized { required: Role::Member, .. })));
    }

    #[test]
    fn rejected_messages_leave_no_locks_behind() {
        let processor = processor(1);
        let (group, _) = processor
            .create_group_v1("Team", [peer(2)].into_iter().collect(), BTreeSet::new())
            .unwrap();

        for seed in 0..16u8 {
            let unknown = GroupPublicKey::from_bytes([seed; 32]);
            let request = ControlMessage::v1(
                peer(2),
                SenderKeyUpdate::SenderKeyRequest(SenderKeyRequest { group: unknown }),
            );
            let actions = processor.process(&request).unwrap();
            assert!(matches!(actions.as_slice(), [ProcessorAction::Rejected { .. }]));
        }
        processor.encrypt_group_message(group, b"hello").unwrap();

        assert_eq!(processor.locks.len(), 0);
    }

    #[test]
    fn distinct_groups_process_concurrently() {
        let processor = processor(1);
        let groups: Vec<GroupPublicKey> = (0..4)
            .map(|_| {
                processor
                    .create_group_v2("Team", [peer(2)].into_iter().collect(), BTreeSet::new())
                    .unwrap()
                    .0
            })
            .collect();

        std::thread::scope(|scope| {
            for group in &groups {
                let processor = &processor;
                scope.spawn(move || {
                    for round in 0..8 {
                        let update = ControlMessage::v2(
                            peer(2),
                            Some(*group),
                            KeyPairUpdate::Update(MembershipUpdate {
                                name: format!("Team {round}"),
                                members: [processor.local_key(), peer(2)].into_iter().collect(),
                            }),
                        );
                        processor.process(&update).unwrap();
                    }
                });
            }
        });

        for group in &groups {
            assert_eq!(processor.group_model(group).unwrap().unwrap().name(), "Team 7");
        }
    }
}
