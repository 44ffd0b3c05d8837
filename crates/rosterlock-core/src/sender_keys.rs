//! V1 sender-key protocol.
//!
//! Every member owns one ratchet per group and hands a snapshot of it
//! ([`SenderKey`]) point-to-point to every other member. There is no shared
//! group secret: rotation means every surviving member generates a fresh
//! ratchet and redistributes it.
//!
//! Content encryption steps the local ratchet; decryption tries the sender's
//! current ratchet and then every retained old generation, newest first, so
//! messages sent before a rotation stay readable.

use std::collections::BTreeSet;

use rosterlock_crypto::{
    CryptoError, EncryptedMessage, MAX_SKIP, NONCE_RANDOM_SIZE, Ratchet, decrypt_message,
    encrypt_message,
};
use tracing::{debug, trace};

use crate::{
    action::{Destination, ProcessorAction},
    env::Environment,
    error::ProcessError,
    message::{ControlMessage, SenderKey, SenderKeyDistribution, SenderKeyRequest, SenderKeyUpdate},
    ratchet_store::{RatchetGeneration, RatchetStore},
    storage::{StorageError, Transaction},
    types::{GroupPublicKey, PublicKey},
};

/// Generate a fresh ratchet for `sender` and store it as current.
pub(crate) fn generate_ratchet<E: Environment, T: Transaction>(
    env: &E,
    txn: &mut T,
    group: &GroupPublicKey,
    sender: &PublicKey,
) -> Result<Ratchet, StorageError> {
    let ratchet = Ratchet::new(env.random_array());
    txn.set_ratchet(group, sender, &ratchet, RatchetGeneration::Current)?;

    debug!(%group, %sender, "Generated ratchet");
    Ok(ratchet)
}

/// Current ratchet of `sender`, generating and storing one if absent.
pub(crate) fn current_or_generate<E: Environment, T: Transaction>(
    env: &E,
    txn: &mut T,
    group: &GroupPublicKey,
    sender: &PublicKey,
) -> Result<Ratchet, StorageError> {
    match txn.ratchet(group, sender, RatchetGeneration::Current)? {
        Some(ratchet) => Ok(ratchet),
        None => generate_ratchet(env, txn, group, sender),
    }
}

/// Whether `snapshot` is an earlier position of `existing`.
///
/// Redelivered sender keys must not rewind a ratchet that already advanced
/// past them. Gaps beyond [`MAX_SKIP`] are not replayed and count as a new
/// key.
fn is_stale_snapshot(snapshot: &SenderKey, existing: &Ratchet) -> bool {
    if existing.key_index() < snapshot.key_index()
        || existing.key_index() - snapshot.key_index() > MAX_SKIP
    {
        return false;
    }

    let mut replay = snapshot.to_ratchet();
    while replay.key_index() < existing.key_index() {
        if replay.step().is_err() {
            return false;
        }
    }
    replay.chain_key() == existing.chain_key()
}

/// Store sender keys as current ratchets.
///
/// With `members`, keys of non-members are skipped. Returns the number of
/// ratchets written.
pub(crate) fn store_sender_keys<T: Transaction>(
    txn: &mut T,
    group: &GroupPublicKey,
    sender_keys: &[SenderKey],
    members: Option<&BTreeSet<PublicKey>>,
) -> Result<usize, StorageError> {
    let mut stored = 0;

    for sender_key in sender_keys {
        let owner = sender_key.public_key();

        if members.is_some_and(|members| !members.contains(&owner)) {
            debug!(%group, sender = %owner, "Skipping sender key of non-member");
            continue;
        }

        let existing = txn.ratchet(group, &owner, RatchetGeneration::Current)?;
        if existing.as_ref().is_some_and(|existing| is_stale_snapshot(sender_key, existing)) {
            trace!(%group, sender = %owner, "Sender key already applied");
            continue;
        }

        txn.set_ratchet(group, &owner, &sender_key.to_ratchet(), RatchetGeneration::Current)?;
        stored += 1;
    }

    Ok(stored)
}

/// Point-to-point delivery of `local`'s ratchet to every other recipient.
pub(crate) fn distribute<'a>(
    local: PublicKey,
    group: GroupPublicKey,
    ratchet: &Ratchet,
    recipients: impl IntoIterator<Item = &'a PublicKey>,
) -> Vec<ProcessorAction> {
    let sender_key = SenderKey::from_ratchet(ratchet, local);

    recipients
        .into_iter()
        .filter(|member| **member != local)
        .map(|member| ProcessorAction::Send {
            message: ControlMessage::v1(
                local,
                SenderKeyUpdate::SenderKey(SenderKeyDistribution {
                    group,
                    sender_key: sender_key.clone(),
                }),
            ),
            destination: Destination::Contact(*member),
        })
        .collect()
}

/// Ask `member` for its current sender key.
pub(crate) fn request(
    local: PublicKey,
    group: GroupPublicKey,
    member: PublicKey,
) -> ProcessorAction {
    ProcessorAction::Send {
        message: ControlMessage::v1(
            local,
            SenderKeyUpdate::SenderKeyRequest(SenderKeyRequest { group }),
        ),
        destination: Destination::Contact(member),
    }
}

/// Encrypt group content with `local`'s current ratchet and persist the
/// advanced ratchet.
pub(crate) fn encrypt<E: Environment, T: Transaction>(
    env: &E,
    txn: &mut T,
    group: &GroupPublicKey,
    local: &PublicKey,
    plaintext: &[u8],
) -> Result<EncryptedMessage, ProcessError> {
    let Some(mut ratchet) = txn.ratchet(group, local, RatchetGeneration::Current)? else {
        return Err(ProcessError::StateNotFound { group: *group, what: "local ratchet" });
    };

    let message_key = ratchet.step()?;
    let random: [u8; NONCE_RANDOM_SIZE] = env.random_array();
    let encrypted = encrypt_message(plaintext, &message_key, random);

    txn.set_ratchet(group, local, &ratchet, RatchetGeneration::Current)?;
    Ok(encrypted)
}

/// Decrypt group content from `sender`.
///
/// Tries the current ratchet, then old generations newest first. The
/// ratchet that succeeds is persisted so its message key cannot be reused.
pub(crate) fn decrypt<T: Transaction>(
    txn: &mut T,
    group: &GroupPublicKey,
    sender: &PublicKey,
    encrypted: &EncryptedMessage,
) -> Result<Vec<u8>, ProcessError> {
    let mut last_error: Option<CryptoError> = None;

    if let Some(ratchet) = txn.ratchet(group, sender, RatchetGeneration::Current)? {
        match try_decrypt(ratchet, encrypted) {
            Ok((plaintext, advanced)) => {
                txn.set_ratchet(group, sender, &advanced, RatchetGeneration::Current)?;
                return Ok(plaintext);
            },
            Err(e) => last_error = Some(e),
        }
    }

    for generation in txn.old_generations(group)?.into_iter().rev() {
        let Some((_, ratchet)) = generation.ratchets.into_iter().find(|(owner, _)| owner == sender)
        else {
            continue;
        };

        match try_decrypt(ratchet, encrypted) {
            Ok((plaintext, advanced)) => {
                txn.set_old_ratchet(group, generation.rotation, sender, &advanced)?;
                debug!(
                    %group,
                    %sender,
                    rotation = generation.rotation,
                    "Decrypted with old ratchet"
                );
                return Ok(plaintext);
            },
            Err(e) => last_error = Some(e),
        }
    }

    match last_error {
        Some(e) => Err(e.into()),
        None => Err(ProcessError::StateNotFound { group: *group, what: "sender ratchet" }),
    }
}

fn try_decrypt(
    mut ratchet: Ratchet,
    encrypted: &EncryptedMessage,
) -> Result<(Vec<u8>, Ratchet), CryptoError> {
    let message_key = ratchet.message_key_at(encrypted.key_index)?;
    let plaintext = decrypt_message(encrypted, &message_key)?;
    Ok((plaintext, ratchet))
}
