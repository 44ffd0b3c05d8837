//! V2 key-pair distribution protocol.
//!
//! An admin generates one group-wide [`GroupKeyPair`], seals its encoding
//! for every recipient and sends the wrappers to the group in a single
//! KeyPair message. Each member opens the wrapper addressed to it and
//! appends the key pair to its history.
//!
//! Group content is sealed to the active key pair's public key; opening
//! tries the whole history, newest first.

use std::collections::BTreeSet;

use rosterlock_crypto::{CryptoError, GroupKeyPair, open, seal};
use tracing::{debug, error, info};

use crate::{
    action::{Destination, ProcessorAction},
    env::Environment,
    error::ProcessError,
    group_key_store::GroupKeyStore,
    identity::LocalIdentity,
    message::{ControlMessage, EncryptedKeyPairWrapper, KeyPairDistribution, KeyPairUpdate},
    storage::Transaction,
    types::{GroupPublicKey, PublicKey},
};

/// Fresh key pair drawn from the environment.
pub(crate) fn generate_key_pair<E: Environment>(env: &E) -> GroupKeyPair {
    GroupKeyPair::from_secret(env.random_array())
}

/// Seal `key_pair` for every recipient.
///
/// Best-effort: a recipient whose key cannot be used is logged and skipped,
/// the others still receive their wrapper.
pub(crate) fn wrap_for_recipients<E: Environment>(
    env: &E,
    group: &GroupPublicKey,
    key_pair: &GroupKeyPair,
    recipients: &BTreeSet<PublicKey>,
) -> Vec<EncryptedKeyPairWrapper> {
    let encoded = key_pair.to_bytes();

    recipients
        .iter()
        .filter_map(|recipient| {
            match seal(&encoded, recipient.as_bytes(), env.random_array(), env.random_array()) {
                Ok(ciphertext) => {
                    Some(EncryptedKeyPairWrapper { recipient: *recipient, ciphertext })
                },
                Err(e) => {
                    error!(%group, %recipient, error = %e, "Failed to wrap key pair");
                    None
                },
            }
        })
        .collect()
}

/// Open the wrapper addressed to `identity`.
///
/// `None` if no wrapper is addressed to it.
pub(crate) fn unwrap_for_local(
    identity: &LocalIdentity,
    wrappers: &[EncryptedKeyPairWrapper],
) -> Option<Result<GroupKeyPair, CryptoError>> {
    let local = identity.public_key();
    let wrapper = wrappers.iter().find(|wrapper| wrapper.recipient == local)?;

    Some(
        open(&wrapper.ciphertext, identity.key_pair())
            .and_then(|plaintext| GroupKeyPair::from_bytes(&plaintext)),
    )
}

/// Generate a new key pair, store it as active and build the KeyPair
/// message for `recipients`.
///
/// With `store_locally == false` the pair is only distributed, used when
/// the local admin is itself leaving.
pub(crate) fn rotate<E: Environment, T: Transaction>(
    env: &E,
    txn: &mut T,
    local: PublicKey,
    group: GroupPublicKey,
    recipients: &BTreeSet<PublicKey>,
    store_locally: bool,
) -> Result<Vec<ProcessorAction>, ProcessError> {
    let key_pair = generate_key_pair(env);
    let wrappers = wrap_for_recipients(env, &group, &key_pair, recipients);

    if store_locally {
        txn.add_key_pair(&group, &key_pair)?;
    }

    info!(
        %group,
        recipients = recipients.len(),
        wrapped = wrappers.len(),
        "Distributing new group key pair"
    );

    Ok(vec![ProcessorAction::Send {
        message: ControlMessage::v2(
            local,
            Some(group),
            KeyPairUpdate::KeyPair(KeyPairDistribution { wrappers }),
        ),
        destination: Destination::Group(group),
    }])
}

/// Seal group content to the active key pair.
pub(crate) fn seal_content<E: Environment, T: Transaction>(
    env: &E,
    txn: &T,
    group: &GroupPublicKey,
    plaintext: &[u8],
) -> Result<Vec<u8>, ProcessError> {
    let Some(active) = txn.active_key_pair(group)? else {
        return Err(ProcessError::StateNotFound { group: *group, what: "active key pair" });
    };

    Ok(seal(plaintext, active.public_key(), env.random_array(), env.random_array())?)
}

/// Open group content with any key pair in the history, newest first.
pub(crate) fn open_content<T: Transaction>(
    txn: &T,
    group: &GroupPublicKey,
    sealed: &[u8],
) -> Result<Vec<u8>, ProcessError> {
    let history = txn.key_pairs(group)?;
    let mut last_error = None;

    for (index, key_pair) in history.iter().enumerate().rev() {
        match open(sealed, key_pair) {
            Ok(plaintext) => {
                debug!(%group, index, "Opened group content");
                return Ok(plaintext);
            },
            Err(e) => last_error = Some(e),
        }
    }

    match last_error {
        Some(e) => Err(e.into()),
        None => Err(ProcessError::StateNotFound { group: *group, what: "key pair history" }),
    }
}
