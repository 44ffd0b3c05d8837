//! Typed control messages.
//!
//! Dispatch is two-level: protocol generation, then kind within the
//! generation. Both levels are closed enums matched exhaustively; anything
//! outside them decodes to [`ControlKind::Unrecognized`] instead of failing.
//!
//! # Wire envelope
//!
//! [`ControlMessage::encode`] produces a CBOR map:
//!
//! ```text
//! { sender, group?, generation: u8, kind: u8, body }
//! ```
//!
//! Framing and transport belong to the caller.

use std::{collections::BTreeSet, fmt};

use ciborium::Value;
use rosterlock_crypto::{GroupKeyPair, Ratchet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{GroupPrivateKey, GroupPublicKey, PublicKey};

const GENERATION_V1: u8 = 1;
const GENERATION_V2: u8 = 2;

const V1_NEW: u8 = 0;
const V1_INFO: u8 = 1;
const V1_SENDER_KEY_REQUEST: u8 = 2;
const V1_SENDER_KEY: u8 = 3;

const V2_NEW: u8 = 0;
const V2_UPDATE: u8 = 1;
const V2_KEY_PAIR: u8 = 2;

/// Failure to encode or decode a control message envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Serialization failed
    #[error("encode error: {0}")]
    Encode(String),

    /// Input is not a valid envelope or body
    #[error("decode error: {0}")]
    Decode(String),
}

/// Wire snapshot of a V1 ratchet.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderKey {
    #[serde(with = "serde_bytes")]
    chain_key: [u8; 32],
    key_index: u32,
    public_key: PublicKey,
}

impl SenderKey {
    /// Snapshot `ratchet` as owned by `public_key`.
    pub fn from_ratchet(ratchet: &Ratchet, public_key: PublicKey) -> Self {
        Self { chain_key: *ratchet.chain_key(), key_index: ratchet.key_index(), public_key }
    }

    /// Owner of the ratchet.
    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Index of the next message key.
    pub fn key_index(&self) -> u32 {
        self.key_index
    }

    /// Ratchet resuming at this snapshot, with an empty key cache.
    pub fn to_ratchet(&self) -> Ratchet {
        Ratchet::from_snapshot(self.chain_key, self.key_index)
    }
}

impl fmt::Debug for SenderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderKey")
            .field("public_key", &self.public_key)
            .field("key_index", &self.key_index)
            .field("chain_key", &"***")
            .finish()
    }
}

/// Group key pair sealed for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKeyPairWrapper {
    /// Recipient member
    pub recipient: PublicKey,
    /// Sealed `GroupKeyPair` encoding
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

/// V1 group creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGroupV1 {
    /// Group identifier
    pub group: GroupPublicKey,
    /// Display name
    pub name: String,
    /// Private key of the group
    pub group_private_key: GroupPrivateKey,
    /// Sender keys known to the creator
    pub sender_keys: Vec<SenderKey>,
    /// Initial members
    pub members: BTreeSet<PublicKey>,
    /// Initial admins
    pub admins: BTreeSet<PublicKey>,
}

/// V1 membership or name change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfoV1 {
    /// Group identifier
    pub group: GroupPublicKey,
    /// Display name after the change
    pub name: String,
    /// Sender keys of joining members
    pub sender_keys: Vec<SenderKey>,
    /// Members after the change
    pub members: BTreeSet<PublicKey>,
    /// Admins after the change
    pub admins: BTreeSet<PublicKey>,
}

/// V1 request for the recipient's current sender key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderKeyRequest {
    /// Group identifier
    pub group: GroupPublicKey,
}

/// V1 point-to-point delivery of one member's sender key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderKeyDistribution {
    /// Group identifier
    pub group: GroupPublicKey,
    /// Sender key, owned by the envelope sender
    pub sender_key: SenderKey,
}

/// V2 group creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGroupV2 {
    /// Group identifier
    pub group: GroupPublicKey,
    /// Display name
    pub name: String,
    /// First group key pair
    pub key_pair: GroupKeyPair,
    /// Initial members
    pub members: BTreeSet<PublicKey>,
    /// Initial admins
    pub admins: BTreeSet<PublicKey>,
}

/// V2 membership or name change. The group travels in the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipUpdate {
    /// Display name after the change
    pub name: String,
    /// Members after the change
    pub members: BTreeSet<PublicKey>,
}

/// V2 distribution of a new group key pair. The group travels in the
/// envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPairDistribution {
    /// One wrapper per recipient
    pub wrappers: Vec<EncryptedKeyPairWrapper>,
}

/// V1 kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderKeyUpdate {
    /// Group creation
    New(NewGroupV1),
    /// Membership or name change
    Info(GroupInfoV1),
    /// Ask the recipient for its sender key
    SenderKeyRequest(SenderKeyRequest),
    /// Deliver the sender's sender key
    SenderKey(SenderKeyDistribution),
}

impl SenderKeyUpdate {
    /// Group carried in the payload.
    pub fn group(&self) -> GroupPublicKey {
        match self {
            Self::New(m) => m.group,
            Self::Info(m) => m.group,
            Self::SenderKeyRequest(m) => m.group,
            Self::SenderKey(m) => m.group,
        }
    }
}

/// V2 kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPairUpdate {
    /// Group creation
    New(NewGroupV2),
    /// Membership or name change
    Update(MembershipUpdate),
    /// New group key pair
    KeyPair(KeyPairDistribution),
}

/// Generation-level dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlKind {
    /// Sender-key protocol
    V1(SenderKeyUpdate),
    /// Key-pair distribution protocol
    V2(KeyPairUpdate),
    /// Discriminants outside the known space
    Unrecognized {
        /// Generation discriminant
        generation: u8,
        /// Kind discriminant
        kind: u8,
    },
}

/// A decoded control message with its authenticated sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    /// Authenticated envelope sender
    pub sender: PublicKey,
    /// Envelope group, required by V2 Update and KeyPair
    pub group: Option<GroupPublicKey>,
    /// Payload
    pub kind: ControlKind,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    sender: PublicKey,
    group: Option<GroupPublicKey>,
    generation: u8,
    kind: u8,
    body: Value,
}

impl ControlMessage {
    /// V1 message. The group travels in the payload.
    pub fn v1(sender: PublicKey, update: SenderKeyUpdate) -> Self {
        Self { sender, group: None, kind: ControlKind::V1(update) }
    }

    /// V2 message. Update and KeyPair require `group`.
    pub fn v2(sender: PublicKey, group: Option<GroupPublicKey>, update: KeyPairUpdate) -> Self {
        Self { sender, group, kind: ControlKind::V2(update) }
    }

    /// Group the message targets, wherever it is carried.
    pub fn target_group(&self) -> Option<GroupPublicKey> {
        match &self.kind {
            ControlKind::V1(update) => Some(update.group()),
            ControlKind::V2(KeyPairUpdate::New(m)) => Some(m.group),
            ControlKind::V2(KeyPairUpdate::Update(_) | KeyPairUpdate::KeyPair(_))
            | ControlKind::Unrecognized { .. } => self.group,
        }
    }

    /// CBOR envelope encoding.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let (generation, kind, body) = match &self.kind {
            ControlKind::V1(update) => match update {
                SenderKeyUpdate::New(m) => (GENERATION_V1, V1_NEW, to_value(m)?),
                SenderKeyUpdate::Info(m) => (GENERATION_V1, V1_INFO, to_value(m)?),
                SenderKeyUpdate::SenderKeyRequest(m) => {
                    (GENERATION_V1, V1_SENDER_KEY_REQUEST, to_value(m)?)
                },
                SenderKeyUpdate::SenderKey(m) => (GENERATION_V1, V1_SENDER_KEY, to_value(m)?),
            },
            ControlKind::V2(update) => match update {
                KeyPairUpdate::New(m) => (GENERATION_V2, V2_NEW, to_value(m)?),
                KeyPairUpdate::Update(m) => (GENERATION_V2, V2_UPDATE, to_value(m)?),
                KeyPairUpdate::KeyPair(m) => (GENERATION_V2, V2_KEY_PAIR, to_value(m)?),
            },
            ControlKind::Unrecognized { generation, kind } => (*generation, *kind, Value::Null),
        };

        let envelope = Envelope { sender: self.sender, group: self.group, generation, kind, body };

        let mut bytes = Vec::new();
        ciborium::into_writer(&envelope, &mut bytes)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    /// Decode a CBOR envelope.
    ///
    /// Unknown discriminants decode to [`ControlKind::Unrecognized`] so the
    /// processor can reject them explicitly.
    ///
    /// # Errors
    ///
    /// - `Decode` if the envelope or a known body is malformed
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let envelope: Envelope =
            ciborium::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;

        let body = &envelope.body;
        let kind = match (envelope.generation, envelope.kind) {
            (GENERATION_V1, V1_NEW) => ControlKind::V1(SenderKeyUpdate::New(from_value(body)?)),
            (GENERATION_V1, V1_INFO) => ControlKind::V1(SenderKeyUpdate::Info(from_value(body)?)),
            (GENERATION_V1, V1_SENDER_KEY_REQUEST) => {
                ControlKind::V1(SenderKeyUpdate::SenderKeyRequest(from_value(body)?))
            },
            (GENERATION_V1, V1_SENDER_KEY) => {
                ControlKind::V1(SenderKeyUpdate::SenderKey(from_value(body)?))
            },
            (GENERATION_V2, V2_NEW) => ControlKind::V2(KeyPairUpdate::New(from_value(body)?)),
            (GENERATION_V2, V2_UPDATE) => ControlKind::V2(KeyPairUpdate::Update(from_value(body)?)),
            (GENERATION_V2, V2_KEY_PAIR) => {
                ControlKind::V2(KeyPairUpdate::KeyPair(from_value(body)?))
            },
            (generation, kind) => ControlKind::Unrecognized { generation, kind },
        };

        Ok(Self { sender: envelope.sender, group: envelope.group, kind })
    }
}

fn to_value<T: Serialize>(body: &T) -> Result<Value, CodecError> {
    Value::serialized(body).map_err(|e| CodecError::Encode(e.to_string()))
}

fn from_value<T: for<'de> Deserialize<'de>>(body: &Value) -> Result<T, CodecError> {
    body.deserialized().map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> PublicKey {
        PublicKey::from_bytes([b; 32])
    }

    #[test]
    fn sender_key_snapshot_resumes_ratchet() {
        let mut ratchet = Ratchet::new([4; 32]);
        ratchet.step().unwrap();

        let snapshot = SenderKey::from_ratchet(&ratchet, key(1));
        let mut resumed = snapshot.to_ratchet();

        assert_eq!(snapshot.key_index(), 1);
        assert_eq!(resumed.step().unwrap().key(), ratchet.step().unwrap().key());
    }

    #[test]
    fn sender_key_debug_hides_chain_key() {
        let snapshot = SenderKey::from_ratchet(&Ratchet::new([4; 32]), key(1));
        assert!(format!("{snapshot:?}").contains("***"));
    }

    #[test]
    fn v2_update_survives_encoding() {
        let group = GroupPublicKey::from_bytes([7; 32]);
        let message = ControlMessage::v2(
            key(1),
            Some(group),
            KeyPairUpdate::Update(MembershipUpdate {
                name: "team".to_string(),
                members: [key(1), key(2)].into_iter().collect(),
            }),
        );

        let decoded = ControlMessage::decode(&message.encode().unwrap()).unwrap();

        assert_eq!(decoded, message);
        assert_eq!(decoded.target_group(), Some(group));
    }

    #[test]
    fn v1_sender_key_survives_encoding() {
        let message = ControlMessage::v1(
            key(1),
            SenderKeyUpdate::SenderKey(SenderKeyDistribution {
                group: GroupPublicKey::from_bytes([7; 32]),
                sender_key: SenderKey::from_ratchet(&Ratchet::new([4; 32]), key(1)),
            }),
        );

        assert_eq!(ControlMessage::decode(&message.encode().unwrap()).unwrap(), message);
    }

    #[test]
    fn unknown_discriminants_decode_as_unrecognized() {
        let message = ControlMessage {
            sender: key(1),
            group: None,
            kind: ControlKind::Unrecognized { generation: 9, kind: 4 },
        };

        let decoded = ControlMessage::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded.kind, ControlKind::Unrecognized { generation: 9, kind: 4 });
    }

    #[test]
    fn known_kind_with_wrong_body_fails() {
        let message = ControlMessage {
            sender: key(1),
            group: None,
            kind: ControlKind::Unrecognized { generation: GENERATION_V2, kind: V2_UPDATE },
        };

        let result = ControlMessage::decode(&message.encode().unwrap());
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(ControlMessage::decode(&[0xff, 0x00, 0x13]).is_err());
    }
}
