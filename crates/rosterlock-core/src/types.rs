//! Identifiers: member public keys, group public keys and thread ids.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix of the thread id derived from a closed group's public key.
const CLOSED_GROUP_ID_PREFIX: &str = "__closed_group__!";

/// Failure to parse a hex-encoded key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyParseError {
    /// Input is not valid hex
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// Decoded key has the wrong length
    #[error("expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// X25519 public key identifying one participant.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "serde_bytes")] [u8; 32]);

impl PublicKey {
    /// Wrap raw key bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lower-case hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &self.to_hex()[..8])
    }
}

impl FromStr for PublicKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| KeyParseError::InvalidHex(e.to_string()))?;
        let len = bytes.len();
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| KeyParseError::InvalidLength(len))?;
        Ok(Self(bytes))
    }
}

/// Stable identifier of a closed group.
///
/// Also the identity the local client polls and subscribes to push
/// notifications for.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupPublicKey(PublicKey);

impl GroupPublicKey {
    /// Wrap raw key bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(PublicKey::from_bytes(bytes))
    }

    /// Underlying public key.
    pub fn as_key(&self) -> &PublicKey {
        &self.0
    }

    /// Lower-case hex encoding.
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl fmt::Display for GroupPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for GroupPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupPublicKey({})", &self.to_hex()[..8])
    }
}

impl FromStr for GroupPublicKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<PublicKey> for GroupPublicKey {
    fn from(key: PublicKey) -> Self {
        Self(key)
    }
}

/// Private key of a V1 group, distributed to members on creation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPrivateKey(#[serde(with = "serde_bytes")] [u8; 32]);

impl GroupPrivateKey {
    /// Wrap raw key bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for GroupPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GroupPrivateKey(***)")
    }
}

/// Identifier of the conversation thread backing a closed group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(String);

impl GroupId {
    /// Thread id for a closed group.
    pub fn for_group(group: &GroupPublicKey) -> Self {
        Self(format!("{CLOSED_GROUP_ID_PREFIX}{}", group.to_hex()))
    }

    /// String form of the id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let key = PublicKey::from_bytes([0xAB; 32]);
        let parsed: PublicKey = key.to_hex().parse().unwrap();
        assert_eq!(parsed, key);
        assert_eq!(key.to_string(), "ab".repeat(32));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(matches!("zz".parse::<PublicKey>(), Err(KeyParseError::InvalidHex(_))));
        assert_eq!("abcd".parse::<PublicKey>(), Err(KeyParseError::InvalidLength(2)));
    }

    #[test]
    fn group_id_is_derived_from_group_key() {
        let group = GroupPublicKey::from_bytes([1; 32]);
        let id = GroupId::for_group(&group);
        assert!(id.as_str().starts_with(CLOSED_GROUP_ID_PREFIX));
        assert!(id.as_str().ends_with(&group.to_hex()));
    }
}
