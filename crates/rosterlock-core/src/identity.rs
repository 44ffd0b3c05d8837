//! Local user identity.

use rosterlock_crypto::GroupKeyPair;

use crate::{env::Environment, types::PublicKey};

/// X25519 key pair of the local user. Its public key is the member identity
/// used in every roster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalIdentity {
    key_pair: GroupKeyPair,
}

impl LocalIdentity {
    /// Identity from secret bytes.
    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self { key_pair: GroupKeyPair::from_secret(secret) }
    }

    /// Fresh identity drawn from the environment.
    pub fn generate(env: &impl Environment) -> Self {
        Self::from_secret(env.random_array())
    }

    /// Member identity.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(*self.key_pair.public_key())
    }

    pub(crate) fn key_pair(&self) -> &GroupKeyPair {
        &self.key_pair
    }
}
