//! Group-wide X25519 key pairs (V2)

use std::fmt;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// Size of an X25519 public or private key.
pub const KEY_SIZE: usize = 32;

/// Size of [`GroupKeyPair::to_bytes`] output (public key followed by private
/// key).
pub const KEY_PAIR_ENCODED_SIZE: usize = 2 * KEY_SIZE;

/// Asymmetric key pair shared by every member of a V2 closed group.
///
/// The private half is what members use to open group content; the public
/// half identifies the key pair in the history. Decoding checks that the
/// halves belong together.
#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop)]
#[serde(try_from = "EncodedKeyPair")]
pub struct GroupKeyPair {
    #[zeroize(skip)]
    #[serde(with = "serde_bytes")]
    public_key: [u8; KEY_SIZE],
    #[serde(with = "serde_bytes")]
    private_key: [u8; KEY_SIZE],
}

#[derive(Deserialize, ZeroizeOnDrop)]
struct EncodedKeyPair {
    #[zeroize(skip)]
    #[serde(with = "serde_bytes")]
    public_key: [u8; KEY_SIZE],
    #[serde(with = "serde_bytes")]
    private_key: [u8; KEY_SIZE],
}

impl TryFrom<EncodedKeyPair> for GroupKeyPair {
    type Error = CryptoError;

    fn try_from(encoded: EncodedKeyPair) -> Result<Self, Self::Error> {
        Self::from_parts(encoded.public_key, encoded.private_key)
    }
}

impl GroupKeyPair {
    /// Build a key pair from caller-provided secret bytes.
    pub fn from_secret(secret: [u8; KEY_SIZE]) -> Self {
        let static_secret = StaticSecret::from(secret);
        let public_key = PublicKey::from(&static_secret).to_bytes();

        Self { public_key, private_key: static_secret.to_bytes() }
    }

    /// Rebuild a key pair from its two halves.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyPair` if the public key does not belong to the private key
    pub fn from_parts(
        public_key: [u8; KEY_SIZE],
        private_key: [u8; KEY_SIZE],
    ) -> Result<Self, CryptoError> {
        let key_pair = Self::from_secret(private_key);

        if !bool::from(key_pair.public_key.ct_eq(&public_key)) {
            return Err(CryptoError::InvalidKeyPair {
                reason: "public key does not match private key".to_string(),
            });
        }

        Ok(key_pair)
    }

    /// Public half.
    pub fn public_key(&self) -> &[u8; KEY_SIZE] {
        &self.public_key
    }

    /// Private half.
    pub fn private_key(&self) -> &[u8; KEY_SIZE] {
        &self.private_key
    }

    /// X25519 agreement with a peer public key.
    ///
    /// # Errors
    ///
    /// - `NonContributory` if the peer key is a low-order point
    pub fn agree(&self, peer_public: &[u8; KEY_SIZE]) -> Result<[u8; KEY_SIZE], CryptoError> {
        let secret = StaticSecret::from(self.private_key);
        let shared = secret.diffie_hellman(&PublicKey::from(*peer_public));

        if !shared.was_contributory() {
            return Err(CryptoError::NonContributory);
        }

        Ok(shared.to_bytes())
    }

    /// Fixed-size encoding: public key followed by private key.
    pub fn to_bytes(&self) -> [u8; KEY_PAIR_ENCODED_SIZE] {
        let mut bytes = [0u8; KEY_PAIR_ENCODED_SIZE];
        bytes[..KEY_SIZE].copy_from_slice(&self.public_key);
        bytes[KEY_SIZE..].copy_from_slice(&self.private_key);
        bytes
    }

    /// Parse the encoding produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// - `InvalidKeyPair` on wrong length or mismatched halves
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_PAIR_ENCODED_SIZE {
            return Err(CryptoError::InvalidKeyPair {
                reason: format!("expected {KEY_PAIR_ENCODED_SIZE} bytes, got {}", bytes.len()),
            });
        }

        let mut public_key = [0u8; KEY_SIZE];
        let mut private_key = [0u8; KEY_SIZE];
        public_key.copy_from_slice(&bytes[..KEY_SIZE]);
        private_key.copy_from_slice(&bytes[KEY_SIZE..]);

        Self::from_parts(public_key, private_key)
    }
}

impl PartialEq for GroupKeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
            && bool::from(self.private_key.ct_eq(&other.private_key))
    }
}

impl Eq for GroupKeyPair {}

impl fmt::Debug for GroupKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupKeyPair")
            .field("public_key", &HexBytes(&self.public_key))
            .field("private_key", &"***")
            .finish()
    }
}

struct HexBytes<'a>(&'a [u8]);

impl fmt::Debug for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_secret_is_deterministic() {
        let a = GroupKeyPair::from_secret([3; 32]);
        let b = GroupKeyPair::from_secret([3; 32]);
        assert_eq!(a, b);
    }

    #[test]
    fn encoding_roundtrip() {
        let key_pair = GroupKeyPair::from_secret([9; 32]);
        let decoded = GroupKeyPair::from_bytes(&key_pair.to_bytes()).unwrap();
        assert_eq!(decoded, key_pair);
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        assert!(matches!(
            GroupKeyPair::from_bytes(&[0u8; 10]),
            Err(CryptoError::InvalidKeyPair { .. })
        ));
    }

    #[test]
    fn from_parts_rejects_mismatched_halves() {
        let a = GroupKeyPair::from_secret([1; 32]);
        let b = GroupKeyPair::from_secret([2; 32]);

        let result = GroupKeyPair::from_parts(*a.public_key(), *b.private_key());
        assert!(matches!(result, Err(CryptoError::InvalidKeyPair { .. })));
    }

    #[test]
    fn deserialize_rejects_mismatched_halves() {
        let a = GroupKeyPair::from_secret([1; 32]);
        let b = GroupKeyPair::from_secret([2; 32]);
        let forged = GroupKeyPair { public_key: *a.public_key(), private_key: *b.private_key() };

        let mut bytes = Vec::new();
        ciborium::into_writer(&forged, &mut bytes).unwrap();
        assert!(ciborium::from_reader::<GroupKeyPair, _>(bytes.as_slice()).is_err());

        bytes.clear();
        ciborium::into_writer(&a, &mut bytes).unwrap();
        assert_eq!(ciborium::from_reader::<GroupKeyPair, _>(bytes.as_slice()).unwrap(), a);
    }

    #[test]
    fn agreement_is_symmetric() {
        let a = GroupKeyPair::from_secret([1; 32]);
        let b = GroupKeyPair::from_secret([2; 32]);

        assert_eq!(a.agree(b.public_key()).unwrap(), b.agree(a.public_key()).unwrap());
    }

    #[test]
    fn agreement_rejects_low_order_point() {
        let a = GroupKeyPair::from_secret([1; 32]);
        assert_eq!(a.agree(&[0u8; 32]), Err(CryptoError::NonContributory));
    }

    #[test]
    fn debug_hides_private_key() {
        let rendered = format!("{:?}", GroupKeyPair::from_secret([5; 32]));
        assert!(rendered.contains("***"));
    }
}
