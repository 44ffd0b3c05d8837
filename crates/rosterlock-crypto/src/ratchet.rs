//! Per-sender symmetric ratchet (V1 sender keys)
//!
//! # Security Properties
//!
//! - Forward Secrecy: Old chain keys are overwritten when advancing
//! - Key Uniqueness: Each key index produces a unique message key
//! - Determinism: Same chain key always produces same key sequence
//!
//! Unlike a purely sequential ratchet, receivers may see messages out of
//! order. Message keys skipped over while catching up are cached so that late
//! messages remain decryptable, bounded by [`MAX_SKIP`] and
//! [`MAX_CACHED_KEYS`].

use std::fmt;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Label for deriving the next chain key
const CHAIN_LABEL: &[u8] = b"chain";

/// Label for deriving a message key
const MESSAGE_LABEL: &[u8] = b"message";

/// Maximum number of key indices to skip when catching up.
/// This limits the work done when receiving out-of-order messages.
pub const MAX_SKIP: u32 = 1000;

/// Maximum number of skipped message keys retained per ratchet.
pub const MAX_CACHED_KEYS: usize = 2000;

/// A message key derived from the ratchet.
///
/// This key is used for a single message encryption/decryption.
/// It should be used immediately and then discarded.
#[derive(Clone)]
pub struct MessageKey {
    /// The 32-byte symmetric key for XChaCha20-Poly1305
    key: [u8; 32],
    /// The ratchet position this key was derived at
    key_index: u32,
}

impl MessageKey {
    /// 32-byte symmetric key for XChaCha20-Poly1305 AEAD.
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// Ratchet position this key was derived at.
    pub fn key_index(&self) -> u32 {
        self.key_index
    }
}

impl Drop for MessageKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Skipped message key kept for out-of-order delivery.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct CachedMessageKey {
    key_index: u32,
    #[serde(with = "serde_bytes")]
    key: [u8; 32],
}

/// Forward-secure per-sender ratchet.
///
/// This is the persisted form: the chain key, the number of steps taken so
/// far (`key_index`) and the message keys skipped while catching up. Each
/// [`step()`](Self::step) call:
/// 1. Derives a message key from the current chain key
/// 2. Derives the next chain key
/// 3. Overwrites the old chain key (forward secrecy)
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Ratchet {
    #[serde(with = "serde_bytes")]
    chain_key: [u8; 32],
    key_index: u32,
    cached_message_keys: Vec<CachedMessageKey>,
}

impl Ratchet {
    /// Create a fresh ratchet from a random chain key (key index 0).
    pub fn new(chain_key: [u8; 32]) -> Self {
        Self { chain_key, key_index: 0, cached_message_keys: Vec::new() }
    }

    /// Rebuild a ratchet from a distributed sender key snapshot.
    ///
    /// Snapshots never carry cached keys; the receiver starts with an empty
    /// cache.
    pub fn from_snapshot(chain_key: [u8; 32], key_index: u32) -> Self {
        Self { chain_key, key_index, cached_message_keys: Vec::new() }
    }

    /// Current chain key.
    pub fn chain_key(&self) -> &[u8; 32] {
        &self.chain_key
    }

    /// Number of steps taken since the ratchet was created.
    pub fn key_index(&self) -> u32 {
        self.key_index
    }

    /// Number of skipped message keys currently cached.
    pub fn cached_key_count(&self) -> usize {
        self.cached_message_keys.len()
    }

    /// Advance the ratchet by one step and return the message key for the
    /// position it was at.
    pub fn step(&mut self) -> Result<MessageKey, CryptoError> {
        if self.key_index == u32::MAX {
            return Err(CryptoError::KeyIndexOverflow { current: self.key_index });
        }

        let message_key = hmac_label(&self.chain_key, MESSAGE_LABEL);
        let next_chain_key = hmac_label(&self.chain_key, CHAIN_LABEL);

        self.chain_key.zeroize();
        self.chain_key = next_chain_key;

        let current = self.key_index;
        self.key_index = self.key_index.wrapping_add(1);

        Ok(MessageKey { key: message_key, key_index: current })
    }

    /// Message key for a specific ratchet position.
    ///
    /// Positions ahead of the ratchet are reached by stepping forward, caching
    /// every key passed over. Positions behind the ratchet are served from
    /// the cache exactly once.
    pub fn message_key_at(&mut self, target: u32) -> Result<MessageKey, CryptoError> {
        if target < self.key_index {
            let position =
                self.cached_message_keys.iter().position(|cached| cached.key_index == target);

            return match position {
                Some(position) => {
                    let cached = self.cached_message_keys.remove(position);
                    Ok(MessageKey { key: cached.key, key_index: cached.key_index })
                },
                None => Err(CryptoError::KeyIndexBehind {
                    current: self.key_index,
                    requested: target,
                }),
            };
        }

        // target >= key_index, checked above
        let skip_count = target.wrapping_sub(self.key_index);
        if skip_count > MAX_SKIP {
            return Err(CryptoError::SkipLimitExceeded {
                current: self.key_index,
                requested: target,
            });
        }

        while self.key_index < target {
            let skipped = self.step()?;
            self.cached_message_keys
                .push(CachedMessageKey { key_index: skipped.key_index, key: skipped.key });
        }

        if self.cached_message_keys.len() > MAX_CACHED_KEYS {
            let excess = self.cached_message_keys.len() - MAX_CACHED_KEYS;
            self.cached_message_keys.drain(..excess);
        }

        self.step()
    }
}

impl PartialEq for Ratchet {
    fn eq(&self, other: &Self) -> bool {
        let cached_equal = self.cached_message_keys.len() == other.cached_message_keys.len()
            && self.cached_message_keys.iter().zip(&other.cached_message_keys).all(|(a, b)| {
                a.key_index == b.key_index && bool::from(a.key.ct_eq(&b.key))
            });

        bool::from(self.chain_key.ct_eq(&other.chain_key))
            && self.key_index == other.key_index
            && cached_equal
    }
}

impl Eq for Ratchet {}

impl fmt::Debug for Ratchet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ratchet")
            .field("chain_key", &"***")
            .field("key_index", &self.key_index)
            .field("cached_message_keys", &self.cached_message_keys.len())
            .finish()
    }
}

fn hmac_label(chain_key: &[u8; 32], label: &[u8]) -> [u8; 32] {
    let Ok(mut mac) = HmacSha256::new_from_slice(chain_key) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(label);
    let result = mac.finalize().into_bytes();

    let mut key = [0u8; 32];
    key.copy_from_slice(&result);
    key
}
