//! Error types for the cryptographic primitives.

use thiserror::Error;

/// Errors produced by ratchets, key pairs and key wrapping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Ratchet key index would overflow `u32`.
    #[error("ratchet key index overflow at {current}")]
    KeyIndexOverflow {
        /// Key index at which the overflow would occur
        current: u32,
    },

    /// Requested message key is behind the ratchet and no longer cached.
    #[error("message key {requested} is behind ratchet at {current} and not cached")]
    KeyIndexBehind {
        /// Current ratchet position
        current: u32,
        /// Key index that was requested
        requested: u32,
    },

    /// Requested message key is too far ahead of the ratchet.
    #[error("message key {requested} is more than the skip limit ahead of {current}")]
    SkipLimitExceeded {
        /// Current ratchet position
        current: u32,
        /// Key index that was requested
        requested: u32,
    },

    /// AEAD decryption failed (wrong key or tampered ciphertext).
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Why decryption failed
        reason: String,
    },

    /// Sealed payload is shorter than the fixed overhead.
    #[error("sealed payload too short: {len} bytes")]
    Truncated {
        /// Length of the rejected payload
        len: usize,
    },

    /// Key pair bytes are malformed or inconsistent.
    #[error("invalid key pair: {reason}")]
    InvalidKeyPair {
        /// What was wrong with the key pair
        reason: String,
    },

    /// X25519 agreement produced an all-zero shared secret (low-order point).
    #[error("non-contributory key agreement")]
    NonContributory,
}
