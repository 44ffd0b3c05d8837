//! Message encryption using `XChaCha20-Poly1305`
//!
//! All functions are pure - random bytes must be provided by the caller.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};

use crate::{error::CryptoError, ratchet::MessageKey};

/// Size of the random suffix in the nonce (20 bytes)
pub const NONCE_RANDOM_SIZE: usize = 20;

/// Poly1305 tag size (16 bytes)
pub(crate) const POLY1305_TAG_SIZE: usize = 16;

/// A group message encrypted under one sender ratchet position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
    /// Ratchet position of the message key
    pub key_index: u32,
    /// The 24-byte `XChaCha20` nonce
    pub nonce: [u8; 24],
    /// The ciphertext including 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedMessage {
    /// Plaintext length (ciphertext length minus authentication tag).
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(POLY1305_TAG_SIZE)
    }
}

/// Encrypt a message with a ratchet message key.
///
/// # Security
///
/// - Nonce binds the key index and a caller-provided random suffix
/// - Authenticated encryption prevents tampering
/// - Caller MUST provide cryptographically secure random bytes in production
pub fn encrypt_message(
    plaintext: &[u8],
    message_key: &MessageKey,
    random_suffix: [u8; NONCE_RANDOM_SIZE],
) -> EncryptedMessage {
    let nonce = build_nonce(message_key.key_index(), random_suffix);
    let ciphertext = aead_encrypt(message_key.key(), &nonce, plaintext);

    EncryptedMessage { key_index: message_key.key_index(), nonce, ciphertext }
}

/// Decrypt a message with the ratchet message key for its key index.
///
/// # Errors
///
/// - `DecryptionFailed`: key index mismatch, wrong key or tampered ciphertext
pub fn decrypt_message(
    encrypted: &EncryptedMessage,
    message_key: &MessageKey,
) -> Result<Vec<u8>, CryptoError> {
    if message_key.key_index() != encrypted.key_index {
        return Err(CryptoError::DecryptionFailed {
            reason: format!(
                "key index mismatch: key is {}, message is {}",
                message_key.key_index(),
                encrypted.key_index
            ),
        });
    }

    aead_decrypt(message_key.key(), &encrypted.nonce, &encrypted.ciphertext)
}

pub(crate) fn aead_encrypt(key: &[u8; 32], nonce: &[u8; 24], plaintext: &[u8]) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(key.into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(nonce), plaintext) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    ciphertext
}

pub(crate) fn aead_decrypt(
    key: &[u8; 32],
    nonce: &[u8; 24],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());

    cipher.decrypt(XNonce::from_slice(nonce), ciphertext).map_err(|_| {
        CryptoError::DecryptionFailed { reason: "authentication failed".to_string() }
    })
}

/// Build a 24-byte nonce for `XChaCha20`.
///
/// Structure:
/// - bytes 0-3: key index (big-endian)
/// - bytes 4-23: random suffix (caller-provided)
fn build_nonce(key_index: u32, random_suffix: [u8; NONCE_RANDOM_SIZE]) -> [u8; 24] {
    let mut nonce = [0u8; 24];
    nonce[0..4].copy_from_slice(&key_index.to_be_bytes());
    nonce[4..24].copy_from_slice(&random_suffix);
    nonce
}
