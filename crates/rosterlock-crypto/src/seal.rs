//! Per-recipient sealing of group key material
//!
//! Layout of a sealed payload:
//!
//! ```text
//! ┌──────────────────────┬──────────────┬───────────────────────────┐
//! │ ephemeral public (32)│  nonce (24)  │ ciphertext + tag (n + 16) │
//! └──────────────────────┴──────────────┴───────────────────────────┘
//! ```
//!
//! The sender derives a one-off X25519 key from caller-provided bytes, agrees
//! with the recipient's public key and wraps the plaintext under an HKDF
//! derived key. Only the holder of the recipient's private key can open it.

use crate::{
    derivation::derive_wrapping_key,
    encryption::{POLY1305_TAG_SIZE, aead_decrypt, aead_encrypt},
    error::CryptoError,
    key_pair::{GroupKeyPair, KEY_SIZE},
};

/// Size of the `XChaCha20` nonce carried in a sealed payload.
pub const SEAL_NONCE_SIZE: usize = 24;

/// Bytes added by [`seal`] on top of the plaintext length.
pub const SEAL_OVERHEAD: usize = KEY_SIZE + SEAL_NONCE_SIZE + POLY1305_TAG_SIZE;

/// Seal `plaintext` so that only `recipient_public` can open it.
///
/// `ephemeral_secret` and `nonce` MUST be fresh cryptographically secure
/// random bytes in production.
///
/// # Errors
///
/// - `NonContributory` if the recipient key is a low-order point
pub fn seal(
    plaintext: &[u8],
    recipient_public: &[u8; KEY_SIZE],
    ephemeral_secret: [u8; KEY_SIZE],
    nonce: [u8; SEAL_NONCE_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = GroupKeyPair::from_secret(ephemeral_secret);
    let shared = ephemeral.agree(recipient_public)?;
    let key = derive_wrapping_key(&shared, ephemeral.public_key(), recipient_public);

    let ciphertext = aead_encrypt(&key, &nonce, plaintext);

    let mut sealed = Vec::with_capacity(KEY_SIZE + SEAL_NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(ephemeral.public_key());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);

    Ok(sealed)
}

/// Open a payload produced by [`seal`] with the recipient's key pair.
///
/// # Errors
///
/// - `Truncated` if the payload is shorter than [`SEAL_OVERHEAD`]
/// - `NonContributory` if the embedded ephemeral key is a low-order point
/// - `DecryptionFailed` if the payload was not sealed for this recipient or
///   was tampered with
pub fn open(sealed: &[u8], recipient: &GroupKeyPair) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(CryptoError::Truncated { len: sealed.len() });
    }

    let mut ephemeral_public = [0u8; KEY_SIZE];
    ephemeral_public.copy_from_slice(&sealed[..KEY_SIZE]);

    let mut nonce = [0u8; SEAL_NONCE_SIZE];
    nonce.copy_from_slice(&sealed[KEY_SIZE..KEY_SIZE + SEAL_NONCE_SIZE]);

    let shared = recipient.agree(&ephemeral_public)?;
    let key = derive_wrapping_key(&shared, &ephemeral_public, recipient.public_key());

    aead_decrypt(&key, &nonce, &sealed[KEY_SIZE + SEAL_NONCE_SIZE..])
}
