//! Key derivation for per-recipient key wrapping using HKDF

use hkdf::Hkdf;
use sha2::Sha256;

/// Label used for wrapping key derivation
const WRAPPING_KEY_LABEL: &[u8] = b"rosterlockKeyPairWrapV2";

/// Derive the symmetric key that wraps one group key pair for one recipient.
///
/// The X25519 shared secret is the input keying material. Both public keys
/// are bound into the HKDF info so a wrapper cannot be replayed towards a
/// different recipient or re-attributed to a different ephemeral key.
pub fn derive_wrapping_key(
    shared_secret: &[u8; 32],
    ephemeral_public: &[u8; 32],
    recipient_public: &[u8; 32],
) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);

    // label || ephemeral_public || recipient_public
    let mut info = Vec::with_capacity(WRAPPING_KEY_LABEL.len() + 64);
    info.extend_from_slice(WRAPPING_KEY_LABEL);
    info.extend_from_slice(ephemeral_public);
    info.extend_from_slice(recipient_public);

    let mut key = [0u8; 32];
    let Ok(()) = hkdf.expand(&info, &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    key
}
