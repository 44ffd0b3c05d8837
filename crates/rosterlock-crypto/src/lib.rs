//! Rosterlock Cryptographic Primitives
//!
//! Cryptographic building blocks for closed-group key management. Pure
//! functions with deterministic outputs. Callers provide random bytes for
//! deterministic testing.
//!
//! # Key Material
//!
//! Two generations of group key material exist side by side:
//!
//! ```text
//! V1 (sender keys)                      V2 (group key pairs)
//!
//! random chain key (per sender)         random X25519 secret (per rotation)
//!        │                                     │
//!        ▼                                     ▼
//! HMAC chain step → message keys        GroupKeyPair
//!        │                                     │
//!        ▼                                     ▼
//! AEAD Encryption → Ciphertext          seal() per recipient → wrapper
//! ```
//!
//! V1 distributes each sender's [`Ratchet`] point-to-point to every other
//! member. V2 has an admin generate one [`GroupKeyPair`] and [`seal`] it
//! separately to each member's X25519 public key.
//!
//! # Security
//!
//! Forward Secrecy:
//! - Ratchet advancement: old chain keys are zeroized after deriving the next
//! - Rotation on member removal: removed members never receive new material
//!
//! Confidentiality of wrapped key pairs:
//! - Fresh ephemeral X25519 secret per wrapper
//! - HKDF binds the wrapping key to both ephemeral and recipient public keys
//! - XChaCha20-Poly1305 rejects tampered wrappers

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod derivation;
mod encryption;
mod error;
mod key_pair;
mod ratchet;
mod seal;

pub use derivation::derive_wrapping_key;
pub use encryption::{EncryptedMessage, NONCE_RANDOM_SIZE, decrypt_message, encrypt_message};
pub use error::CryptoError;
pub use key_pair::{GroupKeyPair, KEY_PAIR_ENCODED_SIZE, KEY_SIZE};
pub use ratchet::{MAX_CACHED_KEYS, MAX_SKIP, MessageKey, Ratchet};
pub use seal::{SEAL_NONCE_SIZE, SEAL_OVERHEAD, open, seal};
