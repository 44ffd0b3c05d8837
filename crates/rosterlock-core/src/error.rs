//! Error types for control-message processing.
//!
//! Two classes: rejections (the message is dropped, the batch continues) and
//! storage failures (nothing was applied, the caller may retry).

use rosterlock_crypto::CryptoError;
use thiserror::Error;

use crate::{
    storage::StorageError,
    types::{GroupPublicKey, PublicKey},
};

/// Membership role required to authorize an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Any pre-change member
    Member,
    /// A pre-change admin
    Admin,
}

/// Errors that can occur while processing a control message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// Sender lacks the required role in the pre-message snapshot
    #[error("{sender} is not a {required:?} of group {group}")]
    Unauthorized {
        /// Authenticated envelope sender
        sender: PublicKey,
        /// Target group
        group: GroupPublicKey,
        /// Role the operation requires
        required: Role,
    },

    /// Referenced group or thread does not exist locally
    #[error("no {what} for group {group}")]
    StateNotFound {
        /// Target group
        group: GroupPublicKey,
        /// Kind of state that was looked up
        what: &'static str,
    },

    /// Wrapped key material could not be decrypted or parsed
    #[error("crypto failure: {0}")]
    CryptoFailure(#[from] CryptoError),

    /// Message content contradicts its authenticated envelope
    #[error("integrity violation: {reason}")]
    IntegrityViolation {
        /// What was inconsistent
        reason: String,
    },

    /// Generation or kind discriminant outside the known space
    #[error("unrecognized control message: generation {generation}, kind {kind}")]
    UnrecognizedKind {
        /// Protocol generation discriminant
        generation: u8,
        /// Kind discriminant within the generation
        kind: u8,
    },

    /// Storage failed; the message was not applied
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ProcessError {
    /// Returns true if the message was rejected by protocol rules.
    ///
    /// Rejections are final for that message: retrying it yields the same
    /// outcome. Storage errors are not rejections and the message may be
    /// retried.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}
