//! Rosterlock Core
//!
//! Membership and key management for end-to-end encrypted closed groups.
//! Members independently derive and rotate shared encryption state from a
//! stream of control messages, without a central group-key server.
//!
//! # Architecture
//!
//! Action-based and Sans-IO. The [`ControlMessageProcessor`] receives typed
//! [`ControlMessage`]s, applies them inside one storage transaction and
//! returns [`ProcessorAction`]s (point-to-point sends, push registration,
//! info events) for the caller to execute after the commit.
//!
//! ```text
//!                ControlMessage
//!                      │
//!                      ▼
//!     ┌──────── ControlMessageProcessor ────────┐
//!     │   V1 (sender keys) │ V2 (key pairs)     │
//!     │         │                  │            │
//!     │         ▼                  ▼            │
//!     │   RatchetStore       GroupKeyStore      │
//!     │         └──── Transaction ─┘            │
//!     └─────────────────────┬───────────────────┘
//!                           ▼
//!                 Vec<ProcessorAction>
//! ```
//!
//! # Protocol generations
//!
//! - V1: every member owns a ratchet and sends it point-to-point to every
//!   other member. Any member may change membership; removals rotate all
//!   ratchets.
//! - V2: an admin generates one group-wide key pair and wraps it per
//!   recipient. Any member may change membership; only admins distribute
//!   key pairs, and they rotate whenever someone is removed.
//!
//! # Invariants
//!
//! - `admins ⊆ members` for every stored [`GroupModel`]
//! - Authorization is checked against the membership before the update
//! - Old ratchets and key pairs are append-only
//! - A message either commits completely or leaves no trace

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod action;
pub mod config;
pub mod env;
pub mod error;
pub mod group_key_store;
pub mod identity;
mod key_distribution;
mod locks;
pub mod message;
pub mod model;
pub mod processor;
pub mod ratchet_store;
mod sender_keys;
pub mod storage;
pub mod types;

pub use action::{Destination, InfoEventKind, ProcessorAction};
pub use config::ProcessorConfig;
pub use env::{Environment, SeededEnv, SystemEnv};
pub use error::{ProcessError, Role};
pub use group_key_store::GroupKeyStore;
pub use identity::LocalIdentity;
pub use message::{
    CodecError, ControlKind, ControlMessage, EncryptedKeyPairWrapper, GroupInfoV1,
    KeyPairDistribution, KeyPairUpdate, MembershipUpdate, NewGroupV1, NewGroupV2, SenderKey,
    SenderKeyDistribution, SenderKeyRequest, SenderKeyUpdate,
};
pub use model::{GroupModel, ThreadStore};
pub use processor::{BatchOutcome, ControlMessageProcessor};
pub use ratchet_store::{OldGeneration, RatchetGeneration, RatchetStore};
pub use rosterlock_crypto::{GroupKeyPair, Ratchet};
pub use storage::{
    ChaoticStorage, MemoryStorage, RedbStorage, Storage, StorageError, Transaction,
};
pub use types::{GroupId, GroupPrivateKey, GroupPublicKey, KeyParseError, PublicKey};
