//! Outbound effects returned by the processor.
//!
//! The processor never performs I/O. Actions are only returned after the
//! transaction that produced them committed; the caller executes them
//! at-most-once and never reports completion back.

use crate::{
    message::ControlMessage,
    types::{GroupId, GroupPublicKey, PublicKey},
};

/// Where a control message is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Point-to-point to one member
    Contact(PublicKey),
    /// To the group's shared destination
    Group(GroupPublicKey),
}

/// Category of a user-visible info event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoEventKind {
    /// The local user was added to a new group
    GroupCreated,
    /// Name, members or admins changed
    GroupUpdated,
    /// The local user is no longer a member
    GroupQuit,
}

/// Effect to perform after a control message was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorAction {
    /// Fire-and-forget send
    Send {
        /// Message to send
        message: ControlMessage,
        /// Recipient
        destination: Destination,
    },

    /// Register `local` for push notifications of `group`
    PushSubscribe {
        /// Group to subscribe to
        group: GroupPublicKey,
        /// Local member identity
        local: PublicKey,
    },

    /// Drop the push registration of `local` for `group`
    PushUnsubscribe {
        /// Group to unsubscribe from
        group: GroupPublicKey,
        /// Local member identity
        local: PublicKey,
    },

    /// Record an info event in the group's thread
    InfoEvent {
        /// Thread receiving the event
        thread: GroupId,
        /// Event category
        kind: InfoEventKind,
        /// Human-readable details
        details: String,
    },

    /// The message was dropped by protocol rules
    Rejected {
        /// Display form of the rejection
        reason: String,
    },
}

impl ProcessorAction {
    /// Message and destination if this is a [`Send`](Self::Send).
    pub fn as_send(&self) -> Option<(&ControlMessage, Destination)> {
        match self {
            Self::Send { message, destination } => Some((message, *destination)),
            _ => None,
        }
    }
}
