//! Fuzz target for membership sequences across both protocol generations
//!
//! # Strategy
//!
//! - A pool of eight identities; the local user is identity 0
//! - Random New, Info, Update, KeyPair and SenderKey messages from any
//!   identity, with member and admin sets drawn as bitmasks
//!
//! # Invariants
//!
//! - Stored admins are always a subset of stored members
//! - A rejected message leaves storage unchanged
//! - NEVER panic, whatever the order

#![no_main]

use std::collections::BTreeSet;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rosterlock_core::{
    ControlMessage, ControlMessageProcessor, GroupInfoV1, GroupKeyPair, GroupPrivateKey,
    GroupPublicKey, KeyPairDistribution, KeyPairUpdate, LocalIdentity, MembershipUpdate,
    MemoryStorage, NewGroupV1, NewGroupV2, ProcessorAction, ProcessorConfig, PublicKey, Ratchet,
    SeededEnv, SenderKey, SenderKeyDistribution, SenderKeyRequest, SenderKeyUpdate,
};

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    NewV1 { sender: u8, members: u8, admins: u8, keys: u8 },
    InfoV1 { sender: u8, members: u8, admins: u8 },
    Request { sender: u8 },
    SenderKey { sender: u8, owner: u8, index: u8 },
    NewV2 { sender: u8, members: u8, admins: u8, secret: u8 },
    UpdateV2 { sender: u8, members: u8, with_group: bool },
    KeyPair { sender: u8 },
}

fn key(index: u8) -> PublicKey {
    LocalIdentity::from_secret([index % 8 + 1; 32]).public_key()
}

fn set(mask: u8) -> BTreeSet<PublicKey> {
    (0..8).filter(|bit| mask & (1 << bit) != 0).map(key).collect()
}

fn sender_key(owner: u8, index: u8) -> SenderKey {
    SenderKey::from_ratchet(&Ratchet::from_snapshot([owner; 32], u32::from(index)), key(owner))
}

fn message(group: GroupPublicKey, op: &Op) -> ControlMessage {
    match *op {
        Op::NewV1 { sender, members, admins, keys } => ControlMessage::v1(
            key(sender),
            SenderKeyUpdate::New(NewGroupV1 {
                group,
                name: "Fuzz".to_string(),
                group_private_key: GroupPrivateKey::from_bytes([7; 32]),
                sender_keys: (0..8)
                    .filter(|bit| keys & (1 << bit) != 0)
                    .map(|bit| sender_key(bit, 0))
                    .collect(),
                members: set(members),
                admins: set(admins),
            }),
        ),
        Op::InfoV1 { sender, members, admins } => ControlMessage::v1(
            key(sender),
            SenderKeyUpdate::Info(GroupInfoV1 {
                group,
                name: format!("Fuzz {members}"),
                sender_keys: Vec::new(),
                members: set(members),
                admins: set(admins),
            }),
        ),
        Op::Request { sender } => ControlMessage::v1(
            key(sender),
            SenderKeyUpdate::SenderKeyRequest(SenderKeyRequest { group }),
        ),
        Op::SenderKey { sender, owner, index } => ControlMessage::v1(
            key(sender),
            SenderKeyUpdate::SenderKey(SenderKeyDistribution {
                group,
                sender_key: sender_key(owner, index),
            }),
        ),
        Op::NewV2 { sender, members, admins, secret } => ControlMessage::v2(
            key(sender),
            None,
            KeyPairUpdate::New(NewGroupV2 {
                group,
                name: "Fuzz".to_string(),
                key_pair: GroupKeyPair::from_secret([secret; 32]),
                members: set(members),
                admins: set(admins),
            }),
        ),
        Op::UpdateV2 { sender, members, with_group } => ControlMessage::v2(
            key(sender),
            with_group.then_some(group),
            KeyPairUpdate::Update(MembershipUpdate {
                name: format!("Fuzz {members}"),
                members: set(members),
            }),
        ),
        Op::KeyPair { sender } => ControlMessage::v2(
            key(sender),
            Some(group),
            KeyPairUpdate::KeyPair(KeyPairDistribution { wrappers: Vec::new() }),
        ),
    }
}

fuzz_target!(|ops: Vec<Op>| {
    let group = GroupPublicKey::from_bytes([0x42; 32]);
    let storage = MemoryStorage::new();
    let processor = ControlMessageProcessor::new(
        SeededEnv::new(0),
        storage.clone(),
        LocalIdentity::from_secret([1; 32]),
        ProcessorConfig::default(),
    );

    for op in ops.iter().take(64) {
        let before = storage.snapshot().expect("snapshot");
        let actions = processor.process(&message(group, op)).expect("memory storage never fails");

        if matches!(actions.as_slice(), [ProcessorAction::Rejected { .. }]) {
            assert_eq!(storage.snapshot().expect("snapshot"), before);
        }

        if let Some(model) = processor.group_model(&group).expect("read") {
            assert!(model.admins().is_subset(model.members()));
        }
    }
});
