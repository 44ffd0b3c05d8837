//! Property-based tests for the control-message processor.
//!
//! Random message sequences from a small pool of members are applied to one
//! processor, using deterministic seeds for reproducibility.

use std::collections::BTreeSet;

use proptest::prelude::*;
use rosterlock_core::{
    ControlKind, ControlMessage, ControlMessageProcessor, GroupInfoV1, GroupKeyPair,
    GroupPrivateKey, GroupPublicKey, KeyPairUpdate, LocalIdentity, MembershipUpdate, MemoryStorage,
    NewGroupV1, NewGroupV2, ProcessorAction, ProcessorConfig, PublicKey, SeededEnv,
    SenderKeyUpdate,
};

const POOL: u8 = 5;

fn key(seed: u8) -> PublicKey {
    LocalIdentity::from_secret([seed; 32]).public_key()
}

fn group() -> GroupPublicKey {
    GroupPublicKey::from_bytes([0x42; 32])
}

fn subset(mask: u8) -> BTreeSet<PublicKey> {
    (1..=POOL).filter(|seed| mask & (1 << (seed - 1)) != 0).map(key).collect()
}

fn processor(seed: u64) -> ControlMessageProcessor<SeededEnv, MemoryStorage> {
    ControlMessageProcessor::new(
        SeededEnv::new(seed),
        MemoryStorage::new(),
        LocalIdentity::from_secret([1; 32]),
        ProcessorConfig::default(),
    )
}

#[derive(Debug, Clone)]
enum Op {
    NewV1 { sender: u8, members: u8, admins: u8 },
    InfoV1 { sender: u8, members: u8, admins: u8 },
    NewV2 { sender: u8, members: u8, admins: u8 },
    UpdateV2 { sender: u8, members: u8 },
}

fn op() -> impl Strategy<Value = Op> {
    let sender = 1..=POOL;
    let mask = 0u8..(1 << POOL);
    prop_oneof![
        (sender.clone(), mask.clone(), mask.clone())
            .prop_map(|(sender, members, admins)| Op::NewV1 { sender, members, admins }),
        (sender.clone(), mask.clone(), mask.clone())
            .prop_map(|(sender, members, admins)| Op::InfoV1 { sender, members, admins }),
        (sender.clone(), mask.clone(), mask.clone())
            .prop_map(|(sender, members, admins)| Op::NewV2 { sender, members, admins }),
        (sender, mask).prop_map(|(sender, members)| Op::UpdateV2 { sender, members }),
    ]
}

fn message(op: &Op) -> ControlMessage {
    match *op {
        Op::NewV1 { sender, members, admins } => ControlMessage::v1(
            key(sender),
            SenderKeyUpdate::New(NewGroupV1 {
                group: group(),
                name: "Prop".to_string(),
                group_private_key: GroupPrivateKey::from_bytes([0x24; 32]),
                sender_keys: Vec::new(),
                members: subset(members),
                admins: subset(admins),
            }),
        ),
        Op::InfoV1 { sender, members, admins } => ControlMessage::v1(
            key(sender),
            SenderKeyUpdate::Info(GroupInfoV1 {
                group: group(),
                name: format!("Prop {members}"),
                sender_keys: Vec::new(),
                members: subset(members),
                admins: subset(admins),
            }),
        ),
        Op::NewV2 { sender, members, admins } => ControlMessage::v2(
            key(sender),
            None,
            KeyPairUpdate::New(NewGroupV2 {
                group: group(),
                name: "Prop".to_string(),
                key_pair: GroupKeyPair::from_secret([sender; 32]),
                members: subset(members),
                admins: subset(admins),
            }),
        ),
        Op::UpdateV2 { sender, members } => ControlMessage::v2(
            key(sender),
            Some(group()),
            KeyPairUpdate::Update(MembershipUpdate {
                name: format!("Prop {members}"),
                members: subset(members),
            }),
        ),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: stored admins are always a subset of stored members
    #[test]
    fn prop_admins_are_members(seed in any::<u64>(), ops in prop::collection::vec(op(), 1..20)) {
        let processor = processor(seed);

        for op in &ops {
            processor.process(&message(op)).unwrap();

            if let Some(model) = processor.group_model(&group()).unwrap() {
                prop_assert!(model.admins().is_subset(model.members()));
            }
        }
    }

    /// Property: a rejected message leaves storage unchanged
    #[test]
    fn prop_rejections_leave_state_unchanged(
        seed in any::<u64>(),
        ops in prop::collection::vec(op(), 1..20),
    ) {
        let processor = processor(seed);

        for op in &ops {
            let before = processor.storage().snapshot().unwrap();
            let actions = processor.process(&message(op)).unwrap();

            if matches!(actions.as_slice(), [ProcessorAction::Rejected { .. }]) {
                prop_assert_eq!(processor.storage().snapshot().unwrap(), before);
            }
        }
    }

    /// Property: redelivering a message right after it was applied changes
    /// nothing, including at a local admin that rotated the first time
    #[test]
    fn prop_redelivery_is_idempotent(
        seed in any::<u64>(),
        setup in prop::collection::vec(op(), 0..8),
        op in op(),
    ) {
        let processor = processor(seed);
        for op in &setup {
            processor.process(&message(op)).unwrap();
        }
        let message = message(&op);

        processor.process(&message).unwrap();
        let snapshot = processor.storage().snapshot().unwrap();
        let again = processor.process(&message).unwrap();

        prop_assert_eq!(processor.storage().snapshot().unwrap(), snapshot);
        let event = |action: &ProcessorAction| matches!(action, ProcessorAction::InfoEvent { .. });
        prop_assert!(!again.iter().any(event));
    }

    /// Property: unknown discriminants are rejected without touching storage
    #[test]
    fn prop_unrecognized_kinds_rejected(generation in any::<u8>(), kind in any::<u8>()) {
        let processor = processor(0);
        let message = ControlMessage {
            sender: key(2),
            group: Some(group()),
            kind: ControlKind::Unrecognized { generation, kind },
        };

        let actions = processor.process(&message).unwrap();

        prop_assert!(matches!(actions.as_slice(), [ProcessorAction::Rejected { .. }]),
            "expected a single Rejected action, got {:?}",
            actions
        );
        prop_assert_eq!(processor.storage().entry_count().unwrap(), 0);
    }
}

#[test]
fn batch_continues_past_rejections() {
    let processor = processor(7);
    let messages = vec![
        message(&Op::InfoV1 { sender: 2, members: 0b11, admins: 0 }),
        message(&Op::NewV2 { sender: 2, members: 0b11, admins: 0b10 }),
        message(&Op::UpdateV2 { sender: 5, members: 0b1_0000 }),
        message(&Op::UpdateV2 { sender: 2, members: 0b111 }),
    ];

    let outcome = processor.process_batch(&messages);

    assert_eq!(outcome.applied, 2);
    assert_eq!(outcome.rejected, 2);
    assert!(outcome.failed.is_empty());
    let model = processor.group_model(&group()).unwrap().unwrap();
    assert_eq!(model.members(), &subset(0b111));
    assert_eq!(model.admins(), &subset(0b10));
}
