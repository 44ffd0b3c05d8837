//! Chaos property tests for message atomicity.
//!
//! The processor runs over `ChaoticStorage`, which fails transaction begins
//! and commits at random. Every message must be applied completely or not at
//! all:
//! - A storage failure leaves the underlying storage byte-for-byte unchanged
//! - A storage failure never produces actions
//! - Retrying a failed message reaches the same state as a clean run

use std::collections::BTreeSet;

use proptest::prelude::*;
use rosterlock_core::{
    ChaoticStorage, ControlMessage, ControlMessageProcessor, GroupInfoV1, GroupPrivateKey,
    GroupPublicKey, LocalIdentity, MemoryStorage, NewGroupV1, ProcessError, ProcessorConfig,
    PublicKey, Ratchet, RatchetStore, SeededEnv, SenderKey, SenderKeyUpdate, Storage, ThreadStore,
};

fn key(seed: u8) -> PublicKey {
    LocalIdentity::from_secret([seed; 32]).public_key()
}

fn group() -> GroupPublicKey {
    GroupPublicKey::from_bytes([0x42; 32])
}

/// New followed by alternating joins and removals of a third member.
fn script(rounds: usize) -> Vec<ControlMessage> {
    let (a, b, x) = (key(1), key(2), key(9));
    let members = |keys: &[PublicKey]| keys.iter().copied().collect::<BTreeSet<_>>();

    let mut messages = vec![ControlMessage::v1(
        b,
        SenderKeyUpdate::New(NewGroupV1 {
            group: group(),
            name: "Chaos".to_string(),
            group_private_key: GroupPrivateKey::from_bytes([0x24; 32]),
            sender_keys: vec![SenderKey::from_ratchet(&Ratchet::new([7; 32]), b)],
            members: members(&[a, b]),
            admins: members(&[b]),
        }),
    )];

    for round in 0..rounds {
        let group_members = if round % 2 == 0 { members(&[a, b, x]) } else { members(&[a, b]) };
        messages.push(ControlMessage::v1(
            b,
            SenderKeyUpdate::Info(GroupInfoV1 {
                group: group(),
                name: format!("Chaos {round}"),
                sender_keys: Vec::new(),
                members: group_members,
                admins: members(&[b]),
            }),
        ));
    }

    messages
}

#[test]
fn prop_failed_messages_leave_no_trace() {
    proptest!(|(
        failure_rate in 0.0..0.7,
        seed in any::<u64>(),
        rounds in 1usize..8,
    )| {
        let inner = MemoryStorage::new();
        let storage = ChaoticStorage::with_seed(inner.clone(), failure_rate, seed);
        let processor = ControlMessageProcessor::new(
            SeededEnv::new(seed),
            storage,
            LocalIdentity::from_secret([1; 32]),
            ProcessorConfig::default(),
        );

        for message in script(rounds) {
            let before = inner.snapshot().unwrap();

            match processor.process(&message) {
                Ok(_) => {},
                Err(ProcessError::Storage(_)) => {
                    // ORACLE: nothing of the failed message is visible
                    prop_assert_eq!(inner.snapshot().unwrap(), before);
                },
                Err(e) => return Err(TestCaseError::fail(format!("unexpected error: {e}"))),
            }
        }
    });
}

#[test]
fn prop_retry_until_applied_converges() {
    proptest!(|(
        failure_rate in 0.0..0.5,
        seed in any::<u64>(),
        rounds in 1usize..6,
    )| {
        let chaotic = ControlMessageProcessor::new(
            SeededEnv::new(seed),
            ChaoticStorage::with_seed(MemoryStorage::new(), failure_rate, seed),
            LocalIdentity::from_secret([1; 32]),
            ProcessorConfig::default(),
        );
        let clean = ControlMessageProcessor::new(
            SeededEnv::new(seed),
            MemoryStorage::new(),
            LocalIdentity::from_secret([1; 32]),
            ProcessorConfig::default(),
        );

        for message in script(rounds) {
            let expected = clean.process(&message).unwrap();

            let mut attempts = 0;
            let actual = loop {
                attempts += 1;
                prop_assert!(attempts < 1000, "storage never recovered");
                match chaotic.process(&message) {
                    Ok(actions) => break actions,
                    Err(ProcessError::Storage(_)) => {},
                    Err(e) => {
                        return Err(TestCaseError::fail(format!("unexpected error: {e}")));
                    },
                }
            };

            // ORACLE: models match; generated key material differs only if
            // randomness was drawn by a failed attempt
            let txn = chaotic.storage().inner().begin().unwrap();
            prop_assert_eq!(actual.len(), expected.len());
            prop_assert_eq!(
                txn.group_model(&group()).unwrap(),
                clean.group_model(&group()).unwrap()
            );
            prop_assert_eq!(
                txn.old_generations(&group()).unwrap().len(),
                clean.old_ratchet_generations(&group()).unwrap().len()
            );
        }
    });
}
