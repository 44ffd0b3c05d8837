//! Group state survives a restart on redb.

use std::collections::BTreeSet;

use rosterlock_core::{
    ControlMessageProcessor, LocalIdentity, ProcessorConfig, RatchetGeneration, RedbStorage,
    SeededEnv,
};
use tempfile::tempdir;

fn open(path: &std::path::Path, seed: u8) -> ControlMessageProcessor<SeededEnv, RedbStorage> {
    ControlMessageProcessor::new(
        SeededEnv::new(u64::from(seed)),
        RedbStorage::open(path).unwrap(),
        LocalIdentity::from_secret([seed; 32]),
        ProcessorConfig::default(),
    )
}

#[test]
fn v2_group_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("groups.redb");
    let other = LocalIdentity::from_secret([2; 32]).public_key();

    let (group, sealed) = {
        let processor = open(&path, 1);
        let (group, _) = processor
            .create_group_v2("Durable", [other].into_iter().collect(), BTreeSet::new())
            .unwrap();
        let sealed = processor.seal_group_message(group, b"persisted").unwrap();
        (group, sealed)
    };

    let processor = open(&path, 1);
    let model = processor.group_model(&group).unwrap().unwrap();
    assert_eq!(model.name(), "Durable");
    assert!(model.is_member(&other));
    assert_eq!(processor.polled_groups().unwrap(), vec![group]);
    assert_eq!(processor.open_group_message(group, &sealed).unwrap(), b"persisted");
}

#[test]
fn v1_ratchet_advances_are_durable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("groups.redb");
    let other = LocalIdentity::from_secret([2; 32]).public_key();

    let group = {
        let processor = open(&path, 1);
        let (group, _) = processor
            .create_group_v1("Durable", [other].into_iter().collect(), BTreeSet::new())
            .unwrap();
        processor.encrypt_group_message(group, b"one").unwrap();
        processor.encrypt_group_message(group, b"two").unwrap();
        group
    };

    let processor = open(&path, 1);
    let ratchet = processor
        .ratchet(&group, &processor.local_key(), RatchetGeneration::Current)
        .unwrap()
        .unwrap();
    assert_eq!(ratchet.key_index(), 2);
    assert!(processor.is_polling(&group).unwrap());
}
