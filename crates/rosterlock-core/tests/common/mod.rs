//! In-memory delivery network for multi-peer control-message tests.
//!
//! Every peer owns a processor over its own [`MemoryStorage`]. Sends are
//! queued and delivered in FIFO order: `Contact` to one peer, `Group` to
//! every other peer still polling the group.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rosterlock_core::{
    ControlMessage, ControlMessageProcessor, Destination, GroupPublicKey, LocalIdentity,
    MemoryStorage, ProcessorAction, ProcessorConfig, PublicKey, SeededEnv,
};

pub type Processor = ControlMessageProcessor<SeededEnv, MemoryStorage>;

pub fn processor(seed: u8) -> Processor {
    let identity = LocalIdentity::from_secret([seed; 32]);
    ControlMessageProcessor::new(
        SeededEnv::new(u64::from(seed)),
        MemoryStorage::new(),
        identity,
        ProcessorConfig::default(),
    )
}

pub fn members(keys: &[PublicKey]) -> BTreeSet<PublicKey> {
    keys.iter().copied().collect()
}

/// One delivery: who sent it, who received it, what it was.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub from: PublicKey,
    pub to: PublicKey,
    pub message: ControlMessage,
    pub destination: Destination,
}

pub struct Network {
    peers: BTreeMap<PublicKey, Processor>,
    pub deliveries: Vec<Delivery>,
    pub effects: Vec<(PublicKey, ProcessorAction)>,
}

impl Network {
    pub fn new(seeds: &[u8]) -> Self {
        let peers = seeds
            .iter()
            .map(|seed| {
                let processor = processor(*seed);
                (processor.local_key(), processor)
            })
            .collect();
        Self { peers, deliveries: Vec::new(), effects: Vec::new() }
    }

    /// Public key of the peer created from `seed`.
    pub fn key(seed: u8) -> PublicKey {
        LocalIdentity::from_secret([seed; 32]).public_key()
    }

    pub fn peer(&self, key: &PublicKey) -> &Processor {
        &self.peers[key]
    }

    /// Route `actions` emitted by `from` until the queue drains.
    pub fn deliver(&mut self, from: PublicKey, actions: Vec<ProcessorAction>) {
        let mut queue: VecDeque<(PublicKey, ProcessorAction)> =
            actions.into_iter().map(|action| (from, action)).collect();

        while let Some((origin, action)) = queue.pop_front() {
            let ProcessorAction::Send { message, destination } = action else {
                self.effects.push((origin, action));
                continue;
            };

            for recipient in self.recipients(origin, destination) {
                self.deliveries.push(Delivery {
                    from: origin,
                    to: recipient,
                    message: message.clone(),
                    destination,
                });

                let produced = self.peers[&recipient].process(&message).unwrap();
                queue.extend(produced.into_iter().map(|action| (recipient, action)));
            }
        }
    }

    fn recipients(&self, origin: PublicKey, destination: Destination) -> Vec<PublicKey> {
        match destination {
            Destination::Contact(key) => {
                if self.peers.contains_key(&key) {
                    vec![key]
                } else {
                    Vec::new()
                }
            },
            Destination::Group(group) => self
                .peers
                .iter()
                .filter(|(key, peer)| **key != origin && polls(peer, &group))
                .map(|(key, _)| *key)
                .collect(),
        }
    }

    pub fn rejections(&self) -> Vec<&ProcessorAction> {
        self.effects
            .iter()
            .map(|(_, action)| action)
            .filter(|action| matches!(action, ProcessorAction::Rejected { .. }))
            .collect()
    }
}

fn polls(peer: &Processor, group: &GroupPublicKey) -> bool {
    peer.is_polling(group).unwrap()
}
