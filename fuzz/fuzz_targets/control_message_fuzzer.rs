//! Fuzz target for control-message decoding and dispatch
//!
//! # Strategy
//!
//! - Arbitrary bytes are decoded as a control message envelope
//! - Whatever decodes is processed by a fresh processor
//!
//! # Invariants
//!
//! - Decoding never panics on malformed CBOR
//! - A decoded message re-encodes and decodes to itself
//! - Processing a decoded message never returns a storage error on
//!   in-memory storage

#![no_main]

use libfuzzer_sys::fuzz_target;
use rosterlock_core::{
    ControlMessage, ControlMessageProcessor, LocalIdentity, MemoryStorage, ProcessorConfig,
    SeededEnv,
};

fuzz_target!(|data: &[u8]| {
    let Ok(message) = ControlMessage::decode(data) else {
        return;
    };

    let encoded = message.encode().expect("decoded message must re-encode");
    let decoded = ControlMessage::decode(&encoded).expect("re-encoded message must decode");
    assert_eq!(decoded, message);

    let processor = ControlMessageProcessor::new(
        SeededEnv::new(0),
        MemoryStorage::new(),
        LocalIdentity::from_secret([1; 32]),
        ProcessorConfig::default(),
    );
    processor.process(&message).expect("memory storage never fails");
});
