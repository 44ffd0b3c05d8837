//! Property-based tests for sender ratchets and sealed boxes.

use proptest::prelude::*;
use rosterlock_crypto::{
    GroupKeyPair, MAX_SKIP, Ratchet, decrypt_message, encrypt_message, open, seal,
};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: a receiver holding a snapshot decrypts any later message,
    /// in any delivery order, exactly once
    #[test]
    fn prop_out_of_order_delivery(
        chain_key in any::<[u8; 32]>(),
        count in 1usize..24,
        order_seed in any::<u64>(),
    ) {
        let mut sender = Ratchet::new(chain_key);
        let mut receiver = Ratchet::from_snapshot(*sender.chain_key(), sender.key_index());

        let mut encrypted: Vec<_> = (0..count)
            .map(|i| {
                let key = sender.step().unwrap();
                (i, encrypt_message(format!("m{i}").as_bytes(), &key, [i as u8; 20]))
            })
            .collect();

        // Deterministic shuffle
        let mut state = order_seed | 1;
        for i in (1..encrypted.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            encrypted.swap(i, (state % (i as u64 + 1)) as usize);
        }

        for (i, message) in &encrypted {
            let key = receiver.message_key_at(message.key_index).unwrap();
            prop_assert_eq!(decrypt_message(message, &key).unwrap(), format!("m{i}").into_bytes());
        }

        for (_, message) in &encrypted {
            prop_assert!(receiver.message_key_at(message.key_index).is_err());
        }
        prop_assert_eq!(receiver.cached_key_count(), 0);
    }

    /// Property: stepping is deterministic from the chain key
    #[test]
    fn prop_snapshot_replays_sender(chain_key in any::<[u8; 32]>(), steps in 0u32..64) {
        let mut a = Ratchet::new(chain_key);
        let mut b = Ratchet::from_snapshot(chain_key, 0);

        for _ in 0..steps {
            let step_a = a.step().unwrap();
            let step_b = b.step().unwrap();
            prop_assert_eq!(step_a.key(), step_b.key());
        }
        prop_assert_eq!(a, b);
    }

    /// Property: sealed content opens only with the recipient key pair
    #[test]
    fn prop_seal_open(
        recipient in any::<[u8; 32]>(),
        other in any::<[u8; 32]>(),
        ephemeral in any::<[u8; 32]>(),
        nonce in any::<[u8; 24]>(),
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let recipient = GroupKeyPair::from_secret(recipient);
        let other = GroupKeyPair::from_secret(other);
        prop_assume!(recipient.public_key() != other.public_key());

        let sealed = seal(&plaintext, recipient.public_key(), ephemeral, nonce).unwrap();

        prop_assert_eq!(open(&sealed, &recipient).unwrap(), plaintext);
        prop_assert!(open(&sealed, &other).is_err());
    }
}

#[test]
fn skipping_past_limit_fails() {
    let mut receiver = Ratchet::new([5; 32]);
    assert!(receiver.message_key_at(MAX_SKIP + 1).is_err());
    assert_eq!(receiver.key_index(), 0);
}
