//! Property-based tests for the engine's cryptographic operations
//!
//! Properties tested:
//! - Stealth correctness: the recipient always detects and can spend
//! - Non-ownership: another hierarchy never detects the payment
//! - Envelope integrity: round-trips, and any flipped byte fails
//! - Decoders never panic on arbitrary input

#[cfg(test)]
mod property_tests {
    use proptest::prelude::*;

    use crate::calldata::{encode_execute, encode_send_stealth_payment, find_ephemeral_key};
    use crate::curve::{derive_public_key, is_valid_private_key, EphemeralKeypair};
    use crate::kdf::KeyHierarchy;
    use crate::keystore::{open, seal, KEY_HIERARCHY_LEN};
    use crate::stealth::{
        check_stealth_payment, derive_stealth_private_key, generate_stealth_payment_with,
        StealthMatch,
    };
    use crate::types::Address;

    fn arbitrary_bytes32() -> impl Strategy<Value = [u8; 32]> {
        prop::array::uniform32(any::<u8>())
    }

    // Valid secp256k1 secret keys
    fn valid_scalar() -> impl Strategy<Value = [u8; 32]> {
        arbitrary_bytes32().prop_filter("valid scalar", |bytes| is_valid_private_key(bytes))
    }

    fn distinct_masters() -> impl Strategy<Value = ([u8; 32], [u8; 32])> {
        (arbitrary_bytes32(), arbitrary_bytes32()).prop_filter("distinct", |(a, b)| a != b)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// The recipient detects every payment to it and derives the matching key
        #[test]
        fn prop_stealth_correctness(master in arbitrary_bytes32(), ephemeral in valid_scalar()) {
            let keys = KeyHierarchy::from_master(&master).unwrap();
            let payment = generate_stealth_payment_with(
                EphemeralKeypair::from_private_key(&ephemeral).unwrap(),
                keys.viewing().public_key(),
                keys.spending().public_key(),
            )
            .unwrap();

            let result = check_stealth_payment(
                &payment.ephemeral_public_key,
                keys.viewing().private_key(),
                keys.spending().public_key(),
                &payment.stealth_address,
            )
            .unwrap();

            let StealthMatch::Match { address, shared_secret } = result else {
                return Err(TestCaseError::fail("payment not detected"));
            };
            prop_assert_eq!(address, payment.stealth_address);

            let spend =
                derive_stealth_private_key(keys.spending().private_key(), &shared_secret).unwrap();
            prop_assert_eq!(derive_public_key(&spend[..]).unwrap(), payment.stealth_public_key);
        }

        /// A payment for A is never detected by B
        #[test]
        fn prop_non_ownership((a, b) in distinct_masters()) {
            let alice = KeyHierarchy::from_master(&a).unwrap();
            let bob = KeyHierarchy::from_master(&b).unwrap();
            let payment = crate::stealth::generate_stealth_payment(
                alice.viewing().public_key(),
                alice.spending().public_key(),
            )
            .unwrap();

            let result = check_stealth_payment(
                &payment.ephemeral_public_key,
                bob.viewing().private_key(),
                bob.spending().public_key(),
                &payment.stealth_address,
            )
            .unwrap();
            prop_assert!(!result.is_match());
        }

        /// Derived key pairs are always internally consistent
        #[test]
        fn prop_hierarchy_consistency(master in arbitrary_bytes32()) {
            let keys = KeyHierarchy::from_master(&master).unwrap();
            let viewing = derive_public_key(keys.viewing().private_key()).unwrap();
            let spending = derive_public_key(keys.spending().private_key()).unwrap();
            prop_assert_eq!(&viewing, keys.viewing().public_key());
            prop_assert_eq!(&spending, keys.spending().public_key());

            let restored = KeyHierarchy::from_bytes(&keys.to_bytes()[..]).unwrap();
            prop_assert!(restored.validate().is_ok());
        }

        /// Any length other than 194 is rejected
        #[test]
        fn prop_layout_rejects_other_lengths(bytes in prop::collection::vec(any::<u8>(), 0..400)) {
            prop_assume!(bytes.len() != KEY_HIERARCHY_LEN);
            prop_assert!(KeyHierarchy::from_bytes(&bytes).is_err());
        }

        /// seal/open round-trip; any flipped byte or different AAD fails
        #[test]
        fn prop_envelope_integrity(
            plaintext in prop::collection::vec(any::<u8>(), 0..256),
            key in arbitrary_bytes32(),
            aad in prop::collection::vec(any::<u8>(), 0..64),
            flip in any::<prop::sample::Index>(),
        ) {
            let sealed = seal(&plaintext, &key, &aad).unwrap();
            prop_assert_eq!(&open(&sealed, &key, &aad).unwrap()[..], &plaintext[..]);

            let mut tampered = sealed.clone();
            let index = flip.index(tampered.len());
            tampered[index] ^= 0x01;
            prop_assert!(open(&tampered, &key, &aad).is_err());

            let mut other_aad = aad.clone();
            other_aad.push(0);
            prop_assert!(open(&sealed, &key, &other_aad).is_err());
        }

        /// The call-data decoder never panics and only answers for known shapes
        #[test]
        fn prop_decoder_total(input in prop::collection::vec(any::<u8>(), 0..512)) {
            let _ = find_ephemeral_key(&input, &Address([0x11; 20]));
        }

        /// Truncating an execute-wrapped payment never yields a key
        #[test]
        fn prop_truncated_calls_rejected(cut in 0usize..260) {
            let mut key = [0x55u8; 33];
            key[0] = 0x03;
            let call = encode_execute(
                &Address([0x99; 20]),
                0,
                &encode_send_stealth_payment(&Address([0x11; 20]), 1, &key),
            );
            prop_assume!(cut < call.len());
            prop_assert_eq!(find_ephemeral_key(&call[..cut], &Address([0x11; 20])), None);
            prop_assert_eq!(find_ephemeral_key(&call, &Address([0x11; 20])), Some(key));
        }
    }
}
