//! Fixed test vectors
//!
//! Curve and hash values are the well-known secp256k1 / Keccak-256 ones
//! (the same keys and addresses every Ethereum tool reproduces).

#[cfg(test)]
mod known_vectors {
    use crate::calldata::{selector, EXECUTE, EXECUTE_META_TRANSACTION};
    use crate::curve::{
        derive_public_key, ecdh_shared_secret, keccak256, private_key_to_address,
        public_key_to_address,
    };
    use crate::kdf::{derive_key_hierarchy, derive_master_key, hash_password, KdfParams, SALT_LEN};
    use crate::keystore::{b64, encrypt_key_hierarchy, KEY_ENVELOPE_LEN};
    use crate::stealth::{
        check_stealth_payment, generate_stealth_payment_with, ExportedViewKey, StealthMetaAddress,
    };
    use crate::curve::EphemeralKeypair;
    use crate::types::Address;

    const G1: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
    const G2: &str = "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";
    const G3: &str = "02f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9";

    fn scalar(n: u8) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[31] = n;
        out
    }

    // ==================== Curve ====================

    #[test]
    fn test_vector_small_multiples_of_generator() {
        assert_eq!(hex::encode(derive_public_key(&scalar(1)).unwrap()), G1);
        assert_eq!(hex::encode(derive_public_key(&scalar(2)).unwrap()), G2);
        assert_eq!(hex::encode(derive_public_key(&scalar(3)).unwrap()), G3);
    }

    #[test]
    fn test_vector_addresses() {
        let expected = [
            (1, "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"),
            (2, "0x2b5ad5c4795c026514f8317c7a215e218dccd6cf"),
            (3, "0x6813eb9362372eef6200f3b1dbc3f819671cba69"),
        ];
        for (n, address) in expected {
            assert_eq!(private_key_to_address(&scalar(n)).unwrap().to_string(), address);
            let public = derive_public_key(&scalar(n)).unwrap();
            assert_eq!(public_key_to_address(&public).unwrap().to_string(), address);
        }
    }

    #[test]
    fn test_vector_ecdh() {
        // 1·(2G) = 2·(1G) = 2G; the shared secret is its x-coordinate
        let g2 = hex::decode(G2).unwrap();
        let g1 = hex::decode(G1).unwrap();
        let a = ecdh_shared_secret(&scalar(1), &g2).unwrap();
        let b = ecdh_shared_secret(&scalar(2), &g1).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(hex::encode(a.as_bytes()), &G2[2..]);
    }

    // ==================== Hashes ====================

    #[test]
    fn test_vector_keccak256() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
        assert_eq!(
            hex::encode(keccak256(b"abc")),
            "4e03657aea45a94fc7d47ba826c8d667c0d1e6e33a64a036ec44f58fa12d6c45"
        );
    }

    #[test]
    fn test_vector_selectors() {
        assert_eq!(hex::encode(selector(EXECUTE)), "b61d27f6");
        assert_eq!(hex::encode(selector(EXECUTE_META_TRANSACTION)), "0c53c51c");
    }

    // ==================== Key derivation ====================

    /// Same password + same mock signature → same master key on every run
    #[test]
    fn test_vector_master_key_determinism() {
        let params = KdfParams::insecure_for_tests();
        let salt = [0x5au8; SALT_LEN];
        let signature = [0xaau8; 65];

        let first = derive_master_key(
            &hash_password("Sw1ftCorrectHorse!", &salt, &params).unwrap(),
            &signature,
        )
        .unwrap();
        let second = derive_master_key(
            &hash_password("Sw1ftCorrectHorse!", &salt, &params).unwrap(),
            &signature,
        )
        .unwrap();
        assert_eq!(first.len(), 32);
        assert_eq!(*first, *second);

        let password = "Sw1ftCorrectHorse!";
        let keys_a = derive_key_hierarchy(password, &signature, &salt, &params).unwrap();
        let keys_b = derive_key_hierarchy(password, &signature, &salt, &params).unwrap();
        assert_eq!(keys_a.master_key(), &*first);
        assert_eq!(keys_a.to_bytes()[..], keys_b.to_bytes()[..]);
    }

    #[test]
    fn test_vector_envelope_size() {
        let keys = crate::kdf::KeyHierarchy::from_master(&[1u8; 32]).unwrap();
        let encoded = encrypt_key_hierarchy(&keys, &[2u8; 32], &Address([3u8; 20])).unwrap();
        assert_eq!(KEY_ENVELOPE_LEN, 223);
        // 223 bytes → 75 base64 quanta
        assert_eq!(encoded.len(), 300);
        assert_eq!(b64::decode(&encoded).unwrap()[0], 0x01);
    }

    // ==================== Stealth ====================

    #[test]
    fn test_vector_meta_address_encoding() {
        let g1 = hex::decode(G1).unwrap();
        let g2 = hex::decode(G2).unwrap();
        let meta = StealthMetaAddress::new(&g1, &g2).unwrap();
        let encoded = meta.to_string();
        assert_eq!(encoded, format!("st:eth:0x{}{}", G1, G2));
        assert_eq!(encoded.parse::<StealthMetaAddress>().unwrap(), meta);
        assert_eq!(format!("0x{}{}", G1, G2).parse::<StealthMetaAddress>().unwrap(), meta);
    }

    #[test]
    fn test_vector_view_key_format() {
        let input = format!("vk:0x{}:0x{}", hex::encode(scalar(1)), G2);
        let view_key = ExportedViewKey::parse(&input).unwrap();
        assert_eq!(*view_key.export(), input);
    }

    /// Fixed keys: viewing v = 3, spending b = 2, ephemeral r = 1
    #[test]
    fn test_vector_fixed_stealth_payment() {
        let viewing = hex::decode(G3).unwrap();
        let spending = hex::decode(G2).unwrap();

        let payment = generate_stealth_payment_with(
            EphemeralKeypair::from_private_key(&scalar(1)).unwrap(),
            &viewing,
            &spending,
        )
        .unwrap();
        assert_eq!(hex::encode(payment.ephemeral_public_key), G1);

        let again = generate_stealth_payment_with(
            EphemeralKeypair::from_private_key(&scalar(1)).unwrap(),
            &viewing,
            &spending,
        )
        .unwrap();
        assert_eq!(payment, again);

        // Recipient side: x(v·R) = x(3·G) = x(r·V)
        let result = check_stealth_payment(
            &payment.ephemeral_public_key,
            &scalar(3),
            &spending,
            &payment.stealth_address,
        )
        .unwrap();
        assert!(result.is_match());
    }
}
