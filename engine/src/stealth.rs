//! Stealth address protocol (dual-key, secp256k1)
//!
//! ## Protocol Overview
//!
//! ### Recipient Setup
//! 1. Viewing key pair: (v, V) where V = v·G
//! 2. Spending key pair: (b, B) where B = b·G
//! 3. Publish meta-address: (B, V)
//!
//! ### Sender
//! 1. Generate ephemeral key pair: (r, R) where R = r·G
//! 2. Shared secret: ss = x(r·V)
//! 3. Stealth pubkey: P = B + keccak256(ss)·G
//! 4. Pay to address(P) and publish R
//!
//! ### Recipient
//! 1. ss = x(v·R), same as the sender's
//! 2. P' = B + keccak256(ss)·G; compare address(P') to the paid address
//! 3. On match, spending key: p = b + keccak256(ss) mod n

use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::curve::{
    add_tweak_to_point, add_tweak_to_scalar, compress, hash_to_scalar, keccak256, parse_public,
    parse_secret, public_key_to_address, secret_to_bytes, shared_x, EphemeralKeypair,
    PublicKeyBytes, SharedSecret, COMPRESSED_PUBLIC_KEY_LEN, PRIVATE_KEY_LEN,
};
use crate::error::{EngineError, Result};
use crate::kdf::KeyHierarchy;
use crate::types::{decode_hex_array, encode_hex, Address};

const META_ADDRESS_PREFIX: &str = "st:eth:";
const VIEW_KEY_PREFIX: &str = "vk:";

/// Result of generating a stealth payment (sender side)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StealthPayment {
    /// One-time address to pay
    pub stealth_address: Address,
    /// P = B + keccak256(ss)·G
    pub stealth_public_key: PublicKeyBytes,
    /// R, published alongside the payment
    pub ephemeral_public_key: PublicKeyBytes,
}

/// Outcome of testing an announced payment against our viewing key
#[derive(Debug)]
pub enum StealthMatch {
    /// The address is ours; the shared secret derives its spending key
    Match {
        address: Address,
        shared_secret: SharedSecret,
    },
    /// Not ours; the address we derived is kept for audit
    NoMatch { derived_address: Address },
}

impl StealthMatch {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match { .. })
    }
}

/// P = B + keccak256(ss)·G
pub fn stealth_public_key(
    spending_public: &[u8],
    shared_secret: &SharedSecret,
) -> Result<PublicKeyBytes> {
    let spend = parse_public(spending_public, "spending public")?;
    let tweak = hash_to_scalar(shared_secret.as_bytes());
    Ok(compress(&add_tweak_to_point(&spend, &tweak)?))
}

/// Generate a stealth payment with a fresh ephemeral key
pub fn generate_stealth_payment(
    viewing_public: &[u8],
    spending_public: &[u8],
) -> Result<StealthPayment> {
    generate_stealth_payment_with(EphemeralKeypair::generate(), viewing_public, spending_public)
}

/// Generate a stealth payment from a caller-supplied ephemeral key.
///
/// The keypair is consumed so it cannot be reused for a second payment.
pub fn generate_stealth_payment_with(
    ephemeral: EphemeralKeypair,
    viewing_public: &[u8],
    spending_public: &[u8],
) -> Result<StealthPayment> {
    // Validate recipient keys before doing any work
    parse_public(spending_public, "spending public")?;

    let ephemeral_public_key = *ephemeral.public_key();
    let shared_secret = ephemeral.agree(viewing_public)?;

    let stealth_public_key = stealth_public_key(spending_public, &shared_secret)?;
    let stealth_address = public_key_to_address(&stealth_public_key)?;

    Ok(StealthPayment {
        stealth_address,
        stealth_public_key,
        ephemeral_public_key,
    })
}

/// Check whether `candidate` was paid to the holder of `viewing_private`.
///
/// A non-matching address is `Ok(NoMatch)`; malformed keys are errors.
pub fn check_stealth_payment(
    ephemeral_public: &[u8],
    viewing_private: &[u8],
    spending_public: &[u8],
    candidate: &Address,
) -> Result<StealthMatch> {
    let viewing = parse_secret(viewing_private, "viewing private")?;
    let ephemeral = parse_public(ephemeral_public, "ephemeral public")?;

    let shared_secret = shared_x(&viewing, &ephemeral);
    let derived = public_key_to_address(&stealth_public_key(spending_public, &shared_secret)?)?;

    // Use constant-time comparison to prevent timing attacks
    if bool::from(derived.as_bytes()[..].ct_eq(&candidate.as_bytes()[..])) {
        Ok(StealthMatch::Match {
            address: derived,
            shared_secret,
        })
    } else {
        Ok(StealthMatch::NoMatch {
            derived_address: derived,
        })
    }
}

/// p = (b + keccak256(ss)) mod n
pub fn derive_stealth_private_key(
    spending_private: &[u8],
    shared_secret: &SharedSecret,
) -> Result<Zeroizing<[u8; PRIVATE_KEY_LEN]>> {
    let spend = parse_secret(spending_private, "spending private")?;
    let tweak = hash_to_scalar(shared_secret.as_bytes());
    let stealth = add_tweak_to_scalar(&spend, &tweak)?;
    Ok(Zeroizing::new(secret_to_bytes(&stealth)))
}

/// keccak256(R), the value indexed by the on-chain announcement event
pub fn ephemeral_key_hash(ephemeral_public: &[u8]) -> [u8; 32] {
    keccak256(ephemeral_public)
}

/// A recipient's published pair of public keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StealthMetaAddress {
    pub spending_public: PublicKeyBytes,
    pub viewing_public: PublicKeyBytes,
}

impl StealthMetaAddress {
    pub fn new(spending_public: &[u8], viewing_public: &[u8]) -> Result<Self> {
        Ok(Self {
            spending_public: compress(&parse_public(spending_public, "spending public")?),
            viewing_public: compress(&parse_public(viewing_public, "viewing public")?),
        })
    }

    pub fn from_keys(keys: &KeyHierarchy) -> Self {
        Self {
            spending_public: *keys.spending().public_key(),
            viewing_public: *keys.viewing().public_key(),
        }
    }

    /// New one-time payment to this recipient
    pub fn generate_payment(&self) -> Result<StealthPayment> {
        generate_stealth_payment(&self.viewing_public, &self.spending_public)
    }
}

impl fmt::Display for StealthMetaAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut combined = [0u8; 2 * COMPRESSED_PUBLIC_KEY_LEN];
        combined[..COMPRESSED_PUBLIC_KEY_LEN].copy_from_slice(&self.spending_public);
        combined[COMPRESSED_PUBLIC_KEY_LEN..].copy_from_slice(&self.viewing_public);
        write!(f, "{}{}", META_ADDRESS_PREFIX, encode_hex(&combined))
    }
}

impl FromStr for StealthMetaAddress {
    type Err = EngineError;

    fn from_str(input: &str) -> Result<Self> {
        let encoded = input.trim();
        let encoded = encoded.strip_prefix(META_ADDRESS_PREFIX).unwrap_or(encoded);
        let bytes: [u8; 2 * COMPRESSED_PUBLIC_KEY_LEN] = decode_hex_array("meta-address", encoded)?;
        Self::new(
            &bytes[..COMPRESSED_PUBLIC_KEY_LEN],
            &bytes[COMPRESSED_PUBLIC_KEY_LEN..],
        )
        .map_err(|_| EngineError::validation("meta-address", "not a valid pair of curve points"))
    }
}

impl serde::Serialize for StealthMetaAddress {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for StealthMetaAddress {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Scan-only capability: viewing private key + spending public key
///
/// Can detect payments, cannot derive spending keys.
pub struct ExportedViewKey {
    viewing_private: Zeroizing<[u8; PRIVATE_KEY_LEN]>,
    pub spending_public: PublicKeyBytes,
}

impl ExportedViewKey {
    pub fn from_keys(keys: &KeyHierarchy) -> Self {
        Self {
            viewing_private: Zeroizing::new(*keys.viewing().private_key()),
            spending_public: *keys.spending().public_key(),
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let body = input.trim();
        let body = body.strip_prefix(VIEW_KEY_PREFIX).unwrap_or(body);
        let (viewing, spending) = body
            .split_once(':')
            .ok_or_else(|| EngineError::validation("view key", "expected <viewing>:<spending>"))?;

        let viewing_private =
            Zeroizing::new(decode_hex_array::<PRIVATE_KEY_LEN>("view key", viewing)?);
        parse_secret(&viewing_private[..], "viewing private")
            .map_err(|_| EngineError::validation("view key", "viewing key is not a valid scalar"))?;
        let spending_bytes = decode_hex_array::<COMPRESSED_PUBLIC_KEY_LEN>("view key", spending)?;
        let spending_public = compress(
            &parse_public(&spending_bytes, "spending public").map_err(|_| {
                EngineError::validation("view key", "spending key is not a curve point")
            })?,
        );

        Ok(Self {
            viewing_private,
            spending_public,
        })
    }

    /// `vk:0x<viewing private>:0x<spending public>`; handle with care
    pub fn export(&self) -> Zeroizing<String> {
        Zeroizing::new(format!(
            "{}{}:{}",
            VIEW_KEY_PREFIX,
            encode_hex(&self.viewing_private[..]),
            encode_hex(&self.spending_public)
        ))
    }

    pub fn check(&self, ephemeral_public: &[u8], candidate: &Address) -> Result<StealthMatch> {
        check_stealth_payment(
            ephemeral_public,
            &self.viewing_private[..],
            &self.spending_public,
            candidate,
        )
    }
}
