//! secp256k1 primitives used by every layer above
//!
//! - Private → public key derivation (33-byte compressed form)
//! - Key validation predicates that never fail
//! - Address derivation: keccak256(X || Y)[12..32]
//! - ECDH shared secrets (x-coordinate of priv·Pub)

use k256::{
    elliptic_curve::{ops::Reduce, sec1::ToEncodedPoint},
    FieldBytes, NonZeroScalar, ProjectivePoint, PublicKey, Scalar, SecretKey, U256,
};
use rand::rngs::OsRng;
use sha3::{Digest, Keccak256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{EngineError, Result};
use crate::types::{Address, ADDRESS_LEN};

pub const PRIVATE_KEY_LEN: usize = 32;
pub const COMPRESSED_PUBLIC_KEY_LEN: usize = 33;
pub const UNCOMPRESSED_PUBLIC_KEY_LEN: usize = 65;

/// Compressed secp256k1 public key bytes
pub type PublicKeyBytes = [u8; COMPRESSED_PUBLIC_KEY_LEN];

/// Keccak-256 digest
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// ECDH output (x-coordinate of the shared point), zeroized on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

/// Returns true iff `bytes` is a 32-byte scalar in [1, n)
pub fn is_valid_private_key(bytes: &[u8]) -> bool {
    bytes.len() == PRIVATE_KEY_LEN && SecretKey::from_slice(bytes).is_ok()
}

/// Returns true iff `bytes` is a SEC1 point on the curve, 33-byte (02/03) or 65-byte (04)
pub fn is_valid_public_key(bytes: &[u8]) -> bool {
    let well_formed = match (bytes.len(), bytes.first()) {
        (COMPRESSED_PUBLIC_KEY_LEN, Some(0x02 | 0x03)) => true,
        (UNCOMPRESSED_PUBLIC_KEY_LEN, Some(0x04)) => true,
        _ => false,
    };
    well_formed && PublicKey::from_sec1_bytes(bytes).is_ok()
}

pub(crate) fn parse_secret(bytes: &[u8], what: &'static str) -> Result<SecretKey> {
    if bytes.len() != PRIVATE_KEY_LEN {
        return Err(EngineError::InvalidKey(what));
    }
    SecretKey::from_slice(bytes).map_err(|_| EngineError::InvalidKey(what))
}

pub(crate) fn parse_public(bytes: &[u8], what: &'static str) -> Result<PublicKey> {
    if !is_valid_public_key(bytes) {
        return Err(EngineError::InvalidKey(what));
    }
    PublicKey::from_sec1_bytes(bytes).map_err(|_| EngineError::InvalidKey(what))
}

pub(crate) fn compress(public: &PublicKey) -> PublicKeyBytes {
    let mut out = [0u8; COMPRESSED_PUBLIC_KEY_LEN];
    out.copy_from_slice(public.to_encoded_point(true).as_bytes());
    out
}

fn address_of(public: &PublicKey) -> Address {
    let uncompressed = public.to_encoded_point(false);
    let hash = keccak256(&uncompressed.as_bytes()[1..]);
    let mut address = [0u8; ADDRESS_LEN];
    address.copy_from_slice(&hash[32 - ADDRESS_LEN..]);
    Address(address)
}

/// privateKey · G, compressed
pub fn derive_public_key(private_key: &[u8]) -> Result<PublicKeyBytes> {
    let secret = parse_secret(private_key, "private")?;
    Ok(compress(&secret.public_key()))
}

/// Normalize a 33- or 65-byte public key to the 33-byte compressed form
pub fn compress_public_key(public_key: &[u8]) -> Result<PublicKeyBytes> {
    Ok(compress(&parse_public(public_key, "public")?))
}

/// keccak256 of the uncompressed coordinates, last 20 bytes
pub fn public_key_to_address(public_key: &[u8]) -> Result<Address> {
    Ok(address_of(&parse_public(public_key, "public")?))
}

/// Account address controlled by a private key
pub fn private_key_to_address(private_key: &[u8]) -> Result<Address> {
    Ok(address_of(&parse_secret(private_key, "private")?.public_key()))
}

/// x-coordinate of privateKey · publicKey
pub fn ecdh_shared_secret(private_key: &[u8], public_key: &[u8]) -> Result<SharedSecret> {
    let secret = parse_secret(private_key, "ECDH private")?;
    let public = parse_public(public_key, "ECDH public")?;
    Ok(shared_x(&secret, &public))
}

pub(crate) fn shared_x(secret: &SecretKey, public: &PublicKey) -> SharedSecret {
    let shared = k256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(shared.raw_secret_bytes());
    SharedSecret(bytes)
}

/// keccak256(data) reduced modulo the curve order
pub fn hash_to_scalar(data: &[u8]) -> Scalar {
    let digest = FieldBytes::from(keccak256(data));
    <Scalar as Reduce<U256>>::reduce_bytes(&digest)
}

/// publicKey + tweak·G
pub(crate) fn add_tweak_to_point(public: &PublicKey, tweak: &Scalar) -> Result<PublicKey> {
    let point = ProjectivePoint::from(*public.as_affine()) + ProjectivePoint::GENERATOR * tweak;
    PublicKey::from_affine(point.to_affine()).map_err(|_| EngineError::InvalidKey("tweaked public"))
}

/// (privateKey + tweak) mod n
pub(crate) fn add_tweak_to_scalar(secret: &SecretKey, tweak: &Scalar) -> Result<SecretKey> {
    let sum: Scalar = *secret.to_nonzero_scalar() + tweak;
    Option::<NonZeroScalar>::from(NonZeroScalar::new(sum))
        .map(SecretKey::from)
        .ok_or(EngineError::InvalidKey("tweaked private"))
}

pub(crate) fn secret_to_bytes(secret: &SecretKey) -> [u8; PRIVATE_KEY_LEN] {
    let mut out = [0u8; PRIVATE_KEY_LEN];
    out.copy_from_slice(&secret.to_bytes());
    out
}

/// One-use keypair generated by a sender per payment
///
/// The secret half lives in a `k256::SecretKey`, which zeroizes on drop.
pub struct EphemeralKeypair {
    secret: SecretKey,
    public: PublicKeyBytes,
}

impl EphemeralKeypair {
    /// Fresh keypair from OS entropy
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = compress(&secret.public_key());
        Self { secret, public }
    }

    /// Deterministic keypair (test vectors, replaying a known payment)
    pub fn from_private_key(private_key: &[u8]) -> Result<Self> {
        let secret = parse_secret(private_key, "ephemeral private")?;
        let public = compress(&secret.public_key());
        Ok(Self { secret, public })
    }

    pub fn public_key(&self) -> &PublicKeyBytes {
        &self.public
    }

    /// Shared secret with a recipient's viewing key; consumes the keypair
    pub fn agree(self, viewing_public: &[u8]) -> Result<SharedSecret> {
        let public = parse_public(viewing_public, "viewing public")?;
        Ok(shared_x(&self.secret, &public))
    }
}

impl fmt::Debug for EphemeralKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeypair")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}
