//! Signing authority boundary
//!
//! The engine only needs one thing from the external signer: a deterministic
//! signature over [`key_derivation_message`]. Deterministic (RFC 6979) ECDSA
//! makes the same identifier always reproduce the same master key.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::PublicKey;
use rand::rngs::OsRng;
use std::fmt;

use crate::curve::{compress, keccak256, public_key_to_address};
use crate::error::{EngineError, Result};
use crate::types::Address;

/// Length of an r || s || v signature
pub const SIGNATURE_LEN: usize = 65;

/// Fixed message the signer signs to derive (and later recover) keys
pub fn key_derivation_message(identifier: &str) -> String {
    format!(
        "StealthPay key derivation\n\
         \n\
         Sign this message to derive your private payment keys.\n\
         This does not send a transaction or cost any fees.\n\
         \n\
         Identifier: {}\n\
         Version: 1",
        identifier
    )
}

/// External signing authority (browser wallet, hardware device, passkey)
///
/// `sign_message` may suspend on human interaction; the engine imposes no
/// timeout of its own.
#[allow(async_fn_in_trait)]
pub trait SigningAuthority {
    /// Account controlled by this authority
    fn address(&self) -> Address;

    /// Sign `message`; must be deterministic for the same message
    async fn sign_message(&self, message: &str) -> Result<Vec<u8>>;
}

/// keccak256("\x19Ethereum Signed Message:\n" || len || message)
pub fn personal_message_hash(message: &str) -> [u8; 32] {
    let mut data = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    data.extend_from_slice(message.as_bytes());
    keccak256(&data)
}

/// Recover the account that produced `signature` over `message`
pub fn recover_address(message: &str, signature: &[u8]) -> Result<Address> {
    if signature.len() != SIGNATURE_LEN {
        return Err(EngineError::validation(
            "signature",
            format!("expected {} bytes, got {}", SIGNATURE_LEN, signature.len()),
        ));
    }

    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| EngineError::validation("signature", e.to_string()))?;
    let v = signature[64];
    let recovery_id = RecoveryId::from_byte(if v >= 27 { v - 27 } else { v })
        .ok_or_else(|| EngineError::validation("signature", format!("bad recovery byte {}", v)))?;

    let prehash = personal_message_hash(message);
    let verifying_key = VerifyingKey::recover_from_prehash(&prehash, &sig, recovery_id)
        .map_err(|e| EngineError::validation("signature", e.to_string()))?;
    public_key_to_address(&compress(&PublicKey::from(&verifying_key)))
}

/// Local secp256k1 signer using EIP-191 personal messages
pub struct LocalSigner {
    key: SigningKey,
    address: Address,
}

impl LocalSigner {
    pub fn from_private_key(private_key: &[u8]) -> Result<Self> {
        let key = SigningKey::from_slice(private_key)
            .map_err(|_| EngineError::InvalidKey("signer private"))?;
        let address = public_key_to_address(&compress(&PublicKey::from(key.verifying_key())))?;
        Ok(Self { key, address })
    }

    pub fn random() -> Self {
        let key = SigningKey::random(&mut OsRng);
        let address = public_key_to_address(&compress(&PublicKey::from(key.verifying_key())))
            .unwrap_or_default();
        Self { key, address }
    }

    /// Raw private key bytes (for writing a signer key file)
    pub fn to_bytes(&self) -> zeroize::Zeroizing<[u8; 32]> {
        let mut out = zeroize::Zeroizing::new([0u8; 32]);
        out.copy_from_slice(&self.key.to_bytes());
        out
    }

    pub fn sign(&self, message: &str) -> Result<[u8; SIGNATURE_LEN]> {
        let prehash = personal_message_hash(message);
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&prehash)
            .map_err(|e| EngineError::SignerUnavailable(e.to_string()))?;

        let mut out = [0u8; SIGNATURE_LEN];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = 27 + recovery_id.to_byte();
        Ok(out)
    }
}

impl SigningAuthority for LocalSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_message(&self, message: &str) -> Result<Vec<u8>> {
        Ok(self.sign(message)?.to_vec())
    }
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
