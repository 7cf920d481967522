//! Encrypted key store
//!
//! Uses AES-256-GCM for encryption with the account address as additional
//! authenticated data, so a blob copied between accounts fails to open.
//!
//! Envelope (base64): `version(1) || nonce(12) || tag(16) || ciphertext`
//! Key hierarchy plaintext: 194 bytes, see [`KEY_HIERARCHY_LEN`].

use aes_gcm::{
    aead::{AeadInPlace, KeyInit, OsRng},
    Aes256Gcm, Nonce, Tag,
};
use argon2::password_hash::rand_core::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::curve::{COMPRESSED_PUBLIC_KEY_LEN, PRIVATE_KEY_LEN};
use crate::error::{EngineError, Result};
use crate::kdf::{KdfParams, KeyHierarchy, KeyPair, KEY_LEN, SALT_LEN};
use crate::storage::KeyValueStore;
use crate::types::{decode_hex_array, Address};

/// Current envelope / record format
pub const ENVELOPE_VERSION: u8 = 1;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + NONCE_LEN + TAG_LEN;

/// master(32) | storage(32) | viewingPriv(32) | viewingPub(33) | spendingPriv(32) | spendingPub(33)
pub const KEY_HIERARCHY_LEN: usize = KEY_LEN
    + KEY_LEN
    + PRIVATE_KEY_LEN
    + COMPRESSED_PUBLIC_KEY_LEN
    + PRIVATE_KEY_LEN
    + COMPRESSED_PUBLIC_KEY_LEN;

/// Sealed key hierarchy length before base64
pub const KEY_ENVELOPE_LEN: usize = HEADER_LEN + KEY_HIERARCHY_LEN;

impl KeyHierarchy {
    /// Pack into the fixed 194-byte layout
    pub fn to_bytes(&self) -> Zeroizing<[u8; KEY_HIERARCHY_LEN]> {
        let mut out = Zeroizing::new([0u8; KEY_HIERARCHY_LEN]);
        let mut offset = 0;
        for field in [
            &self.master_key()[..],
            &self.storage_key()[..],
            &self.viewing().private_key()[..],
            &self.viewing().public_key()[..],
            &self.spending().private_key()[..],
            &self.spending().public_key()[..],
        ] {
            out[offset..offset + field.len()].copy_from_slice(field);
            offset += field.len();
        }
        out
    }

    /// Inverse of [`KeyHierarchy::to_bytes`]; any other length is rejected.
    ///
    /// Consistency of the unpacked keys is not checked here, see [`KeyHierarchy::validate`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_HIERARCHY_LEN {
            return Err(EngineError::validation(
                "key hierarchy",
                format!("expected {} bytes, got {}", KEY_HIERARCHY_LEN, bytes.len()),
            ));
        }

        let mut reader = FieldReader { bytes, offset: 0 };
        let master = reader.take::<KEY_LEN>();
        let storage = reader.take::<KEY_LEN>();
        let viewing = KeyPair::from_parts(
            reader.take::<PRIVATE_KEY_LEN>(),
            reader.take::<COMPRESSED_PUBLIC_KEY_LEN>(),
        );
        let spending = KeyPair::from_parts(
            reader.take::<PRIVATE_KEY_LEN>(),
            reader.take::<COMPRESSED_PUBLIC_KEY_LEN>(),
        );

        Ok(KeyHierarchy::from_parts(master, storage, viewing, spending))
    }
}

struct FieldReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl FieldReader<'_> {
    // Caller checked the total length
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.offset..self.offset + N]);
        self.offset += N;
        out
    }
}

/// Encrypt `plaintext` under `key`, binding `aad`
pub fn seal(plaintext: &[u8], key: &[u8; KEY_LEN], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EngineError::EncryptionFailed)?;

    // Generate random nonce
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from(nonce_bytes);

    let mut body = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(&nonce, aad, &mut body)
        .map_err(|_| EngineError::EncryptionFailed)?;

    let mut envelope = Vec::with_capacity(HEADER_LEN + body.len());
    envelope.push(ENVELOPE_VERSION);
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(&tag);
    envelope.extend_from_slice(&body);
    Ok(envelope)
}

/// Decrypt an envelope produced by [`seal`].
///
/// Every failure (version, length, tag, AAD) is the same `DecryptionFailed`.
pub fn open(envelope: &[u8], key: &[u8; KEY_LEN], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if envelope.len() < HEADER_LEN || envelope[0] != ENVELOPE_VERSION {
        return Err(EngineError::DecryptionFailed);
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EngineError::DecryptionFailed)?;
    let nonce = Nonce::from_slice(&envelope[1..1 + NONCE_LEN]);
    let tag = Tag::from_slice(&envelope[1 + NONCE_LEN..HEADER_LEN]);

    let mut body = Zeroizing::new(envelope[HEADER_LEN..].to_vec());
    cipher
        .decrypt_in_place_detached(nonce, aad, &mut body, tag)
        .map_err(|_| EngineError::DecryptionFailed)?;
    Ok(body)
}

/// Seal the key hierarchy for `account` and base64-encode the envelope
pub fn encrypt_key_hierarchy(
    keys: &KeyHierarchy,
    key: &[u8; KEY_LEN],
    account: &Address,
) -> Result<String> {
    let plaintext = keys.to_bytes();
    let envelope = seal(&plaintext[..], key, account.to_string().as_bytes())?;
    Ok(b64::encode(&envelope))
}

/// Inverse of [`encrypt_key_hierarchy`]; wrong key, wrong account and
/// tampering are indistinguishable
pub fn decrypt_key_hierarchy(
    encoded: &str,
    key: &[u8; KEY_LEN],
    account: &Address,
) -> Result<KeyHierarchy> {
    let envelope = b64::decode(encoded).map_err(|_| EngineError::DecryptionFailed)?;
    if envelope.len() != KEY_ENVELOPE_LEN {
        return Err(EngineError::DecryptionFailed);
    }
    let plaintext = open(&envelope, key, account.to_string().as_bytes())?;
    KeyHierarchy::from_bytes(&plaintext).map_err(|_| EngineError::DecryptionFailed)
}

/// How the account authenticated at setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// External wallet signature
    Wallet,
    /// Platform passkey signing authority
    Passkey,
}

/// Encrypted key file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedKeyRecord {
    /// Owning account address (lowercase 0x hex); also the AAD
    pub account: Address,
    /// User identifier bound into the signer message
    pub user_id: String,
    pub auth_method: AuthMethod,
    /// Salt for the two-factor master derivation (hex)
    pub master_salt: String,
    /// Salt for the password-only unlock key (hex)
    pub unlock_salt: String,
    /// Argon2id costs used for both salts; records without it used the defaults
    #[serde(default)]
    pub kdf: KdfParams,
    /// Version for future compatibility
    pub version: u8,
    /// Sealed key hierarchy (base64)
    pub ciphertext: String,
    pub created_at: String,
    pub updated_at: String,
}

impl EncryptedKeyRecord {
    pub fn master_salt(&self) -> Result<[u8; SALT_LEN]> {
        decode_hex_array("master salt", &self.master_salt)
    }

    pub fn unlock_salt(&self) -> Result<[u8; SALT_LEN]> {
        decode_hex_array("unlock salt", &self.unlock_salt)
    }
}

/// Encrypted key records keyed by account
pub struct KeyStore<S> {
    store: S,
}

impl<S: KeyValueStore> KeyStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn backend(&self) -> &S {
        &self.store
    }

    fn record_key(account: &Address) -> String {
        format!("keys/{}", account)
    }

    /// Check if encrypted keys exist
    pub fn exists(&self, account: &Address) -> Result<bool> {
        Ok(self.store.get(&Self::record_key(account))?.is_some())
    }

    pub fn save(&self, record: &EncryptedKeyRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        self.store.put(&Self::record_key(&record.account), &json)?;
        tracing::debug!(account = %record.account, "saved encrypted key record");
        Ok(())
    }

    pub fn load(&self, account: &Address) -> Result<EncryptedKeyRecord> {
        let key = Self::record_key(account);
        let json = self
            .store
            .get(&key)?
            .ok_or_else(|| EngineError::NotFound(key.clone()))?;
        let record: EncryptedKeyRecord = serde_json::from_str(&json)?;
        if record.account != *account {
            return Err(EngineError::storage(
                "read",
                format!("record under {} belongs to {}", key, record.account),
            ));
        }
        Ok(record)
    }

    pub fn delete(&self, account: &Address) -> Result<()> {
        self.store.remove(&Self::record_key(account))
    }
}

// Base64 encoding/decoding helpers
pub(crate) mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};

    pub fn encode(data: &[u8]) -> String {
        STANDARD.encode(data)
    }

    pub fn decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(s.trim())
    }
}
