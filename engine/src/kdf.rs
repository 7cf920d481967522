//! Key derivation: password + signature → key hierarchy
//!
//! ```text
//! password_hash = Argon2id(password, master_salt)           (64 MiB, 3 passes, 4 lanes)
//! master        = HKDF-Keccak256(salt = password_hash, ikm = signature)
//!                   .expand("stealthpay/v1/master")
//! storage       = expand(master, "stealthpay/v1/storage")
//! viewing_priv  = expand(master, "stealthpay/v1/viewing"  || counter)   first valid scalar
//! spending_priv = expand(master, "stealthpay/v1/spending" || counter)   first valid scalar
//! unlock_key    = HKDF-Keccak256(salt = unlock_salt, ikm = Argon2id(password, unlock_salt))
//!                   .expand("stealthpay/v1/unlock")
//! ```

use argon2::Argon2;
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha3::Keccak256;
use std::fmt;
use subtle::{Choice, ConstantTimeEq};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::curve::{derive_public_key, is_valid_private_key, PublicKeyBytes};
use crate::error::{EngineError, Result};

const MASTER_LABEL: &[u8] = b"stealthpay/v1/master";
const UNLOCK_LABEL: &[u8] = b"stealthpay/v1/unlock";
const STORAGE_LABEL: &[u8] = b"stealthpay/v1/storage";
const VIEWING_LABEL: &[u8] = b"stealthpay/v1/viewing";
const SPENDING_LABEL: &[u8] = b"stealthpay/v1/spending";

pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Parallel lanes
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536, // 64 MB memory
            iterations: 3,
            parallelism: 4,
        }
    }
}

/// Lowest memory cost accepted from configuration (64 MiB)
pub const MIN_MEMORY_KIB: u32 = 65536;
/// Lowest pass count accepted from configuration
pub const MIN_ITERATIONS: u32 = 3;

impl KdfParams {
    /// Cheap parameters so test suites do not spend seconds per derivation.
    ///
    /// Below the configuration floor; only reachable by passing them to
    /// `KeySession::new` directly, never through `EngineConfig`.
    pub fn insecure_for_tests() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    /// Reject configured costs below the production floor
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(EngineError::validation(
                "kdf params",
                "parallelism must be non-zero",
            ));
        }
        if self.iterations < MIN_ITERATIONS {
            return Err(EngineError::validation(
                "kdf params",
                format!("at least {} passes required", MIN_ITERATIONS),
            ));
        }
        let floor = MIN_MEMORY_KIB.max(8 * self.parallelism);
        if self.memory_kib < floor {
            return Err(EngineError::validation(
                "kdf params",
                format!("memory must be at least {} KiB", floor),
            ));
        }
        Ok(())
    }

    fn argon2(&self) -> Result<Argon2<'static>> {
        let params = argon2::Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| EngineError::validation("kdf params", e.to_string()))?;
        Ok(Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            params,
        ))
    }
}

/// Fresh random salt
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Memory-hard password hash (Argon2id, 32-byte output)
pub fn hash_password(
    password: &str,
    salt: &[u8; SALT_LEN],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    params
        .argon2()?
        .hash_password_into(password.as_bytes(), salt, &mut out[..])
        .map_err(|e| EngineError::validation("password hash", e.to_string()))?;
    Ok(out)
}

fn expand(prk: &[u8; KEY_LEN], info: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let hk = Hkdf::<Keccak256>::from_prk(prk).map_err(|_| EngineError::MalformedKeys)?;
    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(info, &mut okm[..])
        .map_err(|_| EngineError::MalformedKeys)?;
    Ok(okm)
}

fn extract_and_expand(salt: &[u8], ikm: &[u8], info: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let hk = Hkdf::<Keccak256>::new(Some(salt), ikm);
    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(info, &mut okm[..])
        .map_err(|_| EngineError::MalformedKeys)?;
    Ok(okm)
}

/// Combine the password hash and the signer's signature into the master key
pub fn derive_master_key(
    password_hash: &[u8; KEY_LEN],
    signature: &[u8],
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    if signature.is_empty() {
        return Err(EngineError::validation("signature", "empty signature"));
    }
    extract_and_expand(password_hash, signature, MASTER_LABEL)
}

/// Password-only key that wraps the stored key hierarchy
pub fn derive_unlock_key(
    password: &str,
    unlock_salt: &[u8; SALT_LEN],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let password_hash = hash_password(password, unlock_salt, params)?;
    extract_and_expand(unlock_salt, &password_hash[..], UNLOCK_LABEL)
}

/// Expand `label || counter` until the output is a valid secp256k1 scalar
fn derive_private_key(master: &[u8; KEY_LEN], label: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let mut info = Vec::with_capacity(label.len() + 1);
    for counter in 0..=u8::MAX {
        info.clear();
        info.extend_from_slice(label);
        info.push(counter);
        let candidate = expand(master, &info)?;
        if is_valid_private_key(&candidate[..]) {
            return Ok(candidate);
        }
    }
    Err(EngineError::MalformedKeys)
}

/// Password strength validation
pub fn validate_password_strength(password: &str) -> Result<()> {
    if password.chars().count() < 8 {
        return Err(EngineError::validation(
            "password",
            "must be at least 8 characters",
        ));
    }

    let has_upper = password.chars().any(|c| c.is_uppercase());
    let has_lower = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_numeric());

    if !has_upper || !has_lower || !has_digit {
        return Err(EngineError::validation(
            "password",
            "must contain uppercase, lowercase, and numeric characters",
        ));
    }

    Ok(())
}

/// A secp256k1 key pair; the private half is zeroized on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    private: [u8; KEY_LEN],
    public: PublicKeyBytes,
}

impl KeyPair {
    pub fn from_private(private: &[u8; KEY_LEN]) -> Result<Self> {
        Ok(Self {
            private: *private,
            public: derive_public_key(private)?,
        })
    }

    /// Pair as stored; consistency is checked by [`KeyHierarchy::validate`]
    pub(crate) fn from_parts(private: [u8; KEY_LEN], public: PublicKeyBytes) -> Self {
        Self { private, public }
    }

    pub fn private_key(&self) -> &[u8; KEY_LEN] {
        &self.private
    }

    pub fn public_key(&self) -> &PublicKeyBytes {
        &self.public
    }

    /// Constant-time check that `public == private·G`
    fn is_consistent(&self) -> Choice {
        let valid = is_valid_private_key(&self.private);
        let recomputed = derive_public_key(&self.private).unwrap_or([0u8; 33]);
        recomputed[..].ct_eq(&self.public[..]) & Choice::from(valid as u8)
    }
}

/// The full in-memory key hierarchy of an unlocked account
///
/// Security:
/// - Every private byte is zeroized on drop
/// - Clone is NOT derived to prevent accidental copies
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyHierarchy {
    master: [u8; KEY_LEN],
    storage: [u8; KEY_LEN],
    viewing: KeyPair,
    spending: KeyPair,
}

impl KeyHierarchy {
    /// Derive storage, viewing and spending keys from a master key
    pub fn from_master(master: &[u8; KEY_LEN]) -> Result<Self> {
        let storage = expand(master, STORAGE_LABEL)?;
        let viewing = derive_private_key(master, VIEWING_LABEL)?;
        let spending = derive_private_key(master, SPENDING_LABEL)?;

        let keys = Self {
            master: *master,
            storage: *storage,
            viewing: KeyPair::from_private(&viewing)?,
            spending: KeyPair::from_private(&spending)?,
        };
        keys.validate()?;
        Ok(keys)
    }

    pub(crate) fn from_parts(
        master: [u8; KEY_LEN],
        storage: [u8; KEY_LEN],
        viewing: KeyPair,
        spending: KeyPair,
    ) -> Self {
        Self {
            master,
            storage,
            viewing,
            spending,
        }
    }

    /// Check every private value is a valid scalar and both public keys match.
    ///
    /// All checks run to completion; the result is only branched on once.
    pub fn validate(&self) -> Result<()> {
        let master_ok = Choice::from(is_valid_private_key(&self.master) as u8);
        let storage_ok = Choice::from(is_valid_private_key(&self.storage) as u8);
        let ok = master_ok
            & storage_ok
            & self.viewing.is_consistent()
            & self.spending.is_consistent();

        if bool::from(ok) {
            Ok(())
        } else {
            Err(EngineError::MalformedKeys)
        }
    }

    pub fn master_key(&self) -> &[u8; KEY_LEN] {
        &self.master
    }

    pub fn storage_key(&self) -> &[u8; KEY_LEN] {
        &self.storage
    }

    pub fn viewing(&self) -> &KeyPair {
        &self.viewing
    }

    pub fn spending(&self) -> &KeyPair {
        &self.spending
    }
}

impl fmt::Debug for KeyHierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHierarchy")
            .field("viewing_public", &hex::encode(self.viewing.public))
            .field("spending_public", &hex::encode(self.spending.public))
            .finish_non_exhaustive()
    }
}

/// Full two-factor derivation with explicit salt (deterministic)
pub fn derive_key_hierarchy(
    password: &str,
    signature: &[u8],
    master_salt: &[u8; SALT_LEN],
    params: &KdfParams,
) -> Result<KeyHierarchy> {
    let password_hash = hash_password(password, master_salt, params)?;
    let master = derive_master_key(&password_hash, signature)?;
    KeyHierarchy::from_master(&master)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_validation() {
        assert!(validate_password_strength("short").is_err());
        assert!(validate_password_strength("alllowercase1").is_err());
        assert!(validate_password_strength("ALLUPPERCASE1").is_err());
        assert!(validate_password_strength("NoNumbers").is_err());
        assert!(validate_password_strength("ValidPass123").is_ok());
    }

    #[test]
    fn test_params_validation() {
        assert!(KdfParams::default().validate().is_ok());
        assert!(KdfParams::insecure_for_tests().validate().is_err());

        let cheap = KdfParams {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        };
        assert!(cheap.validate().is_err());

        let few_passes = KdfParams {
            iterations: 2,
            ..KdfParams::default()
        };
        assert!(few_passes.validate().is_err());

        let low_memory = KdfParams {
            memory_kib: MIN_MEMORY_KIB - 1,
            ..KdfParams::default()
        };
        assert!(low_memory.validate().is_err());

        let stronger = KdfParams {
            memory_kib: 2 * MIN_MEMORY_KIB,
            iterations: 4,
            parallelism: 2,
        };
        assert!(stronger.validate().is_ok());
    }

    #[test]
    fn test_password_hash_depends_on_salt() {
        let params = KdfParams::insecure_for_tests();
        let a = hash_password("ValidPass123", &[1u8; SALT_LEN], &params).unwrap();
        let b = hash_password("ValidPass123", &[1u8; SALT_LEN], &params).unwrap();
        let c = hash_password("ValidPass123", &[2u8; SALT_LEN], &params).unwrap();
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn test_master_key_binds_both_factors() {
        let hash = [0x11u8; KEY_LEN];
        let sig = [0xaau8; 65];
        let base = derive_master_key(&hash, &sig).unwrap();

        let mut other_sig = sig;
        other_sig[64] = 0x1b;
        assert_ne!(*base, *derive_master_key(&hash, &other_sig).unwrap());
        assert_ne!(*base, *derive_master_key(&[0x12u8; KEY_LEN], &sig).unwrap());
        assert!(derive_master_key(&hash, &[]).is_err());
    }

    #[test]
    fn test_subkeys_are_domain_separated() {
        let keys = KeyHierarchy::from_master(&[0x5au8; KEY_LEN]).unwrap();
        assert_ne!(keys.storage_key(), keys.master_key());
        assert_ne!(keys.viewing().private_key(), keys.spending().private_key());
        assert_ne!(keys.viewing().private_key(), keys.storage_key());
        keys.validate().unwrap();
    }

    #[test]
    fn test_validate_detects_swapped_public_key() {
        let keys = KeyHierarchy::from_master(&[0x5au8; KEY_LEN]).unwrap();
        let tampered = KeyHierarchy::from_parts(
            *keys.master_key(),
            *keys.storage_key(),
            KeyPair::from_parts(*keys.viewing().private_key(), *keys.spending().public_key()),
            KeyPair::from_parts(*keys.spending().private_key(), *keys.spending().public_key()),
        );
        assert!(matches!(tampered.validate(), Err(EngineError::MalformedKeys)));
    }

    #[test]
    fn test_validate_rejects_zero_private_key() {
        let keys = KeyHierarchy::from_master(&[0x5au8; KEY_LEN]).unwrap();
        let tampered = KeyHierarchy::from_parts(
            *keys.master_key(),
            *keys.storage_key(),
            KeyPair::from_parts([0u8; KEY_LEN], *keys.viewing().public_key()),
            KeyPair::from_parts(*keys.spending().private_key(), *keys.spending().public_key()),
        );
        assert!(tampered.validate().is_err());
    }

    #[test]
    fn test_unlock_key_differs_from_master_derivation() {
        let params = KdfParams::insecure_for_tests();
        let salt = [3u8; SALT_LEN];
        let unlock = derive_unlock_key("ValidPass123", &salt, &params).unwrap();
        let hash = hash_password("ValidPass123", &salt, &params).unwrap();
        assert_ne!(*unlock, *hash);
        assert_eq!(*unlock, *derive_unlock_key("ValidPass123", &salt, &params).unwrap());
    }

    #[test]
    fn test_debug_is_redacted() {
        let keys = KeyHierarchy::from_master(&[0x5au8; KEY_LEN]).unwrap();
        let debug = format!("{:?}", keys);
        assert!(!debug.contains(&hex::encode(keys.master_key())));
        assert!(!debug.contains(&hex::encode(keys.viewing().private_key())));
    }
}
