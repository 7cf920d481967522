//! Key session: the one place decrypted key material lives
//!
//! ```text
//! Uninitialized ──initialize──▶ Initializing ──▶ Unlocked ◀──unlock── Locked
//!                                                   └──────lock──────────▲
//! ```
//!
//! The session owns the [`KeyHierarchy`] exclusively. Other components borrow
//! it for the duration of a single call through [`KeySession::keys`].

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::config::EngineConfig;
use crate::curve::PublicKeyBytes;
use crate::error::{EngineError, Result};
use crate::kdf::{
    derive_key_hierarchy, derive_unlock_key, generate_salt, validate_password_strength,
    KdfParams, KeyHierarchy, KEY_LEN, SALT_LEN,
};
use crate::keystore::{
    decrypt_key_hierarchy, encrypt_key_hierarchy, AuthMethod, EncryptedKeyRecord, KeyStore,
    ENVELOPE_VERSION,
};
use crate::signer::{key_derivation_message, recover_address, SigningAuthority};
use crate::stealth::StealthMetaAddress;
use crate::storage::KeyValueStore;
use crate::types::Address;

/// Whether unlocking needs the signing authority again
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockPolicy {
    /// Password alone decrypts the stored keys (signer only at setup)
    #[default]
    PasswordOnly,
    /// Password plus a fresh signature from the account's signer
    RequireSigner,
}

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Initializing,
    Unlocked,
    Locked,
}

enum SessionState {
    Uninitialized,
    Initializing,
    Unlocked {
        account: Address,
        keys: Box<KeyHierarchy>,
    },
    Locked {
        account: Address,
        meta: StealthMetaAddress,
    },
}

/// Explicit, caller-owned key session
pub struct KeySession {
    state: SessionState,
    kdf: KdfParams,
    policy: UnlockPolicy,
}

/// Run the memory-hard KDF on a blocking thread
async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| EngineError::storage("key derivation task", e))?
}

async fn unlock_key(
    password: &str,
    record: &EncryptedKeyRecord,
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let salt = record.unlock_salt()?;
    let params = record.kdf;
    let password = Zeroizing::new(password.to_owned());
    blocking(move || derive_unlock_key(&password, &salt, &params)).await
}

async fn seal_with_password(
    keys: &KeyHierarchy,
    account: &Address,
    password: &str,
    params: KdfParams,
) -> Result<([u8; SALT_LEN], String)> {
    let salt = generate_salt();
    let password = Zeroizing::new(password.to_owned());
    let key = blocking(move || derive_unlock_key(&password, &salt, &params)).await?;
    Ok((salt, encrypt_key_hierarchy(keys, &key, account)?))
}

impl KeySession {
    pub fn new(kdf: KdfParams, policy: UnlockPolicy) -> Self {
        Self {
            state: SessionState::Uninitialized,
            kdf,
            policy,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.kdf, config.unlock_policy)
    }

    pub fn status(&self) -> SessionStatus {
        match self.state {
            SessionState::Uninitialized => SessionStatus::Uninitialized,
            SessionState::Initializing => SessionStatus::Initializing,
            SessionState::Unlocked { .. } => SessionStatus::Unlocked,
            SessionState::Locked { .. } => SessionStatus::Locked,
        }
    }

    pub fn policy(&self) -> UnlockPolicy {
        self.policy
    }

    /// Account of the current (unlocked or locked) session
    pub fn account(&self) -> Option<&Address> {
        match &self.state {
            SessionState::Unlocked { account, .. } | SessionState::Locked { account, .. } => {
                Some(account)
            }
            _ => None,
        }
    }

    /// Borrow the decrypted keys; fails unless unlocked
    pub fn keys(&self) -> Result<&KeyHierarchy> {
        match &self.state {
            SessionState::Unlocked { keys, .. } => Ok(keys),
            SessionState::Locked { .. } => Err(EngineError::Locked),
            SessionState::Initializing => Err(EngineError::Busy),
            SessionState::Uninitialized => Err(EngineError::Uninitialized),
        }
    }

    /// Public keys stay available after lock
    pub fn meta_address(&self) -> Result<StealthMetaAddress> {
        match &self.state {
            SessionState::Unlocked { keys, .. } => Ok(StealthMetaAddress::from_keys(keys)),
            SessionState::Locked { meta, .. } => Ok(*meta),
            SessionState::Initializing => Err(EngineError::Busy),
            SessionState::Uninitialized => Err(EngineError::Uninitialized),
        }
    }

    pub fn viewing_public_key(&self) -> Result<PublicKeyBytes> {
        Ok(self.meta_address()?.viewing_public)
    }

    pub fn spending_public_key(&self) -> Result<PublicKeyBytes> {
        Ok(self.meta_address()?.spending_public)
    }

    /// First-time setup: derive keys from password + signature and persist them
    pub async fn initialize<S, A>(
        &mut self,
        store: &KeyStore<S>,
        signer: &A,
        password: &str,
        identifier: &str,
        auth_method: AuthMethod,
    ) -> Result<()>
    where
        S: KeyValueStore,
        A: SigningAuthority,
    {
        if let SessionState::Unlocked { .. } = self.state {
            return Err(EngineError::AlreadyExists(
                "an unlocked session; lock it first".into(),
            ));
        }
        validate_password_strength(password)?;
        if identifier.trim().is_empty() {
            return Err(EngineError::validation("identifier", "must not be empty"));
        }

        let account = signer.address();
        if store.exists(&account)? {
            return Err(EngineError::AlreadyExists(account.to_string()));
        }

        tracing::info!(%account, "initializing key session");
        // A failed setup leaves any previously locked account as it was
        let previous = std::mem::replace(&mut self.state, SessionState::Initializing);

        match self
            .derive_and_store(store, signer, password, identifier, auth_method, account)
            .await
        {
            Ok(keys) => {
                self.state = SessionState::Unlocked { account, keys };
                tracing::info!(%account, "key session unlocked");
                Ok(())
            }
            Err(e) => {
                self.state = previous;
                tracing::warn!(%account, error = %e, "initialization failed");
                Err(e)
            }
        }
    }

    async fn derive_and_store<S, A>(
        &self,
        store: &KeyStore<S>,
        signer: &A,
        password: &str,
        identifier: &str,
        auth_method: AuthMethod,
        account: Address,
    ) -> Result<Box<KeyHierarchy>>
    where
        S: KeyValueStore,
        A: SigningAuthority,
    {
        let master_salt = generate_salt();
        let message = key_derivation_message(identifier);
        let signature = Zeroizing::new(signer.sign_message(&message).await?);

        let params = self.kdf;
        let owned_password = Zeroizing::new(password.to_owned());
        let keys = blocking(move || {
            derive_key_hierarchy(&owned_password, &signature, &master_salt, &params)
        })
        .await?;

        let (unlock_salt, ciphertext) =
            seal_with_password(&keys, &account, password, params).await?;

        let now = chrono::Utc::now().to_rfc3339();
        store.save(&EncryptedKeyRecord {
            account,
            user_id: identifier.to_string(),
            auth_method,
            master_salt: hex::encode(master_salt),
            unlock_salt: hex::encode(unlock_salt),
            kdf: params,
            version: ENVELOPE_VERSION,
            ciphertext,
            created_at: now.clone(),
            updated_at: now,
        })?;

        Ok(Box::new(keys))
    }

    /// Password-only unlock. Refused under [`UnlockPolicy::RequireSigner`].
    pub async fn unlock<S: KeyValueStore>(
        &mut self,
        store: &KeyStore<S>,
        account: &Address,
        password: &str,
    ) -> Result<()> {
        if self.policy == UnlockPolicy::RequireSigner {
            return Err(EngineError::SignerRequired);
        }
        let record = store.load(account)?;
        let keys = self.decrypt_record(&record, password).await?;
        self.enter_unlocked(*account, keys);
        Ok(())
    }

    /// Password + signer unlock; the signature must come from the record's account
    pub async fn unlock_with_signer<S, A>(
        &mut self,
        store: &KeyStore<S>,
        signer: &A,
        password: &str,
    ) -> Result<()>
    where
        S: KeyValueStore,
        A: SigningAuthority,
    {
        let account = signer.address();
        let record = store.load(&account)?;
        let keys = self.decrypt_record(&record, password).await?;

        let message = key_derivation_message(&record.user_id);
        let signature = Zeroizing::new(signer.sign_message(&message).await?);
        let recovered = recover_address(&message, &signature)
            .map_err(|_| EngineError::SignerMismatch(account.to_string()))?;
        if recovered != record.account {
            return Err(EngineError::SignerMismatch(account.to_string()));
        }

        self.enter_unlocked(account, keys);
        Ok(())
    }

    async fn decrypt_record(
        &self,
        record: &EncryptedKeyRecord,
        password: &str,
    ) -> Result<Box<KeyHierarchy>> {
        if record.version != ENVELOPE_VERSION {
            return Err(EngineError::validation(
                "key record",
                format!("unsupported version {}", record.version),
            ));
        }
        let key = unlock_key(password, record).await?;

        // Wrong password and corrupted data must look the same
        let keys = decrypt_key_hierarchy(&record.ciphertext, &key, &record.account)
            .map_err(|_| EngineError::IncorrectPassword)?;
        keys.validate().map_err(|_| EngineError::IncorrectPassword)?;
        Ok(Box::new(keys))
    }

    fn enter_unlocked(&mut self, account: Address, keys: Box<KeyHierarchy>) {
        self.lock();
        self.state = SessionState::Unlocked { account, keys };
        tracing::info!(%account, "key session unlocked");
    }

    /// Zero every private byte; public keys are retained
    pub fn lock(&mut self) {
        let state = std::mem::replace(&mut self.state, SessionState::Uninitialized);
        self.state = match state {
            SessionState::Unlocked { account, keys } => {
                let meta = StealthMetaAddress::from_keys(&keys);
                // KeyHierarchy zeroizes itself on drop
                drop(keys);
                tracing::info!(%account, "key session locked");
                SessionState::Locked { account, meta }
            }
            other => other,
        };
    }

    /// Re-encrypt the stored keys under a new password
    pub async fn change_password<S: KeyValueStore>(
        &mut self,
        store: &KeyStore<S>,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let account = *self.account().ok_or(EngineError::Uninitialized)?;
        let keys = self.keys()?;
        validate_password_strength(new_password)?;

        let mut record = store.load(&account)?;
        // Verify old password first
        self.decrypt_record(&record, old_password).await?;

        let (unlock_salt, ciphertext) =
            seal_with_password(keys, &account, new_password, record.kdf).await?;
        record.unlock_salt = hex::encode(unlock_salt);
        record.ciphertext = ciphertext;
        record.updated_at = chrono::Utc::now().to_rfc3339();
        store.save(&record)?;

        tracing::info!(%account, "password changed");
        Ok(())
    }

    /// Delete stored keys and scan state (requires password confirmation)
    pub async fn delete_account<S: KeyValueStore>(
        &mut self,
        store: &KeyStore<S>,
        account: &Address,
        password: &str,
    ) -> Result<()> {
        let record = store.load(account)?;
        self.decrypt_record(&record, password).await?;

        store.delete(account)?;
        crate::payments::ScanStateStore::new(store.backend()).clear(account)?;

        if self.account() == Some(account) {
            self.lock();
            self.state = SessionState::Uninitialized;
        }
        tracing::info!(%account, "account removed");
        Ok(())
    }
}

impl Drop for KeySession {
    fn drop(&mut self) {
        self.lock();
    }
}
