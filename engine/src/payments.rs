//! Detected payments: records, the local cache, and claiming
//!
//! The cache is append-only. Records are keyed by `"<tx hash>:<log index>"`
//! and only ever change by flipping `claimed`.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

use crate::curve::{private_key_to_address, COMPRESSED_PUBLIC_KEY_LEN, PRIVATE_KEY_LEN};
use crate::error::{EngineError, Result};
use crate::kdf::{KeyHierarchy, KEY_LEN};
use crate::keystore::{b64, open, seal};
use crate::ledger::PaymentAnnouncedEvent;
use crate::stealth::{check_stealth_payment, derive_stealth_private_key, StealthMatch};
use crate::storage::KeyValueStore;
use crate::types::{hex_bytes, opt_hex_bytes, Address, TxHash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentDirection {
    /// Detected with our viewing key
    Incoming,
    /// Sent by the account itself
    Outgoing,
}

/// One announced payment relevant to the account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StealthPaymentRecord {
    pub id: String,
    pub direction: PaymentDirection,
    pub stealth_address: Address,
    pub amount: u128,
    /// Recovered from call data; absent for outgoing payments
    #[serde(default, with = "opt_hex_bytes")]
    pub ephemeral_public_key: Option<[u8; COMPRESSED_PUBLIC_KEY_LEN]>,
    #[serde(with = "hex_bytes")]
    pub ephemeral_key_hash: [u8; 32],
    pub sender: Address,
    pub block_number: u64,
    pub timestamp: u64,
    pub transaction_hash: TxHash,
    pub log_index: u32,
    pub claimed: bool,
}

impl StealthPaymentRecord {
    /// Stable per-event identifier
    pub fn payment_id(tx: &TxHash, log_index: u32) -> String {
        format!("{}:{}", tx, log_index)
    }

    pub fn from_event(
        event: &PaymentAnnouncedEvent,
        direction: PaymentDirection,
        ephemeral_public_key: Option<[u8; COMPRESSED_PUBLIC_KEY_LEN]>,
        claimed: bool,
    ) -> Self {
        Self {
            id: Self::payment_id(&event.transaction_hash, event.log_index),
            direction,
            stealth_address: event.stealth_address,
            amount: event.amount,
            ephemeral_public_key,
            ephemeral_key_hash: event.ephemeral_key_hash,
            sender: event.sender,
            block_number: event.block_number,
            timestamp: event.timestamp,
            transaction_hash: event.transaction_hash,
            log_index: event.log_index,
            claimed,
        }
    }

    pub fn is_claimable(&self) -> bool {
        self.direction == PaymentDirection::Incoming && !self.claimed && self.amount > 0
    }
}

/// Ordered, deduplicated set of payment records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentCache {
    records: Vec<StealthPaymentRecord>,
}

impl PaymentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[StealthPaymentRecord] {
        &self.records
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    /// Look up by record id or stealth address
    pub fn find(&self, key: &str) -> Option<&StealthPaymentRecord> {
        let address = key.parse::<Address>().ok();
        self.records
            .iter()
            .find(|r| r.id == key || Some(r.stealth_address) == address)
    }

    fn find_mut(&mut self, key: &str) -> Option<&mut StealthPaymentRecord> {
        let address = key.parse::<Address>().ok();
        self.records
            .iter_mut()
            .find(|r| r.id == key || Some(r.stealth_address) == address)
    }

    /// Add a record unless one with the same id exists; returns whether it was added
    pub fn insert(&mut self, record: StealthPaymentRecord) -> bool {
        if self.contains(&record.id) {
            return false;
        }
        let position = self.records.partition_point(|r| {
            (r.block_number, r.log_index) <= (record.block_number, record.log_index)
        });
        self.records.insert(position, record);
        true
    }

    /// Insert every record; returns how many were new
    pub fn merge(&mut self, records: impl IntoIterator<Item = StealthPaymentRecord>) -> usize {
        records
            .into_iter()
            .map(|r| self.insert(r))
            .filter(|added| *added)
            .count()
    }

    pub fn incoming(&self) -> impl Iterator<Item = &StealthPaymentRecord> {
        self.records
            .iter()
            .filter(|r| r.direction == PaymentDirection::Incoming)
    }

    pub fn outgoing(&self) -> impl Iterator<Item = &StealthPaymentRecord> {
        self.records
            .iter()
            .filter(|r| r.direction == PaymentDirection::Outgoing)
    }

    /// Sum of incoming payments not yet claimed
    pub fn unclaimed_balance(&self) -> u128 {
        self.incoming()
            .filter(|r| !r.claimed)
            .fold(0u128, |acc, r| acc.saturating_add(r.amount))
    }

    /// Flip a record to claimed
    pub fn mark_claimed(&mut self, key: &str) -> Result<&StealthPaymentRecord> {
        let record = self
            .find_mut(key)
            .ok_or_else(|| EngineError::PaymentNotFound(key.to_string()))?;
        if record.claimed {
            return Err(EngineError::AlreadyClaimed(record.stealth_address.to_string()));
        }
        record.claimed = true;
        Ok(record)
    }

    /// Sync a record's claimed flag with the ledger; returns whether it changed
    pub(crate) fn sync_claimed(&mut self, id: &str, claimed: bool) -> bool {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) if record.claimed != claimed => {
                record.claimed = claimed;
                true
            }
            _ => false,
        }
    }
}

/// Scanner high-water mark and sealed payment cache per account
pub struct ScanStateStore<S> {
    store: S,
}

impl<S: KeyValueStore> ScanStateStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn last_block_key(account: &Address) -> String {
        format!("scan/{}/last_block", account)
    }

    fn payments_key(account: &Address) -> String {
        format!("scan/{}/payments", account)
    }

    fn cache_aad(account: &Address) -> String {
        format!("{}:payments", account)
    }

    /// Last fully scanned block, if any scan has completed a window
    pub fn last_block(&self, account: &Address) -> Result<Option<u64>> {
        match self.store.get(&Self::last_block_key(account))? {
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| EngineError::storage("read", format!("bad block marker {:?}", value))),
            None => Ok(None),
        }
    }

    pub fn set_last_block(&self, account: &Address, block: u64) -> Result<()> {
        self.store
            .put(&Self::last_block_key(account), &block.to_string())
    }

    pub fn load_cache(
        &self,
        account: &Address,
        storage_key: &[u8; KEY_LEN],
    ) -> Result<PaymentCache> {
        let Some(encoded) = self.store.get(&Self::payments_key(account))? else {
            return Ok(PaymentCache::new());
        };
        let envelope = b64::decode(&encoded).map_err(|_| EngineError::DecryptionFailed)?;
        let json = open(&envelope, storage_key, Self::cache_aad(account).as_bytes())?;
        Ok(serde_json::from_slice(&json)?)
    }

    pub fn save_cache(
        &self,
        account: &Address,
        storage_key: &[u8; KEY_LEN],
        cache: &PaymentCache,
    ) -> Result<()> {
        let json = Zeroizing::new(serde_json::to_vec(cache)?);
        let envelope = seal(&json, storage_key, Self::cache_aad(account).as_bytes())?;
        self.store
            .put(&Self::payments_key(account), &b64::encode(&envelope))
    }

    pub fn clear(&self, account: &Address) -> Result<()> {
        self.store.remove(&Self::payments_key(account))?;
        self.store.remove(&Self::last_block_key(account))
    }
}

/// Spending key for one detected stealth address
pub struct ClaimKey {
    pub stealth_address: Address,
    private_key: Zeroizing<[u8; PRIVATE_KEY_LEN]>,
}

impl ClaimKey {
    pub fn private_key(&self) -> &[u8; PRIVATE_KEY_LEN] {
        &self.private_key
    }
}

impl fmt::Debug for ClaimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimKey")
            .field("stealth_address", &self.stealth_address)
            .finish_non_exhaustive()
    }
}

/// Derive the key that controls `record`'s stealth address
pub fn claim_key(keys: &KeyHierarchy, record: &StealthPaymentRecord) -> Result<ClaimKey> {
    if record.direction == PaymentDirection::Outgoing {
        return Err(EngineError::validation(
            "payment",
            "outgoing payments belong to the recipient",
        ));
    }
    if record.claimed {
        return Err(EngineError::AlreadyClaimed(record.stealth_address.to_string()));
    }
    if record.amount == 0 {
        return Err(EngineError::InsufficientBalance(
            record.stealth_address.to_string(),
        ));
    }
    let ephemeral = record
        .ephemeral_public_key
        .ok_or_else(|| EngineError::validation("payment", "missing ephemeral public key"))?;

    let shared_secret = match check_stealth_payment(
        &ephemeral,
        keys.viewing().private_key(),
        keys.spending().public_key(),
        &record.stealth_address,
    )? {
        StealthMatch::Match { shared_secret, .. } => shared_secret,
        StealthMatch::NoMatch { .. } => {
            return Err(EngineError::validation(
                "payment",
                "stealth address does not belong to this account",
            ))
        }
    };

    let private_key = derive_stealth_private_key(keys.spending().private_key(), &shared_secret)?;
    if private_key_to_address(&private_key[..])? != record.stealth_address {
        return Err(EngineError::MalformedKeys);
    }

    Ok(ClaimKey {
        stealth_address: record.stealth_address,
        private_key,
    })
}
