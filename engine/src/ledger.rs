//! Ledger boundary: the read and event surface of the payment contract
//!
//! The engine never talks to a node directly. Everything it needs from the
//! chain goes through [`Ledger`]; [`MemoryLedger`] is a snapshot-backed
//! implementation for tests and offline use.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;

use crate::calldata::encode_send_stealth_payment;
use crate::error::{EngineError, Result};
use crate::stealth::{ephemeral_key_hash, StealthMetaAddress, StealthPayment};
use crate::types::{hex_bytes, Address, TxHash};

/// The contract's "payment announced" event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAnnouncedEvent {
    /// Indexed
    pub stealth_address: Address,
    /// Indexed
    pub sender: Address,
    pub amount: u128,
    /// keccak256 of the ephemeral public key; the key itself is in the call data
    #[serde(with = "hex_bytes")]
    pub ephemeral_key_hash: [u8; 32],
    pub block_number: u64,
    /// Unix seconds
    pub timestamp: u64,
    pub transaction_hash: TxHash,
    pub log_index: u32,
}

/// Contract-side record for a stealth address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainPayment {
    pub amount: u128,
    pub sender: Address,
    pub claimed: bool,
}

/// Read surface of the payment contract
#[allow(async_fn_in_trait)]
pub trait Ledger {
    /// Current chain head
    async fn block_number(&self) -> Result<u64>;

    /// Announcement events in the inclusive range `[from, to]`
    async fn payment_events(&self, from: u64, to: u64) -> Result<Vec<PaymentAnnouncedEvent>>;

    /// Raw input of the transaction that emitted an event
    async fn transaction_input(&self, tx: &TxHash) -> Result<Vec<u8>>;

    async fn payment_record(&self, stealth_address: &Address) -> Result<Option<OnChainPayment>>;

    async fn is_registered(&self, account: &Address) -> Result<bool>;

    async fn meta_address(&self, account: &Address) -> Result<Option<StealthMetaAddress>>;
}

impl<L: Ledger + ?Sized> Ledger for &L {
    async fn block_number(&self) -> Result<u64> {
        (**self).block_number().await
    }

    async fn payment_events(&self, from: u64, to: u64) -> Result<Vec<PaymentAnnouncedEvent>> {
        (**self).payment_events(from, to).await
    }

    async fn transaction_input(&self, tx: &TxHash) -> Result<Vec<u8>> {
        (**self).transaction_input(tx).await
    }

    async fn payment_record(&self, stealth_address: &Address) -> Result<Option<OnChainPayment>> {
        (**self).payment_record(stealth_address).await
    }

    async fn is_registered(&self, account: &Address) -> Result<bool> {
        (**self).is_registered(account).await
    }

    async fn meta_address(&self, account: &Address) -> Result<Option<StealthMetaAddress>> {
        (**self).meta_address(account).await
    }
}

/// Serializable chain state backing a [`MemoryLedger`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSnapshot {
    pub block_number: u64,
    pub events: Vec<PaymentAnnouncedEvent>,
    /// Transaction inputs as 0x hex
    pub transactions: HashMap<TxHash, String>,
    pub payments: BTreeMap<Address, OnChainPayment>,
    pub registry: BTreeMap<Address, StealthMetaAddress>,
}

/// In-memory ledger
#[derive(Default)]
pub struct MemoryLedger {
    state: RwLock<LedgerSnapshot>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }

    /// Load a JSON snapshot; a missing file is an empty chain
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(json) => Ok(Self::from_snapshot(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(EngineError::storage("read", e)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot()?)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::storage("write", e))?;
        }
        std::fs::write(path, json).map_err(|e| EngineError::storage("write", e))
    }

    pub fn snapshot(&self) -> Result<LedgerSnapshot> {
        Ok(self.read()?.clone())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, LedgerSnapshot>> {
        self.state
            .read()
            .map_err(|_| EngineError::Ledger("ledger state poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, LedgerSnapshot>> {
        self.state
            .write()
            .map_err(|_| EngineError::Ledger("ledger state poisoned".into()))
    }

    pub fn register(&self, account: Address, meta: StealthMetaAddress) -> Result<()> {
        self.write()?.registry.insert(account, meta);
        Ok(())
    }

    /// Mine `blocks` empty blocks
    pub fn advance(&self, blocks: u64) -> Result<u64> {
        let mut state = self.write()?;
        state.block_number += blocks;
        Ok(state.block_number)
    }

    /// Record a transaction with arbitrary input and the events it emitted.
    ///
    /// The transaction lands in a new block; returns its hash.
    pub fn submit(
        &self,
        input: Vec<u8>,
        announcements: Vec<(Address, Address, u128, [u8; 32])>,
    ) -> Result<TxHash> {
        let mut state = self.write()?;
        state.block_number += 1;
        let block_number = state.block_number;

        let mut seed = block_number.to_be_bytes().to_vec();
        seed.extend_from_slice(&(state.transactions.len() as u64).to_be_bytes());
        seed.extend_from_slice(&input);
        let tx = TxHash(crate::curve::keccak256(&seed));

        let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
        for (log_index, (stealth_address, sender, amount, hash)) in
            announcements.into_iter().enumerate()
        {
            state.events.push(PaymentAnnouncedEvent {
                stealth_address,
                sender,
                amount,
                ephemeral_key_hash: hash,
                block_number,
                timestamp,
                transaction_hash: tx,
                log_index: log_index as u32,
            });
            state.payments.insert(
                stealth_address,
                OnChainPayment {
                    amount,
                    sender,
                    claimed: false,
                },
            );
        }
        state.transactions.insert(tx, hex::encode(&input));
        Ok(tx)
    }

    /// Direct `sendStealthPayment` from `sender`
    pub fn announce(
        &self,
        sender: Address,
        payment: &StealthPayment,
        amount: u128,
    ) -> Result<TxHash> {
        let input = encode_send_stealth_payment(
            &payment.stealth_address,
            amount,
            &payment.ephemeral_public_key,
        );
        self.submit(
            input,
            vec![(
                payment.stealth_address,
                sender,
                amount,
                ephemeral_key_hash(&payment.ephemeral_public_key),
            )],
        )
    }

    /// Mark a stealth address as withdrawn
    pub fn set_claimed(&self, stealth_address: &Address) -> Result<()> {
        let mut state = self.write()?;
        let payment = state
            .payments
            .get_mut(stealth_address)
            .ok_or_else(|| EngineError::PaymentNotFound(stealth_address.to_string()))?;
        payment.claimed = true;
        Ok(())
    }
}

impl Ledger for MemoryLedger {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.read()?.block_number)
    }

    async fn payment_events(&self, from: u64, to: u64) -> Result<Vec<PaymentAnnouncedEvent>> {
        Ok(self
            .read()?
            .events
            .iter()
            .filter(|e| e.block_number >= from && e.block_number <= to)
            .cloned()
            .collect())
    }

    async fn transaction_input(&self, tx: &TxHash) -> Result<Vec<u8>> {
        let state = self.read()?;
        let encoded = state
            .transactions
            .get(tx)
            .ok_or_else(|| EngineError::Ledger(format!("unknown transaction {}", tx)))?;
        hex::decode(encoded.trim_start_matches("0x"))
            .map_err(|e| EngineError::validation("transaction input", e.to_string()))
    }

    async fn payment_record(&self, stealth_address: &Address) -> Result<Option<OnChainPayment>> {
        Ok(self.read()?.payments.get(stealth_address).copied())
    }

    async fn is_registered(&self, account: &Address) -> Result<bool> {
        Ok(self.read()?.registry.contains_key(account))
    }

    async fn meta_address(&self, account: &Address) -> Result<Option<StealthMetaAddress>> {
        Ok(self.read()?.registry.get(account).copied())
    }
}
