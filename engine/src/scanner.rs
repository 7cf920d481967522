//! Payment scanner
//!
//! Walks "payment announced" events in bounded block windows from the stored
//! high-water mark to the chain head. Per window:
//!
//! 1. fetch events (retried)
//! 2. classify each event: outgoing (we sent it), ours (viewing key match), or neither
//! 3. merge new records into the cache
//! 4. persist the cache, then advance the mark
//!
//! An interrupted scan therefore resumes at the first unfinished window.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::calldata::find_ephemeral_key;
use crate::error::{EngineError, Result};
use crate::kdf::KeyHierarchy;
use crate::ledger::{Ledger, PaymentAnnouncedEvent};
use crate::payments::{PaymentCache, PaymentDirection, ScanStateStore, StealthPaymentRecord};
use crate::stealth::{check_stealth_payment, ephemeral_key_hash, StealthMatch};
use crate::storage::KeyValueStore;
use crate::types::Address;

/// Scanner tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Blocks per event query
    pub window_size: u64,
    /// Extra attempts per ledger call before giving up
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// First block scanned when no mark exists (contract deployment)
    pub start_block: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            window_size: 2000,
            max_retries: 3,
            retry_delay_ms: 500,
            start_block: 0,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(EngineError::validation("scan window", "must be at least one block"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    /// Re-scan from this block instead of the stored mark
    pub from_block: Option<u64>,
}

/// Summary of one scan call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub from_block: u64,
    pub to_block: u64,
    pub windows: usize,
    pub events_seen: usize,
    pub new_incoming: usize,
    pub new_outgoing: usize,
    /// Events whose call data could not be decoded or verified
    pub skipped: usize,
    /// High-water mark after the scan
    pub last_block: Option<u64>,
}

enum EventOutcome {
    Record(StealthPaymentRecord),
    NotOurs,
    Skipped,
}

pub struct PaymentScanner<L, S> {
    ledger: L,
    state: ScanStateStore<S>,
    config: ScanConfig,
}

impl<L: Ledger, S: KeyValueStore> PaymentScanner<L, S> {
    pub fn new(ledger: L, store: S, config: ScanConfig) -> Self {
        Self {
            ledger,
            state: ScanStateStore::new(store),
            config,
        }
    }

    pub fn state(&self) -> &ScanStateStore<S> {
        &self.state
    }

    async fn with_retry<T, F, Fut>(&self, what: &'static str, mut request: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match request().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(what, attempt, error = %e, "ledger request failed, retrying");
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Scan from the mark (or `options.from_block`) to the chain head
    pub async fn scan(
        &self,
        account: &Address,
        keys: &KeyHierarchy,
        options: ScanOptions,
    ) -> Result<ScanReport> {
        self.config.validate()?;
        // Holder keys are checked once so per-event errors can only come from chain data
        keys.validate()?;

        let mut cache = self.state.load_cache(account, keys.storage_key())?;
        let mark = self.state.last_block(account)?;
        let start = options.from_block.unwrap_or(match mark {
            Some(block) => block.saturating_add(1),
            None => self.config.start_block,
        });
        let head = self
            .with_retry("block_number", || self.ledger.block_number())
            .await?;

        let mut report = ScanReport {
            from_block: start,
            to_block: head,
            last_block: mark,
            ..ScanReport::default()
        };
        if start > head {
            tracing::debug!(%account, start, head, "nothing to scan");
            return Ok(report);
        }

        tracing::info!(%account, from = start, to = head, "scanning for payments");

        let mut from = start;
        while from <= head {
            let to = from
                .saturating_add(self.config.window_size - 1)
                .min(head);
            let events = self
                .with_retry("payment_events", || self.ledger.payment_events(from, to))
                .await?;
            tracing::debug!(from, to, events = events.len(), "scanned window");

            for event in &events {
                report.events_seen += 1;
                let id = StealthPaymentRecord::payment_id(&event.transaction_hash, event.log_index);
                if cache.contains(&id) {
                    continue;
                }
                match self.process_event(account, keys, event).await? {
                    EventOutcome::Record(record) => {
                        match record.direction {
                            PaymentDirection::Incoming => report.new_incoming += 1,
                            PaymentDirection::Outgoing => report.new_outgoing += 1,
                        }
                        tracing::info!(
                            stealth_address = %record.stealth_address,
                            direction = ?record.direction,
                            amount = %record.amount,
                            "found payment"
                        );
                        cache.insert(record);
                    }
                    EventOutcome::Skipped => report.skipped += 1,
                    EventOutcome::NotOurs => {}
                }
            }

            // Cache first, mark second
            self.state.save_cache(account, keys.storage_key(), &cache)?;
            if report.last_block.map_or(true, |last| to > last) {
                self.state.set_last_block(account, to)?;
                report.last_block = Some(to);
            }

            report.windows += 1;
            from = match to.checked_add(1) {
                Some(next) => next,
                None => break,
            };
        }

        tracing::info!(
            %account,
            incoming = report.new_incoming,
            outgoing = report.new_outgoing,
            skipped = report.skipped,
            "scan complete"
        );
        Ok(report)
    }

    async fn process_event(
        &self,
        account: &Address,
        keys: &KeyHierarchy,
        event: &PaymentAnnouncedEvent,
    ) -> Result<EventOutcome> {
        if event.sender == *account {
            return Ok(EventOutcome::Record(StealthPaymentRecord::from_event(
                event,
                PaymentDirection::Outgoing,
                None,
                false,
            )));
        }

        // One unreadable transaction must not hold back the rest of the range
        let input = match self
            .with_retry("transaction_input", || {
                self.ledger.transaction_input(&event.transaction_hash)
            })
            .await
        {
            Ok(input) => input,
            Err(e) => {
                tracing::warn!(
                    tx = %event.transaction_hash,
                    error = %e,
                    "skipping event, transaction input unavailable"
                );
                return Ok(EventOutcome::Skipped);
            }
        };

        let Some(ephemeral) = find_ephemeral_key(&input, &event.stealth_address) else {
            tracing::debug!(tx = %event.transaction_hash, "no payment call in transaction input");
            return Ok(EventOutcome::Skipped);
        };
        if ephemeral_key_hash(&ephemeral) != event.ephemeral_key_hash {
            tracing::debug!(
                tx = %event.transaction_hash,
                "ephemeral key does not match event hash"
            );
            return Ok(EventOutcome::Skipped);
        }

        let result = check_stealth_payment(
            &ephemeral,
            keys.viewing().private_key(),
            keys.spending().public_key(),
            &event.stealth_address,
        );
        match result {
            Ok(StealthMatch::Match { .. }) => {}
            Ok(StealthMatch::NoMatch { .. }) => return Ok(EventOutcome::NotOurs),
            Err(e) => {
                tracing::debug!(tx = %event.transaction_hash, error = %e, "invalid ephemeral key");
                return Ok(EventOutcome::Skipped);
            }
        }

        let on_chain = self
            .with_retry("payment_record", || {
                self.ledger.payment_record(&event.stealth_address)
            })
            .await?;
        let claimed = on_chain.map_or(false, |p| p.claimed);

        Ok(EventOutcome::Record(StealthPaymentRecord::from_event(
            event,
            PaymentDirection::Incoming,
            Some(ephemeral),
            claimed,
        )))
    }

    /// Re-read the claimed flag of unclaimed incoming records; returns how many changed
    pub async fn refresh_claims(&self, account: &Address, keys: &KeyHierarchy) -> Result<usize> {
        let mut cache = self.state.load_cache(account, keys.storage_key())?;
        let pending: Vec<(String, Address)> = cache
            .incoming()
            .filter(|r| !r.claimed)
            .map(|r| (r.id.clone(), r.stealth_address))
            .collect();

        let mut changed = 0;
        for (id, stealth_address) in pending {
            let on_chain = self
                .with_retry("payment_record", || self.ledger.payment_record(&stealth_address))
                .await?;
            if on_chain.map_or(false, |p| p.claimed) && cache.sync_claimed(&id, true) {
                changed += 1;
            }
        }

        if changed > 0 {
            self.state.save_cache(account, keys.storage_key(), &cache)?;
            tracing::info!(%account, changed, "updated claim status");
        }
        Ok(changed)
    }

    /// Decrypted payment cache
    pub fn payments(&self, account: &Address, keys: &KeyHierarchy) -> Result<PaymentCache> {
        self.state.load_cache(account, keys.storage_key())
    }

    /// Mark a cached payment claimed after a successful withdrawal
    pub fn record_claim(
        &self,
        account: &Address,
        keys: &KeyHierarchy,
        key: &str,
    ) -> Result<StealthPaymentRecord> {
        let mut cache = self.state.load_cache(account, keys.storage_key())?;
        let record = cache.mark_claimed(key)?.clone();
        self.state.save_cache(account, keys.storage_key(), &cache)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calldata::{encode_execute, encode_meta_transaction, encode_send_stealth_payment};
    use crate::ledger::{MemoryLedger, OnChainPayment};
    use crate::stealth::{StealthMetaAddress, StealthPayment};
    use crate::storage::MemoryStore;
    use crate::types::TxHash;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn keys() -> KeyHierarchy {
        KeyHierarchy::from_master(&[0x42u8; 32]).unwrap()
    }

    fn account() -> Address {
        Address([0xaa; 20])
    }

    fn config() -> ScanConfig {
        ScanConfig {
            window_size: 10,
            max_retries: 2,
            retry_delay_ms: 1,
            start_block: 0,
        }
    }

    fn pay(ledger: &MemoryLedger, amount: u128) -> StealthPayment {
        let payment = StealthMetaAddress::from_keys(&keys()).generate_payment().unwrap();
        ledger.announce(Address([0x01; 20]), &payment, amount).unwrap();
        payment
    }

    /// Fails the first `failures` ledger calls with a transient error
    struct FlakyLedger {
        inner: MemoryLedger,
        failures: AtomicU32,
    }

    impl FlakyLedger {
        fn new(inner: MemoryLedger, failures: u32) -> Self {
            Self {
                inner,
                failures: AtomicU32::new(failures),
            }
        }

        fn trip(&self) -> Result<()> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(EngineError::Ledger("connection reset".into()));
            }
            Ok(())
        }
    }

    impl Ledger for FlakyLedger {
        async fn block_number(&self) -> Result<u64> {
            self.trip()?;
            self.inner.block_number().await
        }

        async fn payment_events(&self, from: u64, to: u64) -> Result<Vec<PaymentAnnouncedEvent>> {
            self.trip()?;
            self.inner.payment_events(from, to).await
        }

        async fn transaction_input(&self, tx: &TxHash) -> Result<Vec<u8>> {
            self.inner.transaction_input(tx).await
        }

        async fn payment_record(
            &self,
            stealth_address: &Address,
        ) -> Result<Option<OnChainPayment>> {
            self.inner.payment_record(stealth_address).await
        }

        async fn is_registered(&self, account: &Address) -> Result<bool> {
            self.inner.is_registered(account).await
        }

        async fn meta_address(&self, account: &Address) -> Result<Option<StealthMetaAddress>> {
            self.inner.meta_address(account).await
        }
    }

    #[tokio::test]
    async fn test_detects_own_payments_only() {
        let ledger = MemoryLedger::new();
        let mine = pay(&ledger, 100);
        let stranger_keys = KeyHierarchy::from_master(&[7u8; 32]).unwrap();
        let stranger = StealthMetaAddress::from_keys(&stranger_keys)
            .generate_payment()
            .unwrap();
        ledger.announce(Address([0x02; 20]), &stranger, 50).unwrap();

        let scanner = PaymentScanner::new(&ledger, MemoryStore::new(), config());
        let report = scanner.scan(&account(), &keys(), ScanOptions::default()).await.unwrap();
        assert_eq!(report.events_seen, 2);
        assert_eq!(report.new_incoming, 1);
        assert_eq!(report.last_block, Some(2));

        let cache = scanner.payments(&account(), &keys()).unwrap();
        assert_eq!(cache.len(), 1);
        let record = &cache.records()[0];
        assert_eq!(record.stealth_address, mine.stealth_address);
        assert_eq!(record.ephemeral_public_key, Some(mine.ephemeral_public_key));
        assert_eq!(record.amount, 100);
    }

    #[tokio::test]
    async fn test_scan_is_idempotent() {
        let ledger = MemoryLedger::new();
        pay(&ledger, 100);
        pay(&ledger, 200);

        let scanner = PaymentScanner::new(&ledger, MemoryStore::new(), config());
        scanner.scan(&account(), &keys(), ScanOptions::default()).await.unwrap();
        let first = scanner.payments(&account(), &keys()).unwrap();

        let again = scanner
            .scan(&account(), &keys(), ScanOptions { from_block: Some(0) })
            .await
            .unwrap();
        assert_eq!(again.new_incoming, 0);
        assert_eq!(again.last_block, Some(2));
        assert_eq!(scanner.payments(&account(), &keys()).unwrap(), first);
        assert_eq!(scanner.state().last_block(&account()).unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_windows_cover_range() {
        let ledger = MemoryLedger::new();
        pay(&ledger, 1);
        ledger.advance(24).unwrap();
        pay(&ledger, 2);

        let scanner = PaymentScanner::new(&ledger, MemoryStore::new(), config());
        let report = scanner.scan(&account(), &keys(), ScanOptions::default()).await.unwrap();
        // blocks 0..=26 in windows of 10
        assert_eq!(report.windows, 3);
        assert_eq!(report.new_incoming, 2);
        assert_eq!(report.last_block, Some(26));

        let empty = scanner.scan(&account(), &keys(), ScanOptions::default()).await.unwrap();
        assert_eq!(empty.windows, 0);
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let inner = MemoryLedger::new();
        pay(&inner, 100);
        let ledger = FlakyLedger::new(inner, 2);

        let scanner = PaymentScanner::new(&ledger, MemoryStore::new(), config());
        let report = scanner.scan(&account(), &keys(), ScanOptions::default()).await.unwrap();
        assert_eq!(report.new_incoming, 1);
    }

    #[tokio::test]
    async fn test_surfaces_persistent_failure() {
        let inner = MemoryLedger::new();
        pay(&inner, 100);
        let ledger = FlakyLedger::new(inner, 10);

        let scanner = PaymentScanner::new(&ledger, MemoryStore::new(), config());
        let err = scanner
            .scan(&account(), &keys(), ScanOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Ledger(_)));
        assert_eq!(scanner.state().last_block(&account()).unwrap(), None);
    }

    #[tokio::test]
    async fn test_outgoing_classification() {
        let ledger = MemoryLedger::new();
        let payment = StealthMetaAddress::from_keys(&KeyHierarchy::from_master(&[7u8; 32]).unwrap())
            .generate_payment()
            .unwrap();
        ledger.announce(account(), &payment, 30).unwrap();

        let scanner = PaymentScanner::new(&ledger, MemoryStore::new(), config());
        let report = scanner.scan(&account(), &keys(), ScanOptions::default()).await.unwrap();
        assert_eq!(report.new_outgoing, 1);

        let cache = scanner.payments(&account(), &keys()).unwrap();
        let record = cache.outgoing().next().unwrap();
        assert_eq!(record.direction, PaymentDirection::Outgoing);
        assert_eq!(record.ephemeral_public_key, None);
    }

    #[tokio::test]
    async fn test_unwraps_meta_transaction() {
        let ledger = MemoryLedger::new();
        let payment = StealthMetaAddress::from_keys(&keys()).generate_payment().unwrap();
        let call = encode_send_stealth_payment(
            &payment.stealth_address,
            75,
            &payment.ephemeral_public_key,
        );
        let execute = encode_execute(&Address([0x99; 20]), 0, &call);
        let input = encode_meta_transaction(&Address([0x03; 20]), &execute, &[1; 32], &[2; 32], 28);
        ledger
            .submit(
                input,
                vec![(
                    payment.stealth_address,
                    Address([0x03; 20]),
                    75,
                    ephemeral_key_hash(&payment.ephemeral_public_key),
                )],
            )
            .unwrap();

        let scanner = PaymentScanner::new(&ledger, MemoryStore::new(), config());
        let report = scanner.scan(&account(), &keys(), ScanOptions::default()).await.unwrap();
        assert_eq!(report.new_incoming, 1);
    }

    #[tokio::test]
    async fn test_skips_mismatched_ephemeral_hash() {
        let ledger = MemoryLedger::new();
        let payment = StealthMetaAddress::from_keys(&keys()).generate_payment().unwrap();
        let call = encode_send_stealth_payment(
            &payment.stealth_address,
            75,
            &payment.ephemeral_public_key,
        );
        ledger
            .submit(call, vec![(payment.stealth_address, Address([0x03; 20]), 75, [0u8; 32])])
            .unwrap();
        ledger
            .submit(
                b"garbage".to_vec(),
                vec![(Address([0x04; 20]), Address([0x03; 20]), 1, [0u8; 32])],
            )
            .unwrap();

        let scanner = PaymentScanner::new(&ledger, MemoryStore::new(), config());
        let report = scanner.scan(&account(), &keys(), ScanOptions::default()).await.unwrap();
        assert_eq!(report.new_incoming, 0);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.last_block, Some(2));
    }

    #[tokio::test]
    async fn test_unreadable_input_skips_only_that_event() {
        let ledger = MemoryLedger::new();
        pay(&ledger, 5);
        let mut snapshot = ledger.snapshot().unwrap();
        for input in snapshot.transactions.values_mut() {
            *input = "zz".to_string();
        }
        let ledger = MemoryLedger::from_snapshot(snapshot);
        let genuine = pay(&ledger, 9);

        let scanner = PaymentScanner::new(&ledger, MemoryStore::new(), config());
        let report = scanner.scan(&account(), &keys(), ScanOptions::default()).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.new_incoming, 1);
        assert_eq!(report.last_block, Some(2));

        let cache = scanner.payments(&account(), &keys()).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.records()[0].stealth_address, genuine.stealth_address);
    }

    #[tokio::test]
    async fn test_rescan_does_not_move_mark_backwards() {
        let ledger = MemoryLedger::new();
        pay(&ledger, 1);
        ledger.advance(30).unwrap();

        let scanner = PaymentScanner::new(&ledger, MemoryStore::new(), config());
        scanner.scan(&account(), &keys(), ScanOptions::default()).await.unwrap();
        assert_eq!(scanner.state().last_block(&account()).unwrap(), Some(31));

        let report = scanner
            .scan(&account(), &keys(), ScanOptions { from_block: Some(0) })
            .await
            .unwrap();
        assert_eq!(report.windows, 4);
        assert_eq!(scanner.state().last_block(&account()).unwrap(), Some(31));
    }

    #[tokio::test]
    async fn test_refresh_claims_and_record_claim() {
        let ledger = MemoryLedger::new();
        let first = pay(&ledger, 10);
        let second = pay(&ledger, 20);

        let scanner = PaymentScanner::new(&ledger, MemoryStore::new(), config());
        scanner.scan(&account(), &keys(), ScanOptions::default()).await.unwrap();

        ledger.set_claimed(&first.stealth_address).unwrap();
        assert_eq!(scanner.refresh_claims(&account(), &keys()).await.unwrap(), 1);
        assert_eq!(scanner.refresh_claims(&account(), &keys()).await.unwrap(), 0);

        let claimed = scanner
            .record_claim(&account(), &keys(), &second.stealth_address.to_string())
            .unwrap();
        assert!(claimed.claimed);
        assert_eq!(scanner.payments(&account(), &keys()).unwrap().unclaimed_balance(), 0);
    }
}
