//! StealthPay engine - key management and stealth payments on secp256k1
//!
//! Two factors (a password and a signature from an external signing
//! authority) derive a key hierarchy. The hierarchy is stored encrypted,
//! held in memory only by an unlocked [`KeySession`], and used to detect and
//! claim payments sent to one-time stealth addresses.
//!
//! ```text
//! password ─┐
//!           ├─▶ kdf ─▶ KeyHierarchy ─▶ keystore (AES-256-GCM at rest)
//! signer ───┘               │
//!                           ├─▶ stealth (meta-address, detection, spend keys)
//!                           └─▶ scanner ◀─ ledger + calldata
//! ```

pub mod calldata;
pub mod config;
pub mod curve;
pub mod error;
pub mod kdf;
pub mod keystore;
pub mod ledger;
pub mod payments;
pub mod scanner;
pub mod session;
pub mod signer;
pub mod stealth;
pub mod storage;
pub mod types;


#[cfg(test)]
mod test_vectors;

#[cfg(test)]
mod fuzz_tests;


pub use config::EngineConfig;
pub use error::{EngineError, ErrorKind, Result};
pub use kdf::{KdfParams, KeyHierarchy, KeyPair};
pub use keystore::{AuthMethod, EncryptedKeyRecord, KeyStore};
pub use ledger::{Ledger, LedgerSnapshot, MemoryLedger, OnChainPayment, PaymentAnnouncedEvent};
pub use payments::{claim_key, ClaimKey, PaymentCache, PaymentDirection, StealthPaymentRecord};
pub use scanner::{PaymentScanner, ScanConfig, ScanOptions, ScanReport};
pub use session::{KeySession, SessionStatus, UnlockPolicy};
pub use signer::{key_derivation_message, LocalSigner, SigningAuthority};
pub use stealth::{ExportedViewKey, StealthMatch, StealthMetaAddress, StealthPayment};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use types::{Address, TxHash};
