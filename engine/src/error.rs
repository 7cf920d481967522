//! Error types for the StealthPay engine

use thiserror::Error;

/// Single user-visible message for every cryptographic failure.
///
/// Wrong keys, tampered ciphertexts and malformed envelopes all surface with
/// this text so callers cannot be used as a decryption oracle.
pub const CRYPTO_FAILURE: &str = "cryptographic operation failed";

/// Broad category of an [`EngineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Wrong password, missing or mismatched signer
    Authentication,
    /// Session in the wrong state, malformed or duplicate key material
    KeyState,
    /// Encryption, decryption or invalid key input
    Cryptographic,
    /// Local durable storage read/write/not-found
    Storage,
    /// Payment bookkeeping (not found, already claimed, empty)
    Protocol,
    /// Malformed user input: addresses, hex, amounts, byte lengths
    Validation,
    /// Ledger collaborator unreachable after retries
    Network,
}

#[derive(Debug, Error)]
pub enum EngineError {
    // Authentication
    #[error("Incorrect password")]
    IncorrectPassword,

    #[error("Unlock policy requires the signing authority")]
    SignerRequired,

    #[error("Signing authority unavailable: {0}")]
    SignerUnavailable(String),

    #[error("Signature does not belong to account {0}")]
    SignerMismatch(String),

    // Key state
    #[error("Keys are not initialized")]
    Uninitialized,

    #[error("Keys are locked - unlock with your password first")]
    Locked,

    #[error("Key session is busy initializing")]
    Busy,

    #[error("Key material is malformed")]
    MalformedKeys,

    #[error("Keys already exist for account {0}")]
    AlreadyExists(String),

    // Cryptographic
    #[error("{}", CRYPTO_FAILURE)]
    EncryptionFailed,

    #[error("{}", CRYPTO_FAILURE)]
    DecryptionFailed,

    #[error("{}", CRYPTO_FAILURE)]
    InvalidKey(&'static str),

    // Storage
    #[error("Storage {op} failed: {reason}")]
    Storage { op: &'static str, reason: String },

    #[error("No record found for {0}")]
    NotFound(String),

    #[error("Failed to (de)serialize stored data: {0}")]
    Serialization(#[from] serde_json::Error),

    // Protocol
    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Payment already claimed: {0}")]
    AlreadyClaimed(String),

    #[error("Stealth address {0} holds no balance")]
    InsufficientBalance(String),

    // Validation
    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    // Network
    #[error("Ledger request failed: {0}")]
    Ledger(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IncorrectPassword
            | Self::SignerRequired
            | Self::SignerUnavailable(_)
            | Self::SignerMismatch(_) => ErrorKind::Authentication,
            Self::Uninitialized
            | Self::Locked
            | Self::Busy
            | Self::MalformedKeys
            | Self::AlreadyExists(_) => ErrorKind::KeyState,
            Self::EncryptionFailed | Self::DecryptionFailed | Self::InvalidKey(_) => {
                ErrorKind::Cryptographic
            }
            Self::Storage { .. } | Self::NotFound(_) | Self::Serialization(_) => ErrorKind::Storage,
            Self::PaymentNotFound(_) | Self::AlreadyClaimed(_) | Self::InsufficientBalance(_) => {
                ErrorKind::Protocol
            }
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Ledger(_) => ErrorKind::Network,
        }
    }

    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Ledger(_))
    }

    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn storage(op: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Storage {
            op,
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
