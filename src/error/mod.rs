//! Error handling for the ledger
//!
//! Chain-level, block-admission and transaction-level failures are kept apart
//! so callers (mostly the mining loop) can decide what to drop and what is fatal.

use thiserror::Error;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    // chain level
    #[error("blockchain already exists")]
    AlreadyExists,
    #[error("blockchain not found, create one first")]
    NotFound,

    // block admission
    #[error("block height is invalid: expected {expected}, got {actual}")]
    BlockHeightInvalid { expected: u64, actual: u64 },
    #[error("block previous hash is invalid: tip is {tip}, block points to {prev}")]
    BlockPrevHashInvalid { tip: String, prev: String },
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    // transaction level
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("transaction signing failed: {0}")]
    TransactionSignFailed(String),
    #[error("transaction creation failed: {0}")]
    TransactionCreateFailed(String),
    #[error("transaction is invalid: {0}")]
    TransactionInvalid(String),
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    // codec level
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("proof-of-work nonce space exhausted at difficulty {0}")]
    NonceExhausted(u32),
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("cryptographic error: {0}")]
    Crypto(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("worker thread failed: {0}")]
    Worker(String),
}

impl LedgerError {
    /// Failures after which the ledger cannot safely keep extending the chain.
    /// Validation failures are not fatal: the offending input is dropped instead.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LedgerError::NonceExhausted(_)
                | LedgerError::Database(_)
                | LedgerError::Serialization(_)
                | LedgerError::Io(_)
                | LedgerError::Worker(_)
        )
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Io(err.to_string())
    }
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for LedgerError {
    fn from(err: bincode::error::EncodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for LedgerError {
    fn from(err: bincode::error::DecodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(err: toml::de::Error) -> Self {
        LedgerError::Config(err.to_string())
    }
}

impl From<sled::transaction::TransactionError<LedgerError>> for LedgerError {
    fn from(err: sled::transaction::TransactionError<LedgerError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => LedgerError::Database(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_not_fatal() {
        assert!(!LedgerError::TransactionInvalid("ab".to_string()).is_fatal());
        assert!(!LedgerError::BlockHeightInvalid {
            expected: 2,
            actual: 5
        }
        .is_fatal());
        assert!(LedgerError::NonceExhausted(12).is_fatal());
        assert!(LedgerError::Database("gone".to_string()).is_fatal());
    }

    #[test]
    fn test_transaction_abort_unwraps_inner_error() {
        let err: LedgerError =
            sled::transaction::TransactionError::Abort(LedgerError::AlreadyExists).into();
        assert!(matches!(err, LedgerError::AlreadyExists));
    }

    #[test]
    fn test_insufficient_funds_message() {
        let err = LedgerError::InsufficientFunds {
            required: 30,
            available: 10,
        };
        assert_eq!(
            err.to_string(),
            "insufficient funds: required 30, available 10"
        );
    }
}
