//! Error types for the asset ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown chain, asset, staker or operator key
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed address length, negative or zero amount, overflow
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Caller is not the configured gateway
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Delta would drive a tracked field negative
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    /// Id collision where it is not allowed
    #[error("Duplicate registration: {0}")]
    DuplicateRegistration(String),

    /// Composite key parse failure
    #[error("Malformed key: {0}")]
    MalformedKey(String),

    /// Cross-entity invariant violation (genesis checks, supply cap, allocation bounds)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Action code is neither deposit nor withdraw
    #[error("Unknown action: {0}")]
    UnknownAction(u8),

    /// Asset id is not in the registry
    #[error("Asset not registered: {0}")]
    AssetNotRegistered(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Genesis file encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
