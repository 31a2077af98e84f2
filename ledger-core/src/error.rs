//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed input on append; nothing was persisted
    #[error("Validation error: {0}")]
    Validation(String),

    /// Mutation of protected fields on a finalized record
    #[error(
        "Record {resource_type}/{resource_id} is finalized; fields [{}] cannot change, file a correction entry instead",
        .fields.join(", ")
    )]
    ImmutableRecord {
        /// Guarded resource type
        resource_type: String,
        /// Guarded resource id
        resource_id: String,
        /// Offending field names
        fields: Vec<String>,
    },

    /// Backward status transition out of a final state
    #[error("Record {resource_type}/{resource_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Guarded resource type
        resource_type: String,
        /// Guarded resource id
        resource_id: String,
        /// Current (final) state
        from: String,
        /// Requested state
        to: String,
    },

    /// Hash chain is broken or tampered with
    #[error("Chain integrity error: {0}")]
    ChainIntegrity(String),

    /// Chain tail moved between read and commit
    #[error("Chain conflict on {0}: tail changed during append")]
    ChainConflict(String),

    /// Backing store temporarily unavailable
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Record version did not match the caller's expectation
    #[error("Concurrent modification of {resource_type}/{resource_id}: expected version {expected}, found {actual}")]
    ConcurrentModification {
        /// Guarded resource type
        resource_type: String,
        /// Guarded resource id
        resource_id: String,
        /// Version the caller read
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// Entry or record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Capability switched off in configuration
    #[error("Feature disabled: {0}")]
    FeatureDisabled(String),

    /// Signature verification failed
    #[error("Signature verification failed: {0}")]
    SignatureError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the same call (with backoff) may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StorageUnavailable(_) | Error::ChainConflict(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        use rocksdb::ErrorKind;

        match err.kind() {
            ErrorKind::Busy | ErrorKind::TryAgain => Error::ChainConflict(err.to_string()),
            ErrorKind::IOError
            | ErrorKind::TimedOut
            | ErrorKind::ShutdownInProgress
            | ErrorKind::Incomplete => Error::StorageUnavailable(err.to_string()),
            _ => Error::Storage(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
