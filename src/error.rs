//! Error types for the signal tracker

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the signal tracker
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid wallet id: {0}")]
    InvalidWalletId(String),

    // Inbound message errors
    #[error("Unknown signal type: {0}")]
    UnknownSignalType(String),

    // Persistence errors
    #[error("Signal not found: {0}")]
    SignalNotFound(String),

    #[error("Signal already exists: {0}")]
    SignalExists(String),

    #[error("Concurrent update of signal {signal_id}: expected version {expected}, found {found}")]
    PersistenceConflict {
        signal_id: String,
        expected: u64,
        found: u64,
    },

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Ledger {path} is held by another writer ({holder}); remove the lock file if that process is gone")]
    LedgerLocked { path: String, holder: String },

    // Notification errors
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    #[error("Notification timed out after {0}s")]
    DeliveryTimeout(u64),

    // Analytics errors
    #[error("Cluster size must be between 2 and 5, got {0}")]
    InvalidClusterSize(usize),

    // Import errors
    #[error("Import failed: {0}")]
    Import(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::PersistenceConflict { .. })
    }

    /// Check if this error came from the storage layer
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            Error::PersistenceConflict { .. }
                | Error::Persistence(_)
                | Error::LedgerLocked { .. }
                | Error::SignalNotFound(_)
                | Error::SignalExists(_)
        )
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

// Conversion from CSV reader errors
impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::Import(e.to_string())
    }
}
