//! Error types for Tally
//!
//! Provides a unified error type and the ledger-specific error variants

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using TallyError
pub type Result<T> = std::result::Result<T, TallyError>;

/// Unified error type for Tally operations
#[derive(Debug, Error)]
pub enum TallyError {
    // Ledger store errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    // Malformed inbound event
    #[error("Invalid payload: {0}")]
    Payload(String),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Network / broker errors
    #[error("Network error: {0}")]
    Network(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

/// Ledger store errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Statement already exists for event {0}")]
    DuplicateEvent(Uuid),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Backend failure: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for TallyError {
    fn from(err: serde_json::Error) -> Self {
        TallyError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for TallyError {
    fn from(err: std::io::Error) -> Self {
        TallyError::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for TallyError {
    fn from(err: anyhow::Error) -> Self {
        TallyError::Internal(err.to_string())
    }
}
