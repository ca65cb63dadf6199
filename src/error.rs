//! Error types for pagekv
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for pagekv operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // On-disk State Errors
    // -------------------------------------------------------------------------
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Out of capacity: {0}")]
    Capacity(String),

    /// The store hit an unrecoverable error; only rollback and close are
    /// accepted until it is reopened.
    #[error("Store is poisoned; rollback and reopen it")]
    Poisoned,

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("Precondition failed: {0}")]
    Precondition(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether this error leaves the record manager in an unknown state.
    pub fn poisons(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_) | StoreError::Corruption(_) | StoreError::Capacity(_)
        )
    }

    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        StoreError::Precondition(msg.into())
    }

    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        StoreError::Corruption(msg.into())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
