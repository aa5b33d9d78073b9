//! Error types for cachetdb

use std::io;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by a system of record
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Corrupt or unreadable record log
    #[error("Parse error: {0}")]
    Parse(String),

    /// The system of record cannot be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The system of record refused a write or delete
    #[error("Store rejected key {key}: {reason}")]
    Rejected {
        /// Key the store refused
        key: String,
        /// Reason given by the store
        reason: String,
    },

    /// Value too large (max 1 MB)
    #[error("Value too large: {0} bytes (max 1 MB)")]
    ValueTooLarge(usize),

    /// Store is closed
    #[error("Store is closed")]
    Closed,
}

impl StoreError {
    /// Build a [`StoreError::Unavailable`] from any message
    pub fn unavailable(msg: impl Into<String>) -> Self {
        StoreError::Unavailable(msg.into())
    }

    /// Build a [`StoreError::Rejected`] for a key
    pub fn rejected(key: impl std::fmt::Debug, reason: impl Into<String>) -> Self {
        StoreError::Rejected {
            key: format!("{:?}", key),
            reason: reason.into(),
        }
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for StoreError {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        StoreError::Parse(format!("{:?}", err))
    }
}
