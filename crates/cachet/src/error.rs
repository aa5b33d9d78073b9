//! Error types for cachet

use cachetdb::StoreError;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors surfaced to callers of the cache
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The loader failed; the lookup cannot be answered
    #[error("read-through load failed for key {key}: {source}")]
    StoreRead {
        /// Key being loaded
        key: String,
        /// Store failure
        source: StoreError,
    },

    /// The writer failed; the mutation was rolled back
    #[error("write-through failed for key {key}: {source}")]
    StoreWrite {
        /// Key (or batch description) being written
        key: String,
        /// Store failure
        source: StoreError,
    },

    /// An entry processor aborted; nothing was committed
    #[error("entry processor failed for key {key}: {source}")]
    Processing {
        /// Key the processor ran against
        key: String,
        /// Processor failure
        source: ProcessingError,
    },

    /// Invalid cache configuration
    #[error("invalid cache configuration: {0}")]
    Config(String),

    /// A cache with this name already exists
    #[error("cache '{0}' already exists")]
    AlreadyExists(String),

    /// The cache was closed or destroyed
    #[error("cache '{0}' is closed")]
    Closed(String),
}

impl CacheError {
    pub(crate) fn store_read(key: &impl std::fmt::Debug, source: StoreError) -> Self {
        CacheError::StoreRead {
            key: format!("{:?}", key),
            source,
        }
    }

    pub(crate) fn store_write(key: &impl std::fmt::Debug, source: StoreError) -> Self {
        CacheError::StoreWrite {
            key: format!("{:?}", key),
            source,
        }
    }
}

/// Raised by entry processor logic to abort an invoke
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProcessingError {
    message: String,
}

impl ProcessingError {
    /// Create a processing error with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Raised by a listener; never aborts the mutation that triggered it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ListenerError {
    message: String,
}

impl ListenerError {
    /// Create a listener error with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message
    pub fn message(&self) -> &str {
        &self.message
    }
}
