//! # cachetdb
//!
//! System-of-record adapters for the Cachet cache.
//!
//! ## Contracts
//! - [`CacheLoader`]: read a value on a cache miss (read-through)
//! - [`CacheWriter`]: persist committed mutations (write-through)
//!
//! ## Adapters
//! - [`MemoryStore`]: hash map with an availability switch and op counters
//! - [`LogStore`]: append-only record log on disk, replayed on open

#![warn(missing_docs)]

mod error;
mod log;
mod memory;
mod parser;
mod traits;

pub use error::{Result, StoreError};
pub use log::LogStore;
pub use memory::MemoryStore;
pub use traits::{CacheLoader, CacheWriter};
