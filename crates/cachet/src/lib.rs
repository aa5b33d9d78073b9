//! # cachet
//!
//! In-process key-value cache with read-through loading, write-through
//! persistence and change notification.
//!
//! ## Architecture
//! - **Entry table**: sharded `RwLock<HashMap>` with ahash, one per cache
//! - **Key locks**: every mutation of a key is serialized; different keys
//!   proceed in parallel
//! - **Store adapters**: `CacheLoader` / `CacheWriter` from `cachetdb`
//! - **Listeners**: synchronous batches of Created / Updated / Removed events
//! - **Entry processors**: atomic read-modify-write under the key lock
//!
//! ## Example
//! ```
//! use std::sync::Arc;
//! use cachet::{Cache, CacheConfig, CreateOrGet, Argument, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::<String>::new());
//! let config = CacheConfig::new()
//!     .read_through_shared(store.clone())
//!     .write_through_shared(store.clone());
//! let cache = Cache::new("demo", config).unwrap();
//!
//! cache.put("key1".to_string(), "value1").unwrap().into_value();
//! let value = cache
//!     .invoke("key2".to_string(), &CreateOrGet, &[Argument::from(b"New2".to_vec())])
//!     .unwrap()
//!     .into_value();
//!
//! assert_eq!(value, b"New2");
//! assert_eq!(store.peek(&"key2".to_string()), Some(b"New2".to_vec()));
//! ```

#![warn(missing_docs)]

mod cache;
mod config;
mod error;
mod event;
mod listener;
mod locks;
mod manager;
mod processor;
mod stats;
mod table;

pub use cache::{Cache, CacheKey, Outcome};
pub use config::{CacheConfig, CacheSettings, ListenerFailurePolicy, DEFAULT_SHARDS};
pub use error::{CacheError, ListenerError, ProcessingError, Result};
pub use event::{EntryEvent, EventKind, EventKinds};
pub use listener::{EntryListener, EventFilter, ListenerBinding, ListenerFailure, ListenerId};
pub use manager::CacheManager;
pub use processor::{Append, Argument, CreateOrGet, EntryProcessor, MutableEntry};
pub use stats::CacheStats;
pub use table::EntryTable;

pub use cachetdb::{CacheLoader, CacheWriter, LogStore, MemoryStore, StoreError};
