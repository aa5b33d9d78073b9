//! In-memory system of record
//!
//! Useful as a stand-in database: it can be switched offline to simulate an
//! unreachable store, and it counts every operation it serves.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ahash::RandomState;
use parking_lot::RwLock;

use crate::error::{Result, StoreError};
use crate::traits::{CacheLoader, CacheWriter};

/// A system of record held in a hash map
pub struct MemoryStore<K> {
    data: RwLock<HashMap<K, Vec<u8>, RandomState>>,
    available: AtomicBool,
    loads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            data: RwLock::new(HashMap::with_hasher(RandomState::new())),
            available: AtomicBool::new(true),
            loads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }
}

impl<K> MemoryStore<K>
where
    K: Hash + Eq + Clone,
{
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-filled with `entries`
    pub fn with_entries<I, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        V: Into<Vec<u8>>,
    {
        let store = Self::new();
        {
            let mut data = store.data.write();
            for (key, value) in entries {
                data.insert(key, value.into());
            }
        }
        store
    }

    /// Take the store online or offline. Offline stores fail every operation.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Read a value directly, bypassing counters and availability
    pub fn peek(&self, key: &K) -> Option<Vec<u8>> {
        self.data.read().get(key).cloned()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Number of keys served by `load`/`load_all`
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of keys persisted by `write`/`write_all`
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of keys removed by `delete`/`delete_all`
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::unavailable("memory store is offline"))
        }
    }
}

impl<K> CacheLoader<K> for MemoryStore<K>
where
    K: Hash + Eq + Clone + Send + Sync,
{
    fn load(&self, key: &K) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(self.data.read().get(key).cloned())
    }

    fn load_all(&self, keys: &[K]) -> Result<HashMap<K, Vec<u8>>> {
        self.check_available()?;
        self.loads.fetch_add(keys.len() as u64, Ordering::Relaxed);

        let data = self.data.read();
        Ok(keys
            .iter()
            .filter_map(|key| data.get(key).map(|value| (key.clone(), value.clone())))
            .collect())
    }
}

impl<K> CacheWriter<K> for MemoryStore<K>
where
    K: Hash + Eq + Clone + Send + Sync,
{
    fn write(&self, key: &K, value: &[u8]) -> Result<()> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.data.write().insert(key.clone(), value.to_vec());
        Ok(())
    }

    fn write_all(&self, entries: &[(K, Vec<u8>)]) -> Result<()> {
        self.check_available()?;
        self.writes.fetch_add(entries.len() as u64, Ordering::Relaxed);

        let mut data = self.data.write();
        for (key, value) in entries {
            data.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn delete(&self, key: &K) -> Result<()> {
        self.check_available()?;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.data.write().remove(key);
        Ok(())
    }

    fn delete_all(&self, keys: &[K]) -> Result<()> {
        self.check_available()?;
        self.deletes.fetch_add(keys.len() as u64, Ordering::Relaxed);

        let mut data = self.data.write();
        for key in keys {
            data.remove(key);
        }
        Ok(())
    }
}
