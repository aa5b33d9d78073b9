//! Registry of named caches

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::cache::{Cache, CacheKey};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

/// Owns named caches sharing one key type
pub struct CacheManager<K> {
    caches: RwLock<HashMap<String, Arc<Cache<K>>>>,
    closed: AtomicBool,
}

impl<K> Default for CacheManager<K> {
    fn default() -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }
}

impl<K> fmt::Debug for CacheManager<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.caches.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("CacheManager")
            .field("caches", &names)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K: CacheKey> CacheManager<K> {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed("cache manager".to_string()));
        }
        Ok(())
    }

    /// Create a cache. Fails if the name is taken.
    pub fn create_cache(&self, name: &str, config: CacheConfig<K>) -> Result<Arc<Cache<K>>> {
        self.ensure_open()?;
        let mut caches = self.caches.write();
        if caches.contains_key(name) {
            return Err(CacheError::AlreadyExists(name.to_string()));
        }

        let cache = Arc::new(Cache::new(name, config)?);
        caches.insert(name.to_string(), Arc::clone(&cache));
        Ok(cache)
    }

    /// Return the cache called `name`, creating it from `config` if needed.
    ///
    /// `config` is dropped when the cache already exists.
    pub fn get_or_create(&self, name: &str, config: CacheConfig<K>) -> Result<Arc<Cache<K>>> {
        self.ensure_open()?;
        if let Some(cache) = self.caches.read().get(name) {
            return Ok(Arc::clone(cache));
        }

        let mut caches = self.caches.write();
        if let Some(cache) = caches.get(name) {
            return Ok(Arc::clone(cache));
        }
        let cache = Arc::new(Cache::new(name, config)?);
        caches.insert(name.to_string(), Arc::clone(&cache));
        Ok(cache)
    }

    /// Look up a cache by name
    pub fn cache(&self, name: &str) -> Option<Arc<Cache<K>>> {
        self.caches.read().get(name).cloned()
    }

    /// Names of the managed caches, sorted
    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Close and forget a cache. Returns false if there was none.
    pub fn destroy_cache(&self, name: &str) -> bool {
        match self.caches.write().remove(name) {
            Some(cache) => {
                cache.close();
                info!(cache = %name, "Destroyed cache");
                true
            }
            None => false,
        }
    }

    /// Close every cache and refuse new ones
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let caches: Vec<_> = self.caches.write().drain().collect();
        for (_, cache) in &caches {
            cache.close();
        }
        info!(caches = caches.len(), "Closed cache manager");
    }

    /// Whether the manager was closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
