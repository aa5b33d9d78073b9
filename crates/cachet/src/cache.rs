//! Cache: the public read-through/write-through surface
//!
//! Every mutation follows the same sequence while holding the key's lock:
//! commit to the entry table, hand the change to the writer (write-through),
//! roll the table back if the writer refuses, then notify synchronous
//! listeners. Non-synchronous listeners run right after the lock is released,
//! still before the call returns.
//!
//! Data-path calls also hold the cache's lifecycle gate for reading, so
//! `close` waits for calls already in flight and nothing lands in the table
//! after it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cachetdb::{CacheLoader, CacheWriter};
use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::config::{CacheConfig, CacheSettings, ListenerFailurePolicy};
use crate::error::{CacheError, ProcessingError, Result};
use crate::event::EntryEvent;
use crate::listener::{Dispatcher, ListenerBinding, ListenerFailure, ListenerId, Phase};
use crate::locks::KeyLocks;
use crate::processor::{Argument, Change, EntryProcessor, MutableEntry};
use crate::stats::CacheStats;
use crate::table::{EntryTable, Lookup, Undo};

/// Bounds every cache key satisfies
pub trait CacheKey: Hash + Eq + Ord + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Hash + Eq + Ord + Clone + fmt::Debug + Send + Sync + 'static {}

/// Result of a mutating call together with the listener failures it caused
#[derive(Debug)]
#[must_use]
pub struct Outcome<T> {
    value: T,
    listener_failures: Vec<ListenerFailure>,
}

impl<T> Outcome<T> {
    fn new(value: T, listener_failures: Vec<ListenerFailure>) -> Self {
        Self {
            value,
            listener_failures,
        }
    }

    fn clean(value: T) -> Self {
        Self::new(value, Vec::new())
    }

    /// The primary result
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Take the primary result, discarding reported failures
    pub fn into_value(self) -> T {
        self.value
    }

    /// Listener failures reported for this call
    pub fn listener_failures(&self) -> &[ListenerFailure] {
        &self.listener_failures
    }

    /// True when no listener failed
    pub fn is_clean(&self) -> bool {
        self.listener_failures.is_empty()
    }

    /// Split into the result and the failures
    pub fn into_parts(self) -> (T, Vec<ListenerFailure>) {
        (self.value, self.listener_failures)
    }

    /// Transform the primary result
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome::new(f(self.value), self.listener_failures)
    }
}

/// A named cache instance
pub struct Cache<K> {
    name: String,
    settings: CacheSettings,
    table: EntryTable<K>,
    locks: KeyLocks<K>,
    loader: Option<Arc<dyn CacheLoader<K>>>,
    writer: Option<Arc<dyn CacheWriter<K>>>,
    dispatcher: Dispatcher<K>,
    stats: CacheStats,
    lifecycle: RwLock<()>,
    closed: AtomicBool,
}

impl<K> fmt::Debug for Cache<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K: CacheKey> Cache<K> {
    /// Create a cache from a validated configuration
    pub fn new(name: impl Into<String>, config: CacheConfig<K>) -> Result<Self> {
        config.validate()?;
        let name = name.into();
        let CacheConfig {
            settings,
            loader,
            writer,
            listeners,
        } = config;

        let dispatcher = Dispatcher::new();
        for binding in listeners {
            dispatcher.register(binding);
        }

        info!(
            cache = %name,
            read_through = settings.read_through,
            write_through = settings.write_through,
            shards = settings.shards,
            "Created cache"
        );

        Ok(Self {
            table: EntryTable::new(settings.shards),
            locks: KeyLocks::new(settings.shards),
            stats: CacheStats::new(settings.statistics),
            name,
            settings,
            loader,
            writer,
            dispatcher,
            lifecycle: RwLock::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Cache name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Settings the cache was created with
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Check if the cache holds no live entries
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Whether the cache was closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CacheError::Closed(self.name.clone()));
        }
        Ok(())
    }

    /// Hold the lifecycle gate for one call, failing if the cache is closed.
    /// Recursive, so listeners and writers may call back into the cache.
    fn enter(&self) -> Result<RwLockReadGuard<'_, ()>> {
        let gate = self.lifecycle.read_recursive();
        self.ensure_open()?;
        Ok(gate)
    }

    fn active_loader(&self) -> Option<&dyn CacheLoader<K>> {
        if self.settings.read_through {
            self.loader.as_deref()
        } else {
            None
        }
    }

    fn active_writer(&self) -> Option<&dyn CacheWriter<K>> {
        if self.settings.write_through {
            self.writer.as_deref()
        } else {
            None
        }
    }

    /// Get a value, loading it through on a miss when read-through is on.
    ///
    /// A load that finds nothing is remembered, so the loader is not asked
    /// again for that key until it is written or the cache is cleared.
    pub fn get(&self, key: &K) -> Result<Option<Vec<u8>>> {
        let _gate = self.enter()?;

        match self.table.lookup(key) {
            Lookup::Hit(value) => {
                self.stats.record_hit();
                return Ok(Some(value));
            }
            Lookup::NotFound => {
                self.stats.record_miss();
                return Ok(None);
            }
            Lookup::Miss => {}
        }

        let Some(loader) = self.active_loader() else {
            self.stats.record_miss();
            return Ok(None);
        };

        let _guard = self.locks.lock(key);

        // Another caller may have loaded or written the key while we waited
        match self.table.lookup(key) {
            Lookup::Hit(value) => {
                self.stats.record_hit();
                return Ok(Some(value));
            }
            Lookup::NotFound => {
                self.stats.record_miss();
                return Ok(None);
            }
            Lookup::Miss => self.stats.record_miss(),
        }

        self.stats.record_loads(1);
        let loaded = loader
            .load(key)
            .map_err(|source| CacheError::store_read(key, source))?;
        debug!(cache = %self.name, key = ?key, found = loaded.is_some(), "Read-through load");

        self.table.fill(key.clone(), loaded.clone());
        Ok(loaded)
    }

    /// Get several values. Misses are loaded with a single `load_all` call.
    pub fn get_all(&self, keys: &[K]) -> Result<HashMap<K, Vec<u8>>> {
        let _gate = self.enter()?;

        let mut found = HashMap::with_capacity(keys.len());
        let mut missing = BTreeSet::new();
        for key in keys {
            match self.table.lookup(key) {
                Lookup::Hit(value) => {
                    self.stats.record_hit();
                    found.insert(key.clone(), value);
                }
                Lookup::NotFound => self.stats.record_miss(),
                Lookup::Miss => {
                    missing.insert(key.clone());
                }
            }
        }

        // Misses are counted once their re-check under the lock settles them
        let Some(loader) = self.active_loader() else {
            self.stats.record_misses(missing.len() as u64);
            return Ok(found);
        };
        if missing.is_empty() {
            return Ok(found);
        }

        let _guards = self.locks.lock_sorted(missing.iter());

        let mut to_load = Vec::with_capacity(missing.len());
        for key in missing {
            match self.table.lookup(&key) {
                Lookup::Hit(value) => {
                    self.stats.record_hit();
                    found.insert(key, value);
                }
                Lookup::NotFound => self.stats.record_miss(),
                Lookup::Miss => {
                    self.stats.record_miss();
                    to_load.push(key);
                }
            }
        }
        if to_load.is_empty() {
            return Ok(found);
        }

        self.stats.record_loads(to_load.len() as u64);
        let mut loaded = loader
            .load_all(&to_load)
            .map_err(|source| CacheError::store_read(&to_load, source))?;
        debug!(cache = %self.name, requested = to_load.len(), found = loaded.len(), "Read-through batch load");

        for key in to_load {
            let value = loaded.remove(&key);
            if let Some(value) = &value {
                found.insert(key.clone(), value.clone());
            }
            self.table.fill(key, value);
        }

        Ok(found)
    }

    /// Whether `key` holds a live value. Never loads.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.table.contains_key(key))
    }

    /// Insert or replace a value
    pub fn put(&self, key: K, value: impl Into<Vec<u8>>) -> Result<Outcome<()>> {
        Ok(self.get_and_put(key, value)?.map(|_| ()))
    }

    /// Insert or replace a value, returning the value it replaced
    pub fn get_and_put(&self, key: K, value: impl Into<Vec<u8>>) -> Result<Outcome<Option<Vec<u8>>>> {
        let _gate = self.enter()?;
        let value = value.into();

        let guard = self.locks.lock(&key);
        let undo = self.table.commit_value(key.clone(), value.clone());
        let previous = undo.previous_value().cloned();
        self.write_through(&key, &value, undo)?;
        self.stats.record_puts(1);

        let events = [EntryEvent::upsert(key, value, previous.clone())];
        let failures = self.notify(guard, &events);
        Ok(Outcome::new(previous, failures))
    }

    /// Insert only if the key holds no live value. Returns whether it did.
    pub fn put_if_absent(&self, key: K, value: impl Into<Vec<u8>>) -> Result<Outcome<bool>> {
        let _gate = self.enter()?;
        let value = value.into();

        let guard = self.locks.lock(&key);
        if self.table.contains_key(&key) {
            return Ok(Outcome::clean(false));
        }

        let undo = self.table.commit_value(key.clone(), value.clone());
        self.write_through(&key, &value, undo)?;
        self.stats.record_puts(1);

        let events = [EntryEvent::created(key, value)];
        let failures = self.notify(guard, &events);
        Ok(Outcome::new(true, failures))
    }

    /// Replace only if the key holds a live value. Returns whether it did.
    pub fn replace(&self, key: K, value: impl Into<Vec<u8>>) -> Result<Outcome<bool>> {
        let _gate = self.enter()?;
        let value = value.into();

        let guard = self.locks.lock(&key);
        if !self.table.contains_key(&key) {
            return Ok(Outcome::clean(false));
        }

        let undo = self.table.commit_value(key.clone(), value.clone());
        let previous = undo.previous_value().cloned();
        self.write_through(&key, &value, undo)?;
        self.stats.record_puts(1);

        let events = [EntryEvent::upsert(key, value, previous)];
        let failures = self.notify(guard, &events);
        Ok(Outcome::new(true, failures))
    }

    /// Insert or replace several values, persisted with one `write_all`.
    ///
    /// The batch is applied in key order. If the writer refuses it, every
    /// entry of the batch is rolled back.
    pub fn put_all<I, V>(&self, entries: I) -> Result<Outcome<()>>
    where
        I: IntoIterator<Item = (K, V)>,
        V: Into<Vec<u8>>,
    {
        let _gate = self.enter()?;
        let batch: BTreeMap<K, Vec<u8>> = entries
            .into_iter()
            .map(|(key, value)| (key, value.into()))
            .collect();
        if batch.is_empty() {
            return Ok(Outcome::clean(()));
        }

        let guards = self.locks.lock_sorted(batch.keys());

        let mut undos = Vec::with_capacity(batch.len());
        let mut events = Vec::with_capacity(batch.len());
        for (key, value) in &batch {
            let undo = self.table.commit_value(key.clone(), value.clone());
            events.push(EntryEvent::upsert(
                key.clone(),
                value.clone(),
                undo.previous_value().cloned(),
            ));
            undos.push(undo);
        }

        let count = batch.len() as u64;
        if let Some(writer) = self.active_writer() {
            let rows: Vec<(K, Vec<u8>)> = batch.into_iter().collect();
            if let Err(source) = writer.write_all(&rows) {
                let keys: Vec<&K> = rows.iter().map(|(key, _)| key).collect();
                warn!(cache = %self.name, keys = ?keys, error = %source, "Batch write-through failed");
                for undo in undos.into_iter().rev() {
                    self.rollback(undo);
                }
                return Err(CacheError::store_write(&keys, source));
            }
            self.stats.record_writes(count);
        }
        self.stats.record_puts(count);

        let failures = self.notify(guards, &events);
        Ok(Outcome::new((), failures))
    }

    /// Remove a key. Returns whether it held a live value.
    pub fn remove(&self, key: &K) -> Result<Outcome<bool>> {
        Ok(self.get_and_remove(key)?.map(|previous| previous.is_some()))
    }

    /// Remove a key, returning its live value.
    ///
    /// With write-through the writer is asked to delete the key even when the
    /// cache held no value for it.
    pub fn get_and_remove(&self, key: &K) -> Result<Outcome<Option<Vec<u8>>>> {
        let _gate = self.enter()?;

        let guard = self.locks.lock(key);
        let undo = self.table.commit_remove(key);
        let previous = undo.previous_value().cloned();
        self.delete_through(key, undo)?;

        let events = match &previous {
            Some(old) => {
                self.stats.record_removals(1);
                vec![EntryEvent::removed(key.clone(), old.clone())]
            }
            None => Vec::new(),
        };
        let failures = self.notify(guard, &events);
        Ok(Outcome::new(previous, failures))
    }

    /// Remove several keys, deleted with one `delete_all`. Returns how many
    /// held live values.
    pub fn remove_all(&self, keys: &[K]) -> Result<Outcome<usize>> {
        let _gate = self.enter()?;
        let keys: BTreeSet<K> = keys.iter().cloned().collect();
        if keys.is_empty() {
            return Ok(Outcome::clean(0));
        }

        let guards = self.locks.lock_sorted(keys.iter());

        let mut undos = Vec::with_capacity(keys.len());
        let mut events = Vec::new();
        for key in &keys {
            let undo = self.table.commit_remove(key);
            if let Some(old) = undo.previous_value() {
                events.push(EntryEvent::removed(key.clone(), old.clone()));
            }
            undos.push(undo);
        }

        if let Some(writer) = self.active_writer() {
            let keys: Vec<K> = keys.into_iter().collect();
            if let Err(source) = writer.delete_all(&keys) {
                warn!(cache = %self.name, keys = ?keys, error = %source, "Batch delete-through failed");
                for undo in undos.into_iter().rev() {
                    self.rollback(undo);
                }
                return Err(CacheError::store_write(&keys, source));
            }
            self.stats.record_writes(keys.len() as u64);
        }

        let removed = events.len();
        self.stats.record_removals(removed as u64);
        let failures = self.notify(guards, &events);
        Ok(Outcome::new(removed, failures))
    }

    /// Run `processor` atomically against the entry for `key`.
    ///
    /// The processor's result is returned whether or not it changed the
    /// entry. A processor error commits nothing.
    pub fn invoke<P>(&self, key: K, processor: &P, args: &[Argument]) -> Result<Outcome<P::Output>>
    where
        P: EntryProcessor<K>,
    {
        self.invoke_with(key, |entry| processor.process(entry, args))
    }

    /// Run a closure as an entry processor
    pub fn invoke_with<R, F>(&self, key: K, f: F) -> Result<Outcome<R>>
    where
        F: FnOnce(&mut MutableEntry<'_, K>) -> std::result::Result<R, ProcessingError>,
    {
        let _gate = self.enter()?;
        self.stats.record_invocation();

        let guard = self.locks.lock(&key);
        let original = self.table.lookup(&key);
        let loader = match original {
            Lookup::Miss => self.active_loader(),
            _ => None,
        };

        let mut entry = MutableEntry::new(&key, original, loader);
        let result = f(&mut entry);
        let parts = entry.into_parts();

        if parts.loaded.is_some() || parts.load_error.is_some() {
            self.stats.record_loads(1);
        }
        if let Some(source) = parts.load_error {
            return Err(CacheError::store_read(&key, source));
        }
        let output = result.map_err(|source| {
            debug!(cache = %self.name, key = ?key, error = %source, "Entry processor failed");
            CacheError::Processing {
                key: format!("{:?}", key),
                source,
            }
        })?;

        let previous = parts.previous_value();
        let events = match parts.change {
            Change::None => {
                if let Some(loaded) = parts.loaded {
                    self.table.fill(key.clone(), loaded);
                }
                Vec::new()
            }
            Change::Set(value) => {
                let undo = self.table.commit_value(key.clone(), value.clone());
                self.write_through(&key, &value, undo)?;
                self.stats.record_puts(1);
                vec![EntryEvent::upsert(key.clone(), value, previous)]
            }
            Change::Remove => {
                let undo = self.table.commit_remove(&key);
                self.delete_through(&key, undo)?;
                match previous {
                    Some(old) => {
                        self.stats.record_removals(1);
                        vec![EntryEvent::removed(key.clone(), old)]
                    }
                    None => Vec::new(),
                }
            }
        };

        let failures = self.notify(guard, &events);
        Ok(Outcome::new(output, failures))
    }

    /// Visit a snapshot of the live entries (see [`EntryTable::for_each`])
    pub fn for_each<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(&K, &[u8]),
    {
        self.ensure_open()?;
        self.table.for_each(f);
        Ok(())
    }

    /// Copy of the live entries
    pub fn entries(&self) -> Result<Vec<(K, Vec<u8>)>> {
        self.ensure_open()?;
        Ok(self.table.snapshot())
    }

    /// Drop every entry. Fires no events and leaves the store untouched.
    pub fn clear(&self) -> Result<()> {
        let _gate = self.enter()?;
        self.table.clear();
        debug!(cache = %self.name, "Cleared cache");
        Ok(())
    }

    /// Register a listener. Past events are not replayed.
    pub fn register_listener(&self, binding: ListenerBinding<K>) -> Result<ListenerId> {
        self.ensure_open()?;
        let id = self.dispatcher.register(binding);
        debug!(cache = %self.name, listener = %id, "Registered listener");
        Ok(id)
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn deregister_listener(&self, id: ListenerId) -> bool {
        self.dispatcher.deregister(id)
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.dispatcher.len()
    }

    /// Close the cache: drop its entries and reject further calls.
    ///
    /// Waits for data-path calls already in flight, so it must not be called
    /// from a listener, writer or entry processor of this cache.
    pub fn close(&self) {
        let _gate = self.lifecycle.write();
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.table.clear();
            info!(cache = %self.name, "Closed cache");
        }
    }

    fn write_through(&self, key: &K, value: &[u8], undo: Undo<K>) -> Result<()> {
        let Some(writer) = self.active_writer() else {
            return Ok(());
        };

        if let Err(source) = writer.write(key, value) {
            warn!(cache = %self.name, key = ?key, error = %source, "Write-through failed");
            self.rollback(undo);
            return Err(CacheError::store_write(key, source));
        }
        self.stats.record_writes(1);
        Ok(())
    }

    fn delete_through(&self, key: &K, undo: Undo<K>) -> Result<()> {
        let Some(writer) = self.active_writer() else {
            return Ok(());
        };

        if let Err(source) = writer.delete(key) {
            warn!(cache = %self.name, key = ?key, error = %source, "Delete-through failed");
            self.rollback(undo);
            return Err(CacheError::store_write(key, source));
        }
        self.stats.record_writes(1);
        Ok(())
    }

    fn rollback(&self, undo: Undo<K>) {
        self.stats.record_rollback();
        if !self.table.rollback(undo) {
            debug!(cache = %self.name, "Rollback skipped: cache was cleared");
        }
    }

    /// Deliver `events`: synchronous bindings while `guard` is held, the rest
    /// after releasing it
    fn notify<G>(&self, guard: G, events: &[EntryEvent<K>]) -> Vec<ListenerFailure> {
        let mut failures = self.dispatcher.dispatch(events, Phase::Locked);
        drop(guard);
        failures.extend(self.dispatcher.dispatch(events, Phase::Unlocked));

        if failures.is_empty() {
            return failures;
        }

        self.stats.record_listener_failures(failures.len() as u64);
        match self.settings.listener_failures {
            ListenerFailurePolicy::Report => {
                for failure in &failures {
                    debug!(cache = %self.name, %failure, "Listener failed");
                }
                failures
            }
            ListenerFailurePolicy::Log => {
                for failure in &failures {
                    warn!(cache = %self.name, %failure, "Listener failed");
                }
                Vec::new()
            }
        }
    }
}
