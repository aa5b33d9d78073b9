//! Per-key mutual exclusion
//!
//! Each shard tracks the keys currently held and which thread holds them. A
//! thread that wants a key held by another thread waits on the shard's
//! condition variable until the holder releases it. The holding thread may
//! lock the key again, so a listener running under the lock can read the key
//! it is notified about. Keys that hash to the same shard only contend on the
//! short map update, never on each other's critical sections.

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::thread::{self, ThreadId};

use ahash::RandomState;
use parking_lot::{Condvar, Mutex};

struct Holder {
    thread: ThreadId,
    depth: usize,
}

struct LockShard<K> {
    held: Mutex<HashMap<K, Holder, RandomState>>,
    released: Condvar,
}

/// Lock table handing out one exclusive guard per key
pub(crate) struct KeyLocks<K> {
    shards: Box<[LockShard<K>]>,
    hasher: RandomState,
}

impl<K> KeyLocks<K>
where
    K: Hash + Eq + Clone,
{
    pub(crate) fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| LockShard {
                held: Mutex::new(HashMap::with_hasher(RandomState::new())),
                released: Condvar::new(),
            })
            .collect();

        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, key: &K) -> &LockShard<K> {
        let idx = self.hasher.hash_one(key) as usize % self.shards.len();
        &self.shards[idx]
    }

    /// Block until `key` is free or already held by this thread, then hold
    /// it until the guard drops
    pub(crate) fn lock(&self, key: &K) -> KeyGuard<'_, K> {
        let shard = self.shard(key);
        let me = thread::current().id();
        let mut held = shard.held.lock();
        loop {
            let owner = held.get(key).map(|holder| holder.thread);
            match owner {
                Some(owner) if owner == me => {
                    if let Some(holder) = held.get_mut(key) {
                        holder.depth += 1;
                    }
                    break;
                }
                Some(_) => shard.released.wait(&mut held),
                None => {
                    held.insert(key.clone(), Holder { thread: me, depth: 1 });
                    break;
                }
            }
        }

        KeyGuard {
            shard,
            key: key.clone(),
        }
    }

    /// Lock several keys. Callers pass keys in ascending order so that
    /// concurrent multi-key operations cannot deadlock.
    pub(crate) fn lock_sorted<'a, I>(&self, keys: I) -> Vec<KeyGuard<'_, K>>
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        keys.into_iter().map(|key| self.lock(key)).collect()
    }

    #[cfg(test)]
    pub(crate) fn is_locked(&self, key: &K) -> bool {
        self.shard(key).held.lock().contains_key(key)
    }
}

/// Holds one key; releasing the outermost guard wakes waiters on the shard
pub(crate) struct KeyGuard<'a, K: Hash + Eq> {
    shard: &'a LockShard<K>,
    key: K,
}

impl<K: Hash + Eq> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        let mut held = self.shard.held.lock();
        let released = match held.get_mut(&self.key) {
            Some(holder) if holder.depth > 1 => {
                holder.depth -= 1;
                false
            }
            _ => true,
        };

        if released {
            held.remove(&self.key);
            drop(held);
            self.shard.released.notify_all();
        }
    }
}
