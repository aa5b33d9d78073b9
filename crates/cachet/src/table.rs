//! Entry table: the authoritative key -> value mapping of one cache
//!
//! Keys are spread over shards by an ahash hasher; each shard is a
//! `RwLock<HashMap>`, so every single-key operation is atomic and readers of
//! one shard never see a partial write. A slot either holds a live value or a
//! "not found" marker left by a read-through load that came back empty.

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

use ahash::RandomState;
use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Slot {
    Value(Vec<u8>),
    NotFound,
}

impl Slot {
    fn into_value(self) -> Option<Vec<u8>> {
        match self {
            Slot::Value(value) => Some(value),
            Slot::NotFound => None,
        }
    }
}

/// Result of probing the table without consulting a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Lookup {
    Hit(Vec<u8>),
    /// A previous load found nothing
    NotFound,
    /// Never loaded or written
    Miss,
}

/// Everything needed to undo one committed slot change
#[derive(Debug)]
pub(crate) struct Undo<K> {
    key: K,
    previous: Option<Slot>,
    generation: u64,
}

impl<K> Undo<K> {
    /// The live value the change replaced
    pub(crate) fn previous_value(&self) -> Option<&Vec<u8>> {
        match &self.previous {
            Some(Slot::Value(value)) => Some(value),
            _ => None,
        }
    }
}

struct Shard<K> {
    slots: HashMap<K, Slot, RandomState>,
    /// Bumped by `clear`, so stale undos do not resurrect cleared entries
    generation: u64,
}

/// Sharded in-memory map of entries
pub struct EntryTable<K> {
    shards: Box<[RwLock<Shard<K>>]>,
    hasher: RandomState,
}

impl<K> EntryTable<K>
where
    K: Hash + Eq + Clone,
{
    /// Create a table with `shards` shards (at least one)
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| {
                RwLock::new(Shard {
                    slots: HashMap::with_hasher(RandomState::new()),
                    generation: 0,
                })
            })
            .collect();

        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, key: &K) -> &RwLock<Shard<K>> {
        let idx = self.hasher.hash_one(key) as usize % self.shards.len();
        &self.shards[idx]
    }

    /// Live value for `key`
    pub fn get(&self, key: &K) -> Option<Vec<u8>> {
        match self.shard(key).read().slots.get(key) {
            Some(Slot::Value(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Whether `key` holds a live value
    pub fn contains_key(&self, key: &K) -> bool {
        matches!(self.shard(key).read().slots.get(key), Some(Slot::Value(_)))
    }

    /// Store `value`, returning the live value it replaced
    pub fn put(&self, key: K, value: Vec<u8>) -> Option<Vec<u8>> {
        self.commit(key, Slot::Value(value)).previous.and_then(Slot::into_value)
    }

    /// Remove `key`, returning its live value
    pub fn remove(&self, key: &K) -> Option<Vec<u8>> {
        self.commit_remove(key).previous.and_then(Slot::into_value)
    }

    /// Visit a snapshot of the live entries.
    ///
    /// Each shard is copied under its read lock and visited after the lock is
    /// released, so `f` may call back into the table. Mutations racing with
    /// the walk may or may not be seen, shard by shard.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &[u8]),
    {
        for shard in self.shards.iter() {
            let entries = Self::live_entries(&shard.read());
            for (key, value) in entries {
                f(&key, &value);
            }
        }
    }

    /// Copy of the live entries, built shard by shard
    pub fn snapshot(&self) -> Vec<(K, Vec<u8>)> {
        self.shards
            .iter()
            .flat_map(|shard| Self::live_entries(&shard.read()))
            .collect()
    }

    fn live_entries(shard: &Shard<K>) -> Vec<(K, Vec<u8>)> {
        shard
            .slots
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Value(value) => Some((key.clone(), value.clone())),
                Slot::NotFound => None,
            })
            .collect()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .read()
                    .slots
                    .values()
                    .filter(|slot| matches!(slot, Slot::Value(_)))
                    .count()
            })
            .sum()
    }

    /// Check if the table has no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every slot, including not-found markers
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            let mut shard = shard.write();
            shard.slots.clear();
            shard.generation += 1;
        }
    }

    pub(crate) fn lookup(&self, key: &K) -> Lookup {
        match self.shard(key).read().slots.get(key) {
            Some(Slot::Value(value)) => Lookup::Hit(value.clone()),
            Some(Slot::NotFound) => Lookup::NotFound,
            None => Lookup::Miss,
        }
    }

    /// Record the outcome of a read-through load
    pub(crate) fn fill(&self, key: K, loaded: Option<Vec<u8>>) {
        let slot = match loaded {
            Some(value) => Slot::Value(value),
            None => Slot::NotFound,
        };
        self.shard(&key).write().slots.insert(key, slot);
    }

    pub(crate) fn commit(&self, key: K, slot: Slot) -> Undo<K> {
        let mut shard = self.shard(&key).write();
        let generation = shard.generation;
        let previous = shard.slots.insert(key.clone(), slot);
        Undo {
            key,
            previous,
            generation,
        }
    }

    pub(crate) fn commit_value(&self, key: K, value: Vec<u8>) -> Undo<K> {
        self.commit(key, Slot::Value(value))
    }

    pub(crate) fn commit_remove(&self, key: &K) -> Undo<K> {
        let mut shard = self.shard(key).write();
        let generation = shard.generation;
        let previous = shard.slots.remove(key);
        Undo {
            key: key.clone(),
            previous,
            generation,
        }
    }

    /// Put back the slot an undo captured. Returns false when a `clear`
    /// happened in between, in which case the cleared state stands.
    pub(crate) fn rollback(&self, undo: Undo<K>) -> bool {
        let mut shard = self.shard(&undo.key).write();
        if shard.generation != undo.generation {
            return false;
        }
        match undo.previous {
            Some(slot) => {
                shard.slots.insert(undo.key, slot);
            }
            None => {
                shard.slots.remove(&undo.key);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let table = EntryTable::new(4);

        assert_eq!(table.put("k", b"v1".to_vec()), None);
        assert_eq!(table.put("k", b"v2".to_vec()), Some(b"v1".to_vec()));
        assert_eq!(table.get(&"k"), Some(b"v2".to_vec()));
        assert!(table.contains_key(&"k"));

        assert_eq!(table.remove(&"k"), Some(b"v2".to_vec()));
        assert_eq!(table.remove(&"k"), None);
        assert_eq!(table.get(&"k"), None);
    }

    #[test]
    fn test_not_found_marker_is_not_live() {
        let table = EntryTable::new(4);

        table.fill("gone", None);
        assert_eq!(table.lookup(&"gone"), Lookup::NotFound);
        assert_eq!(table.lookup(&"never"), Lookup::Miss);
        assert_eq!(table.get(&"gone"), None);
        assert!(!table.contains_key(&"gone"));
        assert_eq!(table.len(), 0);

        // Writing over a marker reports no previous value
        assert_eq!(table.put("gone", b"v".to_vec()), None);
        assert_eq!(table.lookup(&"gone"), Lookup::Hit(b"v".to_vec()));
    }

    #[test]
    fn test_rollback_restores_previous() {
        let table = EntryTable::new(4);
        table.put("k", b"old".to_vec());

        let undo = table.commit_value("k", b"new".to_vec());
        assert_eq!(undo.previous_value(), Some(&b"old".to_vec()));
        assert!(table.rollback(undo));
        assert_eq!(table.get(&"k"), Some(b"old".to_vec()));

        let undo = table.commit_value("fresh", b"v".to_vec());
        assert!(table.rollback(undo));
        assert_eq!(table.lookup(&"fresh"), Lookup::Miss);

        let undo = table.commit_remove(&"k");
        assert!(table.rollback(undo));
        assert_eq!(table.get(&"k"), Some(b"old".to_vec()));
    }

    #[test]
    fn test_rollback_after_clear_is_skipped() {
        let table = EntryTable::new(2);
        table.put("k", b"old".to_vec());

        let undo = table.commit_value("k", b"new".to_vec());
        table.clear();

        assert!(!table.rollback(undo));
        assert_eq!(table.get(&"k"), None);
    }

    #[test]
    fn test_snapshot_and_for_each() {
        let table = EntryTable::new(3);
        for i in 0..10u32 {
            table.put(i, vec![i as u8]);
        }
        table.fill(99, None);

        let mut snapshot = table.snapshot();
        snapshot.sort();
        assert_eq!(snapshot.len(), 10);
        assert_eq!(snapshot[3], (3, vec![3]));

        let mut seen = 0;
        table.for_each(|key, value| {
            assert_eq!(value, &[*key as u8]);
            // Re-entrant access must not deadlock
            table.remove(key);
            seen += 1;
        });
        assert_eq!(seen, 10);
        assert!(table.is_empty());
    }

    #[test]
    fn test_clear_drops_markers() {
        let table = EntryTable::new(2);
        table.put("a", b"1".to_vec());
        table.fill("b", None);

        table.clear();

        assert_eq!(table.lookup(&"a"), Lookup::Miss);
        assert_eq!(table.lookup(&"b"), Lookup::Miss);
    }
}
