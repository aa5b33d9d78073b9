//! Loader and writer contracts between a cache and its system of record

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::Result;

/// Reads values from a system of record on a cache miss.
///
/// Returning `Ok(None)` means the system of record has no value for the key.
/// An unreachable store must return an error instead, so the cache never
/// mistakes an outage for a missing key.
pub trait CacheLoader<K>: Send + Sync {
    /// Load the value stored for `key`
    fn load(&self, key: &K) -> Result<Option<Vec<u8>>>;

    /// Load several keys at once. Keys without a value are left out of the map.
    fn load_all(&self, keys: &[K]) -> Result<HashMap<K, Vec<u8>>>
    where
        K: Hash + Eq + Clone,
    {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.load(key)? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }
}

impl<K, F> CacheLoader<K> for F
where
    F: Fn(&K) -> Result<Option<Vec<u8>>> + Send + Sync,
{
    fn load(&self, key: &K) -> Result<Option<Vec<u8>>> {
        self(key)
    }
}

/// Propagates committed cache mutations to a system of record.
pub trait CacheWriter<K>: Send + Sync {
    /// Persist one value
    fn write(&self, key: &K, value: &[u8]) -> Result<()>;

    /// Persist a batch of values
    fn write_all(&self, entries: &[(K, Vec<u8>)]) -> Result<()> {
        for (key, value) in entries {
            self.write(key, value)?;
        }
        Ok(())
    }

    /// Delete one key
    fn delete(&self, key: &K) -> Result<()>;

    /// Delete a batch of keys
    fn delete_all(&self, keys: &[K]) -> Result<()> {
        for key in keys {
            self.delete(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        ops: Mutex<Vec<String>>,
    }

    impl CacheWriter<String> for Recorder {
        fn write(&self, key: &String, value: &[u8]) -> Result<()> {
            if key == "poison" {
                return Err(StoreError::rejected(key, "poisoned key"));
            }
            self.ops
                .lock()
                .push(format!("write {}={}", key, String::from_utf8_lossy(value)));
            Ok(())
        }

        fn delete(&self, key: &String) -> Result<()> {
            self.ops.lock().push(format!("delete {}", key));
            Ok(())
        }
    }

    #[test]
    fn test_closure_loader() {
        let loader = |key: &String| -> Result<Option<Vec<u8>>> {
            Ok(Some(format!("DB:{}", key).into_bytes()))
        };
        assert_eq!(loader.load(&"a".to_string()).unwrap(), Some(b"DB:a".to_vec()));
    }

    #[test]
    fn test_default_load_all_skips_missing() {
        let loader = |key: &String| -> Result<Option<Vec<u8>>> {
            if key.starts_with('x') {
                Ok(None)
            } else {
                Ok(Some(key.as_bytes().to_vec()))
            }
        };

        let keys = vec!["a".to_string(), "xb".to_string(), "c".to_string()];
        let found = loader.load_all(&keys).unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found["a"], b"a");
        assert!(!found.contains_key("xb"));
    }

    #[test]
    fn test_default_load_all_propagates_failure() {
        let loader = |key: &String| -> Result<Option<Vec<u8>>> {
            if key == "down" {
                Err(StoreError::unavailable("db offline"))
            } else {
                Ok(None)
            }
        };

        let keys = vec!["a".to_string(), "down".to_string()];
        assert!(matches!(
            loader.load_all(&keys),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn test_default_batches_delegate_in_order() {
        let writer = Recorder::default();
        writer
            .write_all(&[
                ("k1".to_string(), b"v1".to_vec()),
                ("k2".to_string(), b"v2".to_vec()),
            ])
            .unwrap();
        writer
            .delete_all(&["k1".to_string(), "k2".to_string()])
            .unwrap();

        assert_eq!(
            *writer.ops.lock(),
            vec!["write k1=v1", "write k2=v2", "delete k1", "delete k2"]
        );
    }

    #[test]
    fn test_write_all_stops_at_first_failure() {
        let writer = Recorder::default();
        let result = writer.write_all(&[
            ("k1".to_string(), b"v1".to_vec()),
            ("poison".to_string(), b"v2".to_vec()),
            ("k3".to_string(), b"v3".to_vec()),
        ]);

        assert!(matches!(result, Err(StoreError::Rejected { .. })));
        assert_eq!(*writer.ops.lock(), vec!["write k1=v1"]);
    }
}
