//! End-to-end behavior of a cache wired to a store

use std::sync::Arc;
use std::thread;

use cachet::{
    Append, Argument, Cache, CacheConfig, CacheError, CreateOrGet, EntryEvent, EventKind,
    EventKinds, ListenerBinding, ListenerError, LogStore, MemoryStore, StoreError,
};
use parking_lot::Mutex;
use tempfile::TempDir;

type Received = Arc<Mutex<Vec<(String, EventKind, String, Option<Vec<u8>>, Option<Vec<u8>>)>>>;

fn recording(name: &'static str, received: &Received) -> ListenerBinding<String> {
    let received = Arc::clone(received);
    ListenerBinding::new(
        move |kind: EventKind, events: &[EntryEvent<String>]| -> Result<(), ListenerError> {
            for event in events {
                received.lock().push((
                    name.to_string(),
                    kind,
                    event.key.clone(),
                    event.old_value.clone(),
                    event.value.clone(),
                ));
            }
            Ok(())
        },
        EventKinds::ALL,
    )
}

fn db_loader(key: &String) -> Result<Option<Vec<u8>>, StoreError> {
    Ok(Some(format!("DB data for key {}", key).into_bytes()))
}

#[test]
fn test_read_through_put_and_processors() {
    let cache = Cache::new("scenario", CacheConfig::new().read_through(db_loader)).unwrap();
    let x = "X".to_string();

    assert_eq!(cache.get(&x).unwrap(), Some(b"DB data for key X".to_vec()));

    cache.put(x.clone(), "hello").unwrap().into_value();
    assert_eq!(cache.get(&x).unwrap(), Some(b"hello".to_vec()));

    let appended = cache
        .invoke(x.clone(), &Append, &[Argument::from("!")])
        .unwrap()
        .into_value();
    assert_eq!(appended, b"hello!");
    assert_eq!(cache.get(&x).unwrap(), Some(b"hello!".to_vec()));

    let y = "Y".to_string();
    let result = cache.invoke(y.clone(), &CreateOrGet, &[]);
    assert!(matches!(result, Err(CacheError::Processing { .. })));
    assert!(!cache.contains_key(&y).unwrap());
}

#[test]
fn test_create_or_get_round() {
    let store = Arc::new(MemoryStore::<String>::new());
    let config = CacheConfig::new()
        .read_through_shared(store.clone())
        .write_through_shared(store.clone());
    let cache = Cache::new("demo", config).unwrap();
    let received = Received::default();
    cache.register_listener(recording("l", &received)).unwrap();

    assert_eq!(cache.get(&"nonexistent".to_string()).unwrap(), None);
    cache.put("key1".to_string(), "value1").unwrap().into_value();
    cache.put("key2".to_string(), "value2").unwrap().into_value();

    let mut results = Vec::new();
    for i in 1..=3 {
        let value = cache
            .invoke(
                format!("key{}", i),
                &CreateOrGet,
                &[Argument::from(format!("New{}", i).into_bytes())],
            )
            .unwrap()
            .into_value();
        results.push(String::from_utf8(value).unwrap());
    }

    assert_eq!(results, vec!["value1", "value2", "New3"]);
    assert_eq!(store.peek(&"key3".to_string()), Some(b"New3".to_vec()));

    let mut entries = cache.entries().unwrap();
    entries.sort();
    assert_eq!(
        entries,
        vec![
            ("key1".to_string(), b"value1".to_vec()),
            ("key2".to_string(), b"value2".to_vec()),
            ("key3".to_string(), b"New3".to_vec()),
        ]
    );

    let kinds: Vec<_> = received.lock().iter().map(|(_, kind, key, _, _)| (*kind, key.clone())).collect();
    assert_eq!(
        kinds,
        vec![
            (EventKind::Created, "key1".to_string()),
            (EventKind::Created, "key2".to_string()),
            (EventKind::Created, "key3".to_string()),
        ]
    );
}

#[test]
fn test_events_in_registration_order() {
    let cache: Cache<String> = Cache::new("events", CacheConfig::new()).unwrap();
    let received = Received::default();
    cache.register_listener(recording("first", &received)).unwrap();
    cache.register_listener(recording("second", &received)).unwrap();

    cache.put("k".to_string(), "v1").unwrap().into_value();
    cache.put("k".to_string(), "v2").unwrap().into_value();

    let event = |name: &str, kind, old: Option<&[u8]>, new: &[u8]| {
        (
            name.to_string(),
            kind,
            "k".to_string(),
            old.map(<[u8]>::to_vec),
            Some(new.to_vec()),
        )
    };
    let expected = vec![
        event("first", EventKind::Created, None, b"v1"),
        event("second", EventKind::Created, None, b"v1"),
        event("first", EventKind::Updated, Some(&b"v1"[..]), b"v2"),
        event("second", EventKind::Updated, Some(&b"v1"[..]), b"v2"),
    ];

    assert_eq!(*received.lock(), expected);
}

#[test]
fn test_read_through_fill_is_silent() {
    let store = Arc::new(MemoryStore::with_entries([("k".to_string(), "db")]));
    let cache = Cache::new("silent", CacheConfig::new().read_through_shared(store)).unwrap();
    let received = Received::default();
    cache.register_listener(recording("l", &received)).unwrap();

    assert_eq!(cache.get(&"k".to_string()).unwrap(), Some(b"db".to_vec()));
    assert!(received.lock().is_empty());
}

#[test]
fn test_concurrent_increments() {
    const THREADS: usize = 8;
    const PER_THREAD: u64 = 250;

    let store = Arc::new(MemoryStore::<String>::new());
    let config = CacheConfig::new()
        .read_through_shared(store.clone())
        .write_through_shared(store.clone());
    let cache = Cache::new("counter", config).unwrap();
    let key = "counter".to_string();

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for _ in 0..PER_THREAD {
                    cache
                        .invoke_with(key.clone(), |entry| {
                            let n = entry
                                .value()
                                .map(|v| String::from_utf8_lossy(v).parse::<u64>().unwrap_or(0))
                                .unwrap_or(0);
                            entry.set_value((n + 1).to_string());
                            Ok(n + 1)
                        })
                        .unwrap()
                        .into_value();
                }
            });
        }
    });

    let expected = (THREADS as u64 * PER_THREAD).to_string().into_bytes();
    assert_eq!(cache.get(&key).unwrap(), Some(expected.clone()));
    assert_eq!(store.peek(&key), Some(expected));
}

#[test]
fn test_failed_write_keeps_previous_value() {
    let store = Arc::new(MemoryStore::<String>::new());
    let config = CacheConfig::new().write_through_shared(store.clone());
    let cache = Cache::new("rollback", config).unwrap();

    cache.put("k".to_string(), "v1").unwrap().into_value();
    store.set_available(false);

    let result = cache.put("k".to_string(), "v2");
    assert!(matches!(
        result,
        Err(CacheError::StoreWrite {
            source: StoreError::Unavailable(_),
            ..
        })
    ));
    assert_eq!(cache.get(&"k".to_string()).unwrap(), Some(b"v1".to_vec()));
    assert_eq!(store.peek(&"k".to_string()), Some(b"v1".to_vec()));
}

#[test]
fn test_clear_touches_no_store_and_no_listener() {
    let store = Arc::new(MemoryStore::<String>::new());
    let config = CacheConfig::new()
        .read_through_shared(store.clone())
        .write_through_shared(store.clone());
    let cache = Cache::new("clear", config).unwrap();
    cache.put("k".to_string(), "v").unwrap().into_value();

    let received = Received::default();
    cache.register_listener(recording("l", &received)).unwrap();
    let (loads, writes, deletes) = (store.loads(), store.writes(), store.deletes());

    cache.clear().unwrap();

    assert!(received.lock().is_empty());
    assert_eq!((store.loads(), store.writes(), store.deletes()), (loads, writes, deletes));

    // The store still has it, so the next read loads it back
    assert_eq!(cache.get(&"k".to_string()).unwrap(), Some(b"v".to_vec()));
}

#[test]
fn test_listener_failure_does_not_abort_put() {
    let cache: Cache<String> = Cache::new("failing", CacheConfig::new()).unwrap();
    cache
        .register_listener(ListenerBinding::new(
            |_: EventKind, _: &[EntryEvent<String>]| -> Result<(), ListenerError> {
                Err(ListenerError::new("unreachable endpoint"))
            },
            EventKind::Created,
        ))
        .unwrap();

    let outcome = cache.put("k".to_string(), "v").unwrap();

    assert_eq!(outcome.listener_failures().len(), 1);
    assert_eq!(outcome.listener_failures()[0].kind, EventKind::Created);
    assert_eq!(outcome.listener_failures()[0].error.message(), "unreachable endpoint");
    assert_eq!(cache.get(&"k".to_string()).unwrap(), Some(b"v".to_vec()));
}

#[test]
fn test_log_store_backed_cache_survives_restart() {
    let dir = TempDir::new().unwrap();

    {
        let store = Arc::new(LogStore::open(dir.path()).unwrap());
        let config = CacheConfig::new()
            .read_through_shared(store.clone())
            .write_through_shared(store);
        let cache = Cache::new("persistent", config).unwrap();

        cache.put("a".to_string(), "1").unwrap().into_value();
        cache.put("b".to_string(), "2").unwrap().into_value();
        cache.remove(&"a".to_string()).unwrap().into_value();
        cache.close();
    }

    let store = Arc::new(LogStore::open(dir.path()).unwrap());
    let cache = Cache::new("persistent", CacheConfig::new().read_through_shared(store)).unwrap();

    assert_eq!(cache.get(&"a".to_string()).unwrap(), None);
    assert_eq!(cache.get(&"b".to_string()).unwrap(), Some(b"2".to_vec()));
}
