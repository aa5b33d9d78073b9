//! The demo walk-through

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{ensure, Result};
use cachet::{
    Argument, Cache, CacheConfig, CacheLoader, CacheManager, CacheSettings, CacheWriter,
    CreateOrGet, EntryEvent, EventKind, EventKinds, ListenerBinding, ListenerError,
};
use tracing::info;

/// Knobs for one demo run
#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub settings: CacheSettings,
    pub workers: usize,
    pub increments: u64,
}

/// What a run produced, for callers that want to check it
#[derive(Debug)]
pub struct DemoReport {
    pub processed: Vec<String>,
    pub counter: u64,
    pub events: usize,
}

/// Reads from the store, falling back to a synthesized record
struct DemoLoader<S> {
    store: Arc<S>,
}

impl<S: CacheLoader<String>> CacheLoader<String> for DemoLoader<S> {
    fn load(&self, key: &String) -> cachetdb::Result<Option<Vec<u8>>> {
        let value = self
            .store
            .load(key)?
            .unwrap_or_else(|| format!("DB data for key {}", key).into_bytes());
        Ok(Some(value))
    }
}

/// Logs every mutation before handing it to the store
struct LoggingWriter<S> {
    store: Arc<S>,
}

impl<S: CacheWriter<String>> CacheWriter<String> for LoggingWriter<S> {
    fn write(&self, key: &String, value: &[u8]) -> cachetdb::Result<()> {
        info!(key = %key, value = %String::from_utf8_lossy(value), "Writing to store");
        self.store.write(key, value)
    }

    fn delete(&self, key: &String) -> cachetdb::Result<()> {
        info!(key = %key, "Deleting from store");
        self.store.delete(key)
    }
}

fn logging_listener(kind: EventKind, events: &[EntryEvent<String>]) -> Result<(), ListenerError> {
    for event in events {
        info!(
            kind = %kind,
            key = %event.key,
            old = ?event.old_value.as_deref().map(String::from_utf8_lossy),
            value = ?event.value.as_deref().map(String::from_utf8_lossy),
            "Entry event"
        );
    }
    Ok(())
}

fn text(value: &[u8]) -> String {
    String::from_utf8_lossy(value).into_owned()
}

/// Run the walk-through against `store`
pub fn run<S>(store: Arc<S>, options: &DemoOptions) -> Result<DemoReport>
where
    S: CacheLoader<String> + CacheWriter<String> + 'static,
{
    let manager = CacheManager::<String>::new();

    let events = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&events);

    let config = CacheConfig::from_settings(options.settings.clone())
        .read_through(DemoLoader {
            store: Arc::clone(&store),
        })
        .write_through(LoggingWriter {
            store: Arc::clone(&store),
        })
        .listener(ListenerBinding::new(
            logging_listener,
            EventKinds::CREATED | EventKinds::UPDATED,
        ))
        .listener(
            ListenerBinding::new(
                move |_: EventKind, batch: &[EntryEvent<String>]| -> Result<(), ListenerError> {
                    counted.fetch_add(batch.len(), Ordering::Relaxed);
                    Ok(())
                },
                EventKinds::ALL,
            )
            .synchronous(false),
        );
    let cache = manager.create_cache("demo", config)?;

    let missing = cache.get(&"nonexistent".to_string())?;
    println!("get(nonexistent) = {:?}", missing.as_deref().map(text));

    cache.put("key1".to_string(), "value1")?.into_value();
    cache.put("key2".to_string(), "value2")?.into_value();

    let mut processed = Vec::new();
    for i in 1..=3 {
        let key = format!("key{}", i);
        let args = [Argument::from(format!("New{}", i).into_bytes())];
        let value = cache.invoke(key.clone(), &CreateOrGet, &args)?.into_value();
        println!("invoke({}, CreateOrGet, New{}) = {}", key, i, text(&value));
        processed.push(text(&value));
    }

    println!("Cache contents:");
    let mut entries = cache.entries()?;
    entries.sort();
    for (key, value) in &entries {
        println!("  {} => {}", key, text(value));
    }

    let counter = increment_run(&manager, &store, options)?;

    let stats = cache.stats();
    println!(
        "Stats: hits={} misses={} loads={} writes={} hit_ratio={:.2}",
        stats.hits(),
        stats.misses(),
        stats.loads(),
        stats.writes(),
        stats.hit_ratio()
    );

    manager.close();

    Ok(DemoReport {
        processed,
        counter,
        events: events.load(Ordering::Relaxed),
    })
}

fn parse_counter(value: &[u8]) -> u64 {
    String::from_utf8_lossy(value).parse().unwrap_or(0)
}

/// Workers bump one counter through `invoke`; the total must come out exact
fn increment_run<S>(manager: &CacheManager<String>, store: &Arc<S>, options: &DemoOptions) -> Result<u64>
where
    S: CacheLoader<String> + CacheWriter<String> + 'static,
{
    let config = CacheConfig::from_settings(options.settings.clone())
        .read_through_shared(store.clone())
        .write_through_shared(store.clone());
    let cache: Arc<Cache<String>> = manager.create_cache("counters", config)?;
    let key = "counter".to_string();

    let start = cache
        .get(&key)?
        .as_deref()
        .map(parse_counter)
        .unwrap_or(0);

    info!(workers = options.workers, increments = options.increments, "Starting increment run");
    thread::scope(|scope| -> Result<()> {
        let handles: Vec<_> = (0..options.workers)
            .map(|_| {
                scope.spawn(|| -> Result<()> {
                    for _ in 0..options.increments {
                        cache
                            .invoke_with(key.clone(), |entry| {
                                let next = entry.value().map(parse_counter).unwrap_or(0) + 1;
                                entry.set_value(next.to_string());
                                Ok(next)
                            })?
                            .into_value();
                    }
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("increment worker panicked"))??;
        }
        Ok(())
    })?;

    let total = cache.get(&key)?.as_deref().map(parse_counter).unwrap_or(0);
    let expected = start + options.workers as u64 * options.increments;
    ensure!(total == expected, "counter is {} after the run, expected {}", total, expected);
    println!("counter = {} ({} workers x {} increments)", total, options.workers, options.increments);

    Ok(total)
}
