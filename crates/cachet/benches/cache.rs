use std::sync::Arc;

use cachet::{Argument, Cache, CacheConfig, CreateOrGet, LogStore, MemoryStore};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tempfile::TempDir;

fn keys() -> Vec<String> {
    (0..100).map(|i| format!("key{}", i)).collect()
}

fn bench_cached_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_get");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_1kb_cached", |b| {
        let cache = Cache::new("bench", CacheConfig::new()).unwrap();
        let data = vec![b'x'; 1024];
        let keys = keys();

        for key in &keys {
            cache.put(key.clone(), data.clone()).unwrap().into_value();
        }

        let mut counter = 0;
        b.iter(|| {
            black_box(cache.get(&keys[counter % 100]).unwrap());
            counter += 1;
        });
    });

    group.finish();
}

fn bench_mixed_50_50(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("50_read_50_write_through", |b| {
        let store = Arc::new(MemoryStore::<String>::new());
        let config = CacheConfig::new()
            .read_through_shared(store.clone())
            .write_through_shared(store);
        let cache = Cache::new("bench", config).unwrap();
        let data = vec![b'x'; 1024];
        let keys = keys();

        let mut counter = 0usize;
        b.iter(|| {
            let key = &keys[counter % 100];
            if counter.is_multiple_of(2) {
                black_box(cache.get(key).ok());
            } else {
                black_box(cache.put(key.clone(), data.clone()).ok());
            }
            counter += 1;
        });
    });

    group.bench_function("50_read_50_write_log_store", |b| {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LogStore::open(dir.path()).unwrap());
        let config = CacheConfig::new()
            .read_through_shared(store.clone())
            .write_through_shared(store);
        let cache = Cache::new("bench", config).unwrap();
        let data = vec![b'x'; 1024];
        let keys = keys();

        let mut counter = 0usize;
        b.iter(|| {
            let key = &keys[counter % 100];
            if counter.is_multiple_of(2) {
                black_box(cache.get(key).ok());
            } else {
                black_box(cache.put(key.clone(), data.clone()).ok());
            }
            counter += 1;
        });
    });

    group.finish();
}

fn bench_invoke(c: &mut Criterion) {
    let mut group = c.benchmark_group("invoke");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("create_or_get_existing", |b| {
        let cache = Cache::new("bench", CacheConfig::new()).unwrap();
        let keys = keys();
        let args = [Argument::from(b"initial".to_vec())];

        for key in &keys {
            cache.put(key.clone(), "value").unwrap().into_value();
        }

        let mut counter = 0;
        b.iter(|| {
            black_box(cache.invoke(keys[counter % 100].clone(), &CreateOrGet, &args).unwrap());
            counter += 1;
        });
    });

    group.bench_function("increment", |b| {
        let cache = Cache::new("bench", CacheConfig::new()).unwrap();

        b.iter(|| {
            black_box(
                cache
                    .invoke_with("counter".to_string(), |entry| {
                        let n = entry
                            .value()
                            .and_then(|v| v.try_into().ok())
                            .map(u64::from_le_bytes)
                            .unwrap_or(0);
                        entry.set_value((n + 1).to_le_bytes().to_vec());
                        Ok(n + 1)
                    })
                    .unwrap(),
            );
        });
    });

    group.finish();
}

criterion_group!(benches, bench_cached_get, bench_mixed_50_50, bench_invoke);
criterion_main!(benches);
