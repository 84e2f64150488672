use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use memkvcache::{SimpleLru, Storage, StripedLru};
use std::sync::Arc;
use std::thread;

fn bench_simple_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("simple_get");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_hit_1kb", |b| {
        let mut cache = SimpleLru::new(1024 * 1024);
        let data = vec![b'x'; 1024];
        let keys: Vec<String> = (0..100).map(|i| format!("key{}", i)).collect();
        for key in &keys {
            cache.put(key.as_bytes(), &data);
        }

        let mut counter = 0;
        b.iter(|| {
            black_box(cache.get(keys[counter % 100].as_bytes()));
            counter += 1;
        });
    });

    group.finish();
}

fn bench_eviction_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("eviction");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_evicting_1kb", |b| {
        // Small budget so every put past the first few evicts
        let mut cache = SimpleLru::new(16 * 1024);
        let data = vec![b'x'; 1024];

        let mut counter = 0u64;
        b.iter(|| {
            let key = counter.to_le_bytes();
            black_box(cache.put(&key, &data));
            counter += 1;
        });
    });

    group.finish();
}

fn bench_striped_mixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("striped");
    group.sample_size(20);
    group.throughput(Throughput::Elements(4 * 1000));

    group.bench_function("4_threads_50_read_50_write", |b| {
        let cache = Arc::new(StripedLru::new(4 * 1024 * 1024, 16).unwrap());
        let data = vec![b'x'; 128];

        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let cache = Arc::clone(&cache);
                    let data = data.clone();
                    thread::spawn(move || {
                        for i in 0..1000u32 {
                            let key = format!("{}:{}", t, i % 200);
                            if i % 2 == 0 {
                                black_box(cache.get(key.as_bytes()));
                            } else {
                                black_box(cache.put(key.as_bytes(), &data));
                            }
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_simple_get,
    bench_eviction_churn,
    bench_striped_mixed
);
criterion_main!(benches);
