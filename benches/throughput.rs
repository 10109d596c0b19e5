//! Throughput Benchmark for SlashKV
//!
//! Measures the concurrent map, its growth path, and the snapshot codec.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use slashkv::protocol::parse_frame;
use slashkv::pubsub::{Pattern, PubSub};
use slashkv::storage::{ConcurrentMap, Key};
use std::sync::Arc;
use std::time::Duration;

fn populated(n: u64) -> ConcurrentMap {
    let map = ConcurrentMap::new();
    for i in 0..n {
        map.set(
            Key::from(format!("key:{}", i)),
            Bytes::from(format!("value:{}", i)),
        );
    }
    map
}

/// Benchmark SET operations
fn bench_set(c: &mut Criterion) {
    let map = Arc::new(ConcurrentMap::new());

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_text_key", |b| {
        let mut i = 0u64;
        b.iter(|| {
            map.set(Key::from(format!("key:{}", i)), Bytes::from("small_value"));
            i += 1;
        });
    });

    group.bench_function("set_uint_key", |b| {
        let mut i = 0u64;
        b.iter(|| {
            map.set(Key::UInt(i), Bytes::from("small_value"));
            i += 1;
        });
    });

    group.bench_function("overwrite_1k", |b| {
        let value = Bytes::from("x".repeat(1024));
        let mut i = 0u64;
        b.iter(|| {
            map.set(Key::UInt(i % 1_000), value.clone());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark GET operations
fn bench_get(c: &mut Criterion) {
    let map = populated(100_000);

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(map.get(&Key::from(format!("key:{}", i % 100_000))));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(map.get(&Key::from(format!("missing:{}", i))));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark mixed workload (80% reads, 20% writes)
fn bench_mixed(c: &mut Criterion) {
    let map = populated(10_000);

    let mut group = c.benchmark_group("mixed");
    group.throughput(Throughput::Elements(1));

    group.bench_function("80_read_20_write", |b| {
        let mut i = 0u64;
        b.iter(|| {
            if i % 5 == 0 {
                map.set(Key::from(format!("new:{}", i)), Bytes::from("value"));
            } else {
                black_box(map.get(&Key::from(format!("key:{}", i % 10_000))));
            }
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark growth from the initial 16 shards
fn bench_resize(c: &mut Criterion) {
    let mut group = c.benchmark_group("resize");
    group.throughput(Throughput::Elements(100_000));

    group.bench_function("grow_to_100k", |b| {
        b.iter(|| black_box(populated(100_000).capacity()));
    });

    group.bench_function("mset_100k", |b| {
        b.iter_batched(
            || {
                let keys: Vec<Key> = (0..100_000u64).map(Key::UInt).collect();
                let values = vec![Bytes::from("v"); 100_000];
                (keys, values)
            },
            |(keys, values)| {
                let map = ConcurrentMap::new();
                black_box(map.mset(keys, values).map(|previous| previous.len()))
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

/// Benchmark concurrent access
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_mixed", |b| {
        b.iter(|| {
            let map = Arc::new(ConcurrentMap::new());
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let map = Arc::clone(&map);
                    thread::spawn(move || {
                        for i in 0..10_000 {
                            let key = Key::from(format!("key:{}:{}", t, i));
                            map.set(key.clone(), Bytes::from("value"));
                            map.get(&key);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(map.len());
        });
    });

    group.finish();
}

/// Benchmark the snapshot codec
fn bench_snapshot(c: &mut Criterion) {
    let map = populated(50_000);
    let encoded = map.serialize().unwrap();
    let json = map.to_json().unwrap();

    let mut group = c.benchmark_group("snapshot");
    group.throughput(Throughput::Elements(50_000));

    group.bench_function("serialize", |b| {
        b.iter(|| black_box(map.serialize().unwrap()));
    });

    group.bench_function("deserialize", |b| {
        b.iter(|| black_box(ConcurrentMap::deserialize(&encoded).unwrap().len()));
    });

    group.bench_function("from_json", |b| {
        b.iter(|| black_box(ConcurrentMap::from_json(json.as_bytes()).unwrap().len()));
    });

    group.finish();
}

/// Benchmark RESP parsing and pub/sub fan-out
fn bench_wire(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire");

    let set = b"*3\r\n$3\r\nSET\r\n$8\r\nuser:101\r\n$4\r\nAriz\r\n";
    group.bench_function("parse_set", |b| {
        b.iter(|| black_box(parse_frame(set).unwrap()));
    });

    let pubsub = PubSub::new();
    let mut receivers = Vec::new();
    for client in 0..64 {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        pubsub.psubscribe(client, Pattern::new("news.*"), &tx);
        receivers.push(rx);
    }
    // Queues stay full after the first publish, so this measures the
    // match-and-drop path.
    let channel = Bytes::from("news.sports");
    let payload = Bytes::from("goal");
    group.bench_function("publish_64_patterns", |b| {
        b.iter(|| black_box(pubsub.publish(&channel, &payload)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_mixed,
    bench_resize,
    bench_concurrent,
    bench_snapshot,
    bench_wire,
);

criterion_main!(benches);
