//! Throughput benchmarks for the storage engine, the eviction path and the
//! RESP codec.

use bytes::Bytes;
use cinderkv::protocol::{RespParser, RespValue};
use cinderkv::storage::{EvictionConfig, EvictionPolicy, Evictor, StorageEngine};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;

fn populate(engine: &StorageEngine, count: u64) {
    for i in 0..count {
        engine.set(
            Bytes::from(format!("key:{}", i)),
            Bytes::from(format!("value:{}", i)),
        );
    }
}

fn bench_set(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        let value = Bytes::from_static(b"small_value");
        b.iter(|| {
            engine.set(Bytes::from(format!("key:{}", i)), value.clone());
            i += 1;
        });
    });

    group.bench_function("overwrite_1kb", |b| {
        let mut i = 0u64;
        let value = Bytes::from(vec![b'x'; 1024]);
        b.iter(|| {
            engine.set(Bytes::from(format!("hot:{}", i % 1_000)), value.clone());
            i += 1;
        });
    });

    group.bench_function("set_with_ttl", |b| {
        let mut i = 0u64;
        b.iter(|| {
            engine.set_with_ttl(
                Bytes::from(format!("ttl:{}", i)),
                Bytes::from_static(b"value"),
                Duration::from_secs(3600),
            );
            i += 1;
        });
    });

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());
    populate(&engine, 100_000);

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(engine.get(key.as_bytes()));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(engine.get(key.as_bytes()));
            i += 1;
        });
    });

    group.finish();
}

/// 80% reads, 20% writes
fn bench_mixed(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());
    populate(&engine, 10_000);

    let mut group = c.benchmark_group("mixed");
    group.throughput(Throughput::Elements(1));

    group.bench_function("80_read_20_write", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 10_000);
            if i % 5 == 0 {
                engine.set(Bytes::from(key), Bytes::from_static(b"value"));
            } else {
                black_box(engine.get(key.as_bytes()));
            }
            i += 1;
        });
    });

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_mixed", |b| {
        b.iter(|| {
            let engine = Arc::new(StorageEngine::new());
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let engine = Arc::clone(&engine);
                    thread::spawn(move || {
                        for i in 0..10_000 {
                            let key = Bytes::from(format!("key:{}:{}", t, i));
                            engine.set(key.clone(), Bytes::from_static(b"value"));
                            engine.get(&key);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(engine.memory_used());
        });
    });

    group.finish();
}

/// Writes against a full store, so every SET pays for one eviction.
fn bench_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("eviction");
    group.throughput(Throughput::Elements(1));

    for policy in [
        EvictionPolicy::AllKeysRandom,
        EvictionPolicy::AllKeysLru,
        EvictionPolicy::AllKeysLfu,
    ] {
        let engine = Arc::new(StorageEngine::new());
        populate(&engine, 10_000);
        let evictor = Evictor::with_rng(
            Arc::clone(&engine),
            EvictionConfig {
                max_memory: engine.memory_used(),
                policy,
                samples: 5,
            },
            StdRng::seed_from_u64(7),
        );

        group.bench_function(policy.as_str(), |b| {
            let mut i = 0u64;
            b.iter(|| {
                let key = Bytes::from(format!("new:{:08}", i));
                let value = Bytes::from_static(b"value:xxxx");
                let growth = engine.estimate_growth(&key, value.len());
                if evictor.make_room(growth, &[&key]).is_ok() {
                    engine.set(key, value);
                }
                i += 1;
            });
        });
    }

    group.finish();
}

fn bench_sample(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());
    populate(&engine, 100_000);
    let mut rng = StdRng::seed_from_u64(1);

    c.bench_function("sample_5_of_100k", |b| {
        b.iter(|| black_box(engine.sample(5, &mut rng)));
    });
}

fn bench_protocol(c: &mut Criterion) {
    let mut group = c.benchmark_group("protocol");
    group.throughput(Throughput::Elements(1));

    let request = RespValue::array(vec![
        RespValue::bulk_string(Bytes::from_static(b"SET")),
        RespValue::bulk_string(Bytes::from_static(b"user:1000")),
        RespValue::bulk_string(Bytes::from(vec![b'x'; 256])),
    ])
    .serialize();

    group.bench_function("parse_set_request", |b| {
        let mut parser = RespParser::new();
        b.iter(|| black_box(parser.parse_request(&request).unwrap()));
    });

    let reply = RespValue::bulk_string(Bytes::from(vec![b'x'; 256]));
    group.bench_function("serialize_bulk_reply", |b| {
        b.iter(|| black_box(reply.serialize()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_mixed,
    bench_concurrent,
    bench_eviction,
    bench_sample,
    bench_protocol,
);

criterion_main!(benches);
