//! Throughput Benchmark for tablekv
//!
//! Measures the storage layer, the argument pipeline and the full command
//! path under various workloads. Storage calls run on a current-thread
//! runtime driven by `block_on`.

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::time::Duration;
use tablekv::commands::{self, CommandHandler};
use tablekv::config::Options;
use tablekv::protocol::frame;
use tablekv::Db;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn open(rt: &Runtime) -> Db {
    rt.block_on(Db::open(Options::memory().without_expiry()))
        .unwrap()
}

fn populate(rt: &Runtime, db: &Db, prefix: &str, n: usize) {
    rt.block_on(db.update(|tx| async move {
        for i in 0..n {
            tx.strings()
                .set(&format!("{}:{}", prefix, i), format!("value:{}", i))
                .await?;
        }
        Ok(())
    }))
    .unwrap();
}

/// Benchmark SET operations
fn bench_set(c: &mut Criterion) {
    let rt = runtime();
    let db = open(&rt);

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            rt.block_on(db.strings().set(&format!("key:{}", i), "small_value"))
                .unwrap();
            i += 1;
        });
    });

    group.bench_function("set_medium", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(1024)); // 1KB value
        b.iter(|| {
            rt.block_on(db.strings().set(&format!("key:{}", i), value.clone()))
                .unwrap();
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark GET operations
fn bench_get(c: &mut Criterion) {
    let rt = runtime();
    let db = open(&rt);
    populate(&rt, &db, "key", 10_000);

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 10_000);
            black_box(rt.block_on(db.strings().get(&key)).unwrap());
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(rt.block_on(db.strings().get(&key)).unwrap());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark INCR operations
fn bench_incr(c: &mut Criterion) {
    let rt = runtime();
    let db = open(&rt);

    let mut group = c.benchmark_group("incr");
    group.throughput(Throughput::Elements(1));

    group.bench_function("single_counter", |b| {
        b.iter(|| {
            black_box(rt.block_on(db.strings().incr("counter", 1)).unwrap());
        });
    });

    group.bench_function("batched_100", |b| {
        b.iter(|| {
            rt.block_on(db.update(|tx| async move {
                for _ in 0..100 {
                    tx.strings().incr("counter", 1).await?;
                }
                Ok(())
            }))
            .unwrap();
        });
    });

    group.finish();
}

/// Benchmark expiry operations
fn bench_expiry(c: &mut Criterion) {
    let rt = runtime();
    let db = open(&rt);
    populate(&rt, &db, "expire", 10_000);

    let mut group = c.benchmark_group("expiry");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_with_ttl", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("ttl:{}", i);
            rt.block_on(db.strings().set_expires(&key, "value", Duration::from_secs(3600)))
                .unwrap();
            i += 1;
        });
    });

    group.bench_function("expire_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("expire:{}", i % 10_000);
            rt.block_on(db.keys().expire(&key, Duration::from_secs(3600)))
                .unwrap();
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark KEYS and SCAN
fn bench_keys(c: &mut Criterion) {
    let rt = runtime();
    let db = open(&rt);
    populate(&rt, &db, "user", 1_000);
    populate(&rt, &db, "session", 1_000);

    let mut group = c.benchmark_group("keys");

    group.bench_function("search_pattern", |b| {
        b.iter(|| {
            black_box(rt.block_on(db.keys().search("user:*")).unwrap());
        });
    });

    group.bench_function("scan_all", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut scanner = db.keys().scanner("*", None, 100);
                let mut n = 0;
                while scanner.next().await.unwrap().is_some() {
                    n += 1;
                }
                black_box(n)
            })
        });
    });

    group.finish();
}

/// Benchmark request decoding and argument parsing (no storage)
fn bench_parse(c: &mut Criterion) {
    let request = b"*7\r\n$3\r\nSET\r\n$4\r\nname\r\n$5\r\nalice\r\n$2\r\nNX\r\n$3\r\nGET\r\n$2\r\nEX\r\n$2\r\n60\r\n";

    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Elements(1));

    group.bench_function("decode_and_parse_set", |b| {
        b.iter(|| {
            let mut buf = BytesMut::from(&request[..]);
            let tokens = frame::decode(&mut buf).unwrap().unwrap();
            black_box(commands::parse(&tokens).unwrap());
        });
    });

    group.finish();
}

/// Benchmark the full command path
fn bench_commands(c: &mut Criterion) {
    let rt = runtime();
    let db = open(&rt);
    let mut handler = CommandHandler::new(db);
    let set: Vec<Bytes> = ["SET", "name", "alice"].into_iter().map(Bytes::from).collect();
    let get: Vec<Bytes> = ["GET", "name"].into_iter().map(Bytes::from).collect();

    let mut group = c.benchmark_group("commands");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_then_get", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(handler.execute(&set).await);
                black_box(handler.execute(&get).await);
            })
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_incr,
    bench_expiry,
    bench_keys,
    bench_parse,
    bench_commands,
);

criterion_main!(benches);
