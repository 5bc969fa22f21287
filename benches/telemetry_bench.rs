//! Benchmarks for the diagstream telemetry engine
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use diagstream::aggregate::{aggregate_points, BucketWidth};
use diagstream::config::{Config, StoreBackend};
use diagstream::{DataPoint, PointInput, TelemetryEngine};
use tempfile::tempdir;

fn create_test_points(count: usize) -> Vec<DataPoint> {
    (0..count)
        .map(|i| {
            DataPoint::new("bench", i as i64 * 100)
                .param("rpm", 800.0 + (i % 50) as f64 * 40.0)
                .param("speed", (i % 120) as f64)
                .param("engineTemp", 85.0)
        })
        .collect()
}

fn obd_input(ts: i64) -> PointInput {
    PointInput::new()
        .at(ts)
        .param("rpm", 1850.0)
        .param("speed", 62.0)
        .param("engineTemp", 88.5)
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");

    for size in [1_000, 10_000, 100_000] {
        let points = create_test_points(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("second_{}", size), |b| {
            b.iter(|| aggregate_points(black_box(&points), BucketWidth::Second, 60))
        });

        group.bench_function(format!("minute_{}", size), |b| {
            b.iter(|| aggregate_points(black_box(&points), BucketWidth::Minute, 10))
        });
    }

    group.finish();
}

fn bench_engine(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("engine");

    group.bench_function("ingest_memory", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let engine = TelemetryEngine::in_memory();

                let start = std::time::Instant::now();
                for i in 0..iters {
                    engine.ingest("bench", obd_input(i as i64)).await.unwrap();
                }
                start.elapsed()
            })
        });
    });

    group.bench_function("ingest_memory_with_subscriber", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let engine = TelemetryEngine::in_memory();
                let _handle = engine
                    .subscribe("bench", |point| {
                        black_box(point.timestamp);
                    })
                    .unwrap();

                let start = std::time::Instant::now();
                for i in 0..iters {
                    engine.ingest("bench", obd_input(i as i64)).await.unwrap();
                }
                start.elapsed()
            })
        });
    });

    group.bench_function("ingest_sqlite", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let dir = tempdir().unwrap();
                let mut config = Config::default();
                config.store.backend = StoreBackend::Sqlite;
                config.store.data_dir = dir.path().to_string_lossy().to_string();
                let engine = TelemetryEngine::from_config(&config).unwrap();

                let start = std::time::Instant::now();
                for i in 0..iters {
                    engine.ingest("bench", obd_input(i as i64)).await.unwrap();
                }
                start.elapsed()
            })
        });
    });

    group.bench_function("range_query_1000_of_10000", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let engine = TelemetryEngine::in_memory();
                for i in 0..10_000 {
                    engine.ingest("bench", obd_input(i * 100)).await.unwrap();
                }

                let start = std::time::Instant::now();
                for _ in 0..iters {
                    let _ = engine
                        .range_query("bench", black_box(200_000), 300_000, 1000)
                        .await
                        .unwrap();
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_aggregate, bench_engine);
criterion_main!(benches);
