//! Benchmarks for the windowed read path.
//!
//! Measures read throughput for growing windows and the cost of chunking,
//! sequential versus parallel batches.
//!
//! Run with: `cargo bench -p strata -- read`

#![allow(missing_docs, clippy::cast_possible_truncation)]

use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use strata::cancel::CancellationToken;
use strata::catalog::ResourcePath;
use strata::read::{ReadBuffers, ReadEngine, ReadOptions, ReadRequest};
use strata::representation::{DataType, Representation};
use strata::source::TickIndexSource;

const SECOND: u64 = 1_000_000_000;
const T0: u64 = 1_700_000_000 * SECOND;

fn representation() -> Representation {
    Representation::new(DataType::Float64, Duration::from_millis(10)).unwrap()
}

fn path() -> ResourcePath {
    ResourcePath::parse("/bench/signal/10_ms").unwrap()
}

fn bench_window_sizes(c: &mut Criterion) {
    let engine = ReadEngine::new(TickIndexSource::new(), ReadOptions::default());
    let mut group = c.benchmark_group("read/window");

    for seconds in [10u64, 100, 1_000] {
        let end = T0 + seconds * SECOND;
        let mut buffers = ReadBuffers::allocate(T0, end, &representation()).unwrap();
        group.throughput(Throughput::Elements(buffers.sample_count() as u64));

        group.bench_with_input(BenchmarkId::from_parameter(seconds), &end, |b, &end| {
            b.iter(|| {
                engine
                    .read(
                        black_box(T0),
                        black_box(end),
                        &mut [buffers.request(path(), representation())],
                        |_| {},
                        &CancellationToken::new(),
                    )
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn bench_chunk_sizes(c: &mut Criterion) {
    let end = T0 + 1_000 * SECOND;
    let mut group = c.benchmark_group("read/chunk_samples");

    for chunk_samples in [256usize, 4_096, 65_536] {
        let engine = ReadEngine::new(
            TickIndexSource::new(),
            ReadOptions {
                chunk_samples,
                parallel: false,
            },
        );
        let mut buffers = ReadBuffers::allocate(T0, end, &representation()).unwrap();

        group.bench_with_input(
            BenchmarkId::from_parameter(chunk_samples),
            &chunk_samples,
            |b, _| {
                b.iter(|| {
                    engine
                        .read(
                            T0,
                            end,
                            &mut [buffers.request(path(), representation())],
                            |_| {},
                            &CancellationToken::new(),
                        )
                        .unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let end = T0 + 1_000 * SECOND;
    let mut group = c.benchmark_group("read/batch_of_8");

    for parallel in [false, true] {
        let engine = ReadEngine::new(
            TickIndexSource::new(),
            ReadOptions {
                chunk_samples: 4_096,
                parallel,
            },
        );
        let mut buffers: Vec<ReadBuffers> = (0..8)
            .map(|_| ReadBuffers::allocate(T0, end, &representation()).unwrap())
            .collect();

        let label = if parallel { "parallel" } else { "sequential" };
        group.bench_function(label, |b| {
            b.iter(|| {
                let mut requests: Vec<ReadRequest<'_>> = buffers
                    .iter_mut()
                    .map(|buffer| buffer.request(path(), representation()))
                    .collect();
                engine
                    .read(T0, end, &mut requests, |_| {}, &CancellationToken::new())
                    .unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_window_sizes, bench_chunk_sizes, bench_batch);
criterion_main!(benches);
