use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use miaobox::downloader::{ChunkPlanner, ProgressAggregator};
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

fn benchmark_plan_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("Chunk Planning");
    let planner = ChunkPlanner::new(MIB, 8);

    let file_sizes = [
        MIB,         // 1 MiB
        10 * MIB,    // 10 MiB
        100 * MIB,   // 100 MiB
        1024 * MIB,  // 1 GiB
    ];

    for size in file_sizes {
        group.bench_with_input(
            BenchmarkId::new("plan", format!("{}MiB", size / MIB)),
            &size,
            |b, &size| b.iter(|| planner.plan(black_box(size), black_box(true))),
        );
    }

    group.finish();
}

fn benchmark_thread_variation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Thread Count Variation");
    let file_size = 100 * MIB;

    for threads in [1usize, 4, 8, 16, 64] {
        let planner = ChunkPlanner::new(MIB, threads);
        group.bench_with_input(BenchmarkId::new("threads", threads), &threads, |b, _| {
            b.iter(|| planner.plan(black_box(file_size), black_box(true)))
        });
    }

    group.finish();
}

fn benchmark_progress_updates(c: &mut Criterion) {
    let plan = ChunkPlanner::new(MIB, 8).plan(1024 * MIB, true);
    let aggregator = ProgressAggregator::new(&plan, Duration::from_millis(100));

    c.bench_function("aggregator_record", |b| {
        let mut chunk = 0;
        b.iter(|| {
            chunk = (chunk + 1) % 8;
            aggregator.record(black_box(chunk), black_box(16 * 1024));
        })
    });
}

criterion_group!(
    benches,
    benchmark_plan_sizes,
    benchmark_thread_variation,
    benchmark_progress_updates
);
criterion_main!(benches);
