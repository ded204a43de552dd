use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use transport_bench::{
    metrics::Reducer,
    probe::ContextSwitches,
    sample::{FailureKind, SampleRecord, TrialFailure},
};

/// Skewed latencies with a failure every 50 trials and a probe delta on each.
fn records(count: usize) -> Vec<SampleRecord> {
    let now = chrono::Utc::now();
    (0..count)
        .map(|i| {
            let offset = Duration::from_millis(i as u64 * 7);
            let record = if i % 50 == 49 {
                SampleRecord::failure(
                    i,
                    now,
                    offset,
                    Duration::from_millis(2),
                    TrialFailure {
                        kind: FailureKind::Timeout,
                        message: "timed out".to_string(),
                    },
                )
            } else {
                let micros = 4_000 + (i as u64 * 7919) % 3_000 + if i % 97 == 0 { 40_000 } else { 0 };
                SampleRecord::success(
                    i,
                    now,
                    offset,
                    Duration::from_micros(micros),
                    1024,
                    "HTTP/2",
                )
            };
            record.with_context_switches(ContextSwitches {
                voluntary: 3,
                involuntary: (i % 5 == 0) as u64,
            })
        })
        .collect()
}

fn bench_reduce(c: &mut Criterion) {
    let reducer = Reducer::default();
    let mut group = c.benchmark_group("reduce");
    for count in [100usize, 1_000, 10_000] {
        let input = records(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &input, |b, input| {
            b.iter(|| reducer.reduce(black_box(input)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_reduce);
criterion_main!(benches);
