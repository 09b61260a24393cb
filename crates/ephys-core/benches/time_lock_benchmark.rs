//! Performance benchmarks for slicing and time-locking
//!
//! Covers the hot paths of epoch extraction:
//! - nearest-sample lookup on long recordings
//! - window slicing with a synthesized time axis
//! - full time-lock over all trials

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ephys_core::{ChannelTable, ConditionTrials, EventTable, LockDuration, Modalities, Signal};
use ndarray::{Array1, Array3};

const DT: f64 = 0.001;

fn recording(channels: usize, samples: usize, trials: usize) -> Signal {
    let data = Array3::from_shape_fn((channels, samples, trials), |(c, t, n)| {
        ((c + n) as f64 * 0.3 + t as f64 * DT * 40.0).sin()
    });
    // Construction only fails on inconsistent shapes, which this helper never builds.
    Signal::uniform(ChannelTable::numbered(channels), data, DT, 0.0).unwrap()
}

/// Benchmark nearest-sample lookup
fn bench_sample_at(c: &mut Criterion) {
    let mut group = c.benchmark_group("sample_at");

    for &samples in &[1_000, 10_000, 100_000] {
        let signal = recording(1, samples, 1);
        let target = samples as f64 * DT * 0.75;
        group.bench_with_input(BenchmarkId::from_parameter(samples), &signal, |b, signal| {
            b.iter(|| black_box(signal.sample_at(black_box(target))));
        });
    }

    group.finish();
}

/// Benchmark window extraction
fn bench_slice(c: &mut Criterion) {
    let mut group = c.benchmark_group("slice");

    for &channels in &[4, 16, 32] {
        let signal = recording(channels, 5_000, 20);
        group.bench_with_input(
            BenchmarkId::new("500ms", format!("{}ch", channels)),
            &signal,
            |b, signal| {
                b.iter(|| black_box(signal.slice(black_box(1.0), black_box(1.5))));
            },
        );
    }

    group.finish();
}

/// Benchmark a complete time-lock across modalities
fn bench_time_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("time_lock");

    for &trials in &[10, 50, 100] {
        let stim = Array1::from_iter((0..trials).map(|n| 0.5 + (n % 7) as f64 * 0.01));
        let resp = &stim + 0.8;
        let events = EventTable::new()
            .with_event("stim", stim)
            .and_then(|events| events.with_event("resp", resp))
            .unwrap();
        let signals = Modalities::new()
            .with_lfp(recording(16, 2_000, trials))
            .with_mua(recording(16, 2_000, trials));
        let condition = ConditionTrials::new(events, signals, true).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(trials), &condition, |b, condition| {
            b.iter(|| {
                black_box(condition.time_lock(
                    black_box("stim"),
                    LockDuration::UntilNextEvent,
                    0.1,
                    0.1,
                ))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sample_at, bench_slice, bench_time_lock);
criterion_main!(benches);
