//! Benchmarks for label fusion

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use segfuse_algorithms::fusion::{majority_vote, staple, MajorityVoteParams, ObserverSet, StapleParams};
use segfuse_core::Volume;
use segfuse_parallel::ProcessingMode;

const CLASSES: usize = 4;

/// Concentric rings of labels, with each observer shifting a different
/// diagonal band of pixels to the next class
fn create_observers(size: usize, observers: usize) -> ObserverSet<u8> {
    let center = size as f64 / 2.0;
    let volumes = (0..observers)
        .map(|i| {
            let data = (0..size * size)
                .map(|p| {
                    let (row, col) = (p / size, p % size);
                    let dx = col as f64 - center;
                    let dy = row as f64 - center;
                    let ring = ((dx * dx + dy * dy).sqrt() / center * CLASSES as f64) as usize;
                    let ring = ring.min(CLASSES - 1);
                    let noisy = (row * 7 + col * 13 + i * 31) % 23 == 0;
                    (if noisy { (ring + 1) % CLASSES } else { ring }) as u8
                })
                .collect();
            Volume::from_vec(data, &[size, size]).unwrap()
        })
        .collect();
    ObserverSet::new(volumes).unwrap()
}

fn bench_staple(c: &mut Criterion) {
    let mut group = c.benchmark_group("fusion/staple");
    group.sample_size(10);

    for size in [128, 256, 512] {
        let set = create_observers(size, 5);
        for (name, processing) in [
            ("sequential", ProcessingMode::Sequential),
            ("parallel", ProcessingMode::Parallel),
        ] {
            let params = StapleParams {
                processing,
                max_iterations: Some(20),
                ..Default::default()
            };
            group.bench_with_input(BenchmarkId::new(name, size), &size, |b, _| {
                b.iter(|| staple::<u8, u8>(black_box(&set), &params).unwrap())
            });
        }
    }

    group.finish();
}

fn bench_majority_vote(c: &mut Criterion) {
    let mut group = c.benchmark_group("fusion/majority_vote");

    for size in [256, 512, 1024] {
        let set = create_observers(size, 5);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                majority_vote::<u8, u8>(black_box(&set), &MajorityVoteParams::default()).unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_staple, bench_majority_vote);
criterion_main!(benches);
