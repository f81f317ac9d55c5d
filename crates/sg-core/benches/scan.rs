use std::ops::ControlFlow;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};
use sg_core::hash::digest_pieces;
use sg_core::pattern::{scan_pattern_ignore_case, SCAN_WINDOW};
use sg_core::{normalize, scan_pattern_parallel, scan_windowed, HashAlgorithm, SearchQuery};

const SIZES: &[(usize, &str)] = &[(1 << 20, "1MB"), (16 << 20, "16MB"), (64 << 20, "64MB")];

/// Random bytes with a marker planted every 64 KiB.
fn fixture(size: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut data: Vec<u8> = (0..size).map(|_| rng.gen()).collect();
    for pos in (0..size.saturating_sub(8)).step_by(64 * 1024) {
        data[pos..pos + 8].copy_from_slice(b"SpYgLaSs");
    }
    data
}

fn bench_pattern_scans(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern_scan");

    for &(size, label) in SIZES {
        let data = fixture(size);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("parallel", label), &data, |b, data| {
            b.iter(|| std::hint::black_box(scan_pattern_parallel(data, b"SpYgLaSs").len()));
        });

        group.bench_with_input(BenchmarkId::new("ignore_case", label), &data, |b, data| {
            b.iter(|| std::hint::black_box(scan_pattern_ignore_case(data, b"spyglass").len()));
        });

        let pattern = normalize(&SearchQuery::ascii("SpYgLaSs", false)).unwrap();
        group.bench_with_input(BenchmarkId::new("windowed", label), &data, |b, data| {
            b.iter(|| {
                let hits = scan_windowed(data, &pattern, SCAN_WINDOW, |_| ControlFlow::Continue(()));
                std::hint::black_box(hits.map(|h| h.len()))
            });
        });
    }

    group.finish();
}

fn bench_digests(c: &mut Criterion) {
    let mut group = c.benchmark_group("digest");
    let data = fixture(16 << 20);
    group.throughput(Throughput::Bytes(data.len() as u64));

    for algo in [HashAlgorithm::Sha256, HashAlgorithm::Blake3] {
        group.bench_with_input(BenchmarkId::new(algo.name(), "16MB"), &data, |b, data| {
            b.iter(|| std::hint::black_box(digest_pieces(algo, data.chunks(4 << 20))));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pattern_scans, bench_digests);
criterion_main!(benches);
