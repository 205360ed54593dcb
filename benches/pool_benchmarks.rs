//! Performance benchmarks for share verification

use criterion::{criterion_group, criterion_main, Criterion};
use mining_pool::core::{check_nonce, wire_target_hex, Blake2sPow, Nonce, Prehash, Target};
use mining_pool::pool::JobRegistry;
use std::hint::black_box;
use std::sync::Arc;

fn bench_target_derivation(c: &mut Criterion) {
    c.bench_function("target_from_difficulty", |b| {
        b.iter(|| {
            black_box(Target::from_difficulty(black_box(1.0 / 5_770.0)));
        });
    });

    c.bench_function("wire_target_hex", |b| {
        b.iter(|| {
            black_box(wire_target_hex(black_box(1e-9)));
        });
    });
}

fn bench_check_nonce(c: &mut Criterion) {
    let hasher = Blake2sPow;
    let prehash = Prehash([0x42u8; 64]);
    let target = Target::from_difficulty(1.0 / 1024.0);
    let mut nonce = 0u64;

    c.bench_function("check_nonce", |b| {
        b.iter(|| {
            nonce = nonce.wrapping_add(1);
            black_box(check_nonce(&hasher, &prehash, Nonce(nonce), &target));
        });
    });
}

fn bench_job_registry(c: &mut Criterion) {
    let block = Arc::new(mining_pool::core::CandidateBlock::synthetic());
    let mut registry = JobRegistry::new(10);

    c.bench_function("job_create_and_evict", |b| {
        b.iter(|| {
            let job = registry.create(Arc::clone(&block), Prehash([7u8; 64]), 1e-4);
            black_box(job.id);
        });
    });
}

criterion_group!(
    benches,
    bench_target_derivation,
    bench_check_nonce,
    bench_job_registry
);
criterion_main!(benches);
