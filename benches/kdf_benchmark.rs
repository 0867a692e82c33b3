//! Master-key derivation cost.
//!
//! PBKDF2 is deliberately slow; this shows what sign-in and sign-up pay at
//! a few iteration counts, including the production default.
//!
//! Run with: `cargo bench --bench kdf_benchmark`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode};
use chronovault::{MasterKey, Salt, VaultConfig};

fn bench_derive(c: &mut Criterion) {
    let mut group = c.benchmark_group("pbkdf2_hmac_sha256");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(10);

    let salt = Salt::from_bytes([7; 16]);
    let default_iterations = VaultConfig::default().kdf_iterations;

    for iterations in [1_000, 10_000, default_iterations] {
        group.bench_with_input(BenchmarkId::from_parameter(iterations), &iterations, |b, &n| {
            b.iter(|| MasterKey::derive(black_box("correct horse battery"), &salt, n).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_derive);
criterion_main!(benches);
