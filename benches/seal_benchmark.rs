use std::sync::Arc;

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use chronovault::capsule::{seal_capsule, CapsuleDraft};
use chronovault::{
    generate_message_key, unwrap_key, wrap_key, DocumentStore, MasterKey, MemoryStore, Principal,
    Salt, Session, UnlockFlow, VaultConfig, Visibility,
};

fn benchmark_message_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_key");
    let key = generate_message_key().unwrap();

    let sizes = [("100B", 100), ("1KB", 1024), ("10KB", 10 * 1024)];
    for (name, size) in sizes {
        let payload = vec![0u8; size];
        let sealed = key.encrypt(&payload).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encrypt", name), &payload, |b, payload| {
            b.iter(|| key.encrypt(black_box(payload)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("decrypt", name), &sealed, |b, sealed| {
            b.iter(|| key.decrypt(black_box(&sealed.ciphertext), black_box(&sealed.nonce)).unwrap());
        });
    }
    group.finish();
}

fn benchmark_wrap(c: &mut Criterion) {
    let master = MasterKey::derive("benchmark password", &Salt::from_bytes([1; 16]), 1_000).unwrap();
    let key = generate_message_key().unwrap();
    let wrapped = wrap_key(&key, &master).unwrap();

    c.bench_function("wrap_key", |b| b.iter(|| wrap_key(black_box(&key), &master).unwrap()));
    c.bench_function("unwrap_key", |b| {
        b.iter(|| unwrap_key(black_box(&wrapped.wrapped), black_box(&wrapped.nonce), &master).unwrap())
    });
}

fn benchmark_unlock(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let config = VaultConfig {
        kdf_iterations: 1_000,
        ..VaultConfig::default()
    };
    let master = MasterKey::derive("benchmark password", &Salt::from_bytes([1; 16]), 1_000).unwrap();
    let session = Session::with_master_key(Principal::new("uid-bench", "bench@example.com"), master);

    let now = Utc::now();
    let open = now + Duration::seconds(1);
    let mut group = c.benchmark_group("unlock");

    for visibility in [Visibility::Public, Visibility::PrivateSelf] {
        let draft = CapsuleDraft {
            title: "Benchmark capsule".into(),
            message: "x".repeat(1024),
            visibility,
            open_date: open,
            recipient: None,
        };
        let envelope = seal_capsule(&draft, &session, now, &config).unwrap().envelope;
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());

        group.bench_function(visibility.as_str(), |b| {
            b.iter(|| {
                let mut flow = UnlockFlow::new("bench", envelope.clone(), Arc::clone(&store));
                runtime.block_on(flow.advance(Some(black_box(&session)), open))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_message_key, benchmark_wrap, benchmark_unlock);
criterion_main!(benches);
