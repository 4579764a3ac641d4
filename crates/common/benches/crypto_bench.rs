//! AEAD and hashing benchmarks
//!
//! ```bash
//! cargo bench -p aegis-common --features runtime --bench crypto_bench
//! cargo bench -p aegis-common --features runtime --bench crypto_bench -- seal
//! ```

use aegis_common::crypto::aead::{derive_key, generate_salt};
use aegis_common::{AeadCipher, ContentHasher, HashAlgorithm, PatternScanner};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const SMALL_DATA: usize = 16; // 16 bytes - small field value
const MEDIUM_DATA: usize = 1024; // 1 KB - typical record
const LARGE_DATA: usize = 64 * 1024; // 64 KB - document

// ============================================================================
// Seal / open
// ============================================================================

fn bench_seal_open(c: &mut Criterion) {
    let key = AeadCipher::generate_key();
    let cipher = AeadCipher::new(key.expose()).expect("cipher");
    let mut group = c.benchmark_group("seal");

    for size in [SMALL_DATA, MEDIUM_DATA, LARGE_DATA] {
        let data = vec![0x5au8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("seal", size), &data, |b, data| {
            b.iter(|| cipher.seal(black_box(data), b"ctx").expect("seal"));
        });

        let sealed = cipher.seal(&data, b"ctx").expect("seal");
        group.bench_with_input(BenchmarkId::new("open", size), &sealed, |b, sealed| {
            b.iter(|| cipher.open(black_box(sealed), b"ctx").expect("open"));
        });
    }

    group.finish();
}

fn bench_key_derivation(c: &mut Criterion) {
    let salt = generate_salt();
    let mut group = c.benchmark_group("key_derivation");
    group.sample_size(10);
    group.bench_function("argon2_default", |b| {
        b.iter(|| derive_key(black_box(b"benchmark passphrase"), &salt).expect("derive"));
    });
    group.finish();
}

// ============================================================================
// Hashing / scanning
// ============================================================================

fn bench_hash_and_scan(c: &mut Criterion) {
    let text = "Contact jane@example.com, 555-123-4567 or card 4111 1111 1111 1111. ".repeat(16);
    let mut group = c.benchmark_group("privacy");

    for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Blake3Keyed] {
        let hasher = ContentHasher::new(algorithm, b"bench-salt".to_vec()).expect("hasher");
        group.bench_function(format!("hash_{algorithm:?}"), |b| {
            b.iter(|| hasher.hash_str(black_box("john@example.com")));
        });
    }

    let scanner = PatternScanner::new();
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("scan", |b| b.iter(|| scanner.scan(black_box(&text))));
    group.finish();
}

criterion_group!(benches, bench_seal_open, bench_key_derivation, bench_hash_and_scan);
criterion_main!(benches);
