//! Benchmarks for mesh message encoding
//!
//! Performance-critical paths:
//! - `JsonCodec` / `ProtoCodec` encode and decode
//! - `ChaCha20Cipher` payload encryption

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use relay_kernel::crypto::{ChaCha20Cipher, Decryptor, Encryptor};
use relay_kernel::encoding::{CodecRegistry, Message};

fn sample(len: usize) -> Message {
    Message {
        seq: 1,
        route: 1001,
        buffer: vec![7u8; len],
    }
}

fn bench_codecs(c: &mut Criterion) {
    let registry = CodecRegistry::new();
    let mut group = c.benchmark_group("codec_round_trip");

    for name in ["json", "proto"] {
        let codec = registry.invoke(name).expect("built-in codec");
        for len in [64, 1024, 16 * 1024] {
            let message = sample(len);
            group.bench_with_input(BenchmarkId::new(name, len), &message, |b, message| {
                b.iter(|| {
                    let data = codec.encode(black_box(message)).expect("encode");
                    black_box(codec.decode(&data).expect("decode"))
                });
            });
        }
    }
    group.finish();
}

fn bench_cipher(c: &mut Criterion) {
    let cipher = ChaCha20Cipher::new(&[9u8; 32]);
    let payload = vec![1u8; 1024];
    let sealed = cipher.encrypt(&payload).expect("encrypt");

    c.bench_function("chacha20_encrypt_1k", |b| {
        b.iter(|| black_box(cipher.encrypt(black_box(&payload)).expect("encrypt")));
    });
    c.bench_function("chacha20_decrypt_1k", |b| {
        b.iter(|| black_box(cipher.decrypt(black_box(&sealed)).expect("decrypt")));
    });
}

criterion_group!(benches, bench_codecs, bench_cipher);
criterion_main!(benches);
