//! Encoder and decoder cost per trace call.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use rtkit_trace::codec;
use rtkit_trace::{DataRef, Severity};

fn bench_encode(c: &mut Criterion) {
    c.bench_function("encode_message", |b| {
        b.iter(|| {
            codec::encode_message(
                black_box(1_000),
                black_box(-12),
                Severity::Warning,
                black_box("sensor timeout"),
                false,
            )
        })
    });

    let samples: Vec<u16> = (0..256).collect();
    c.bench_function("encode_u16_inline_256", |b| {
        b.iter(|| codec::encode_data(black_box(1_000), DataRef::U16(black_box(&samples)), "adc"))
    });

    c.bench_function("encode_u16_reference_256", |b| {
        b.iter(|| {
            codec::encode_data_by_reference(black_box(1_000), DataRef::U16(black_box(&samples)), "adc")
        })
    });
}

fn bench_decode(c: &mut Criterion) {
    let message = codec::encode_message(1_000, 7, Severity::Info, "ready", false)
        .expect("message encodes");
    c.bench_function("decode_message", |b| {
        b.iter(|| codec::decode(black_box(&message)))
    });

    let samples: Vec<u32> = (0..256).collect();
    let data = codec::encode_data(1_000, DataRef::U32(&samples), "words").expect("data encodes");
    c.bench_function("decode_u32_inline_256", |b| {
        b.iter(|| codec::decode(black_box(&data)))
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
