//! Codec benchmarks for relay-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use relay_protocol::{codec, ChatMessage, Frame, StreamEnvelope, UserRef};

fn event_frame(text_len: usize) -> Frame {
    Frame::event(
        "bench:room",
        StreamEnvelope::message(ChatMessage {
            id: "20250804120000.000".into(),
            room_id: "bench:room".into(),
            sender: UserRef::new("conn_bench", "bench"),
            text: "x".repeat(text_len),
            sent_at_unix: 1_754_308_800,
        }),
    )
}

fn bench_encode_event(c: &mut Criterion) {
    let frame = event_frame(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("event_64B", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.finish();
}

fn bench_decode_event(c: &mut Criterion) {
    let encoded = codec::encode(&event_frame(64)).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("event_64B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_roundtrip_send(c: &mut Criterion) {
    let frame = Frame::send(1, "bench:room", "x".repeat(256), None);

    c.bench_function("roundtrip_send_256B", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_event,
    bench_decode_event,
    bench_roundtrip_send
);
criterion_main!(benches);
