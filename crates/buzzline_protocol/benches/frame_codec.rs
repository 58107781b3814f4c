//! Benchmark for frame encode/decode.
//!
//! TARGET: decoding must stay far below one tick (10 ms) for a full queue
//!
//! Run with: cargo bench --package buzzline_protocol --bench frame_codec

use buzzline_protocol::{Frame, PeripheralId, RawFrame};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn bench_decode(c: &mut Criterion) {
    let frames: Vec<RawFrame> = (1..=64u8)
        .map(|id| {
            if id % 2 == 0 {
                Frame::press(PeripheralId(id), id, Some(u32::from(id) * 10)).encode()
            } else {
                Frame::presence(PeripheralId(id)).encode()
            }
        })
        .collect();

    let mut group = c.benchmark_group("frame_codec");
    group.throughput(Throughput::Elements(frames.len() as u64));
    group.bench_function("decode_mixed_queue", |b| {
        b.iter(|| {
            let mut presses = 0u32;
            for raw in &frames {
                if let Ok(frame) = Frame::decode(black_box(raw)) {
                    presses += u32::from(frame.sender().is_some());
                }
            }
            presses
        });
    });
    group.bench_function("encode_press", |b| {
        b.iter(|| Frame::press(black_box(PeripheralId(3)), black_box(7), Some(420)).encode());
    });
    group.finish();
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
