//! Criterion benchmark for the byte ring
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pcap_relay::core::{BackingKind, RingBuffer};

const FRAME: usize = 1514;

fn backings() -> Vec<BackingKind> {
    let mut kinds = vec![BackingKind::Flat];
    if BackingKind::preferred() == BackingKind::Mirrored {
        kinds.push(BackingKind::Mirrored);
    }
    kinds
}

fn bench_frame_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer");
    group.throughput(Throughput::Bytes(FRAME as u64));
    let frame = [0xA5u8; FRAME];

    // ingest one frame, drain one frame; cursors walk across the wrap
    for kind in backings() {
        group.bench_with_input(BenchmarkId::new("frame_cycle", kind), &kind, |b, &kind| {
            let mut rb = RingBuffer::with_backing(3 * FRAME, kind).unwrap();
            b.iter(|| {
                rb.ingest_window()[..FRAME].copy_from_slice(black_box(&frame));
                rb.commit_ingest(FRAME);
                black_box(rb.drain_window()[FRAME - 1]);
                rb.commit_drain(FRAME);
            });
        });
    }

    group.finish();
}

fn bench_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput");

    // fill most of the ring with frames, then drain it in one window
    for kind in backings() {
        let mut rb = RingBuffer::with_backing(64 * 1024, kind).unwrap();
        let frames = rb.capacity() / FRAME;
        let frame = vec![0x3Cu8; FRAME];

        group.throughput(Throughput::Bytes((frames * FRAME) as u64));
        group.bench_function(BenchmarkId::new("fill_drain", kind), |b| {
            b.iter(|| {
                for _ in 0..frames {
                    rb.ingest_window()[..FRAME].copy_from_slice(&frame);
                    rb.commit_ingest(FRAME);
                }
                let n = rb.drain_window().len();
                black_box(rb.drain_window());
                rb.commit_drain(n);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_frame_cycle, bench_throughput);
criterion_main!(benches);
