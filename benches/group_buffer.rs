//! Criterion benchmarks for the continuous cache hot paths.
//!
//! The group buffer sits on the packet ingestion path, so every sample frame
//! the instrument emits goes through `push`. These benchmarks establish
//! baselines for the frame write path at common group widths and for the
//! snapshot read path clients poll with.
//!
//! Key metrics:
//! - Frame write throughput (frames/sec) for various channel counts
//! - Snapshot copy latency for a full buffer
//! - End-to-end dispatch cost for a mixed packet stream
//!
//! Run with: cargo bench --bench group_buffer

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use neuro_daq::cache::continuous::GroupBuffer;
use neuro_daq::mock::MockLink;
use neuro_daq::{Registry, TrialConfig};

/// Benchmark pushing frames at group widths common in acquisition setups.
fn group_buffer_push_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_buffer_push");

    for channels in [1usize, 16, 96, 256] {
        let ids: Vec<u16> = (1..=channels as u16).collect();
        let mut buffer = GroupBuffer::allocate(ids, 102_400, 30_000).unwrap();
        let frame = vec![0i16; channels];

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("push", format!("{}ch", channels)),
            &channels,
            |b, _| {
                let mut t = 0u64;
                b.iter(|| {
                    t += 1;
                    buffer.push(t, black_box(&frame)).unwrap();
                });
            },
        );
    }

    group.finish();
}

/// Benchmark the snapshot copy a polling client pays for a full buffer.
fn group_buffer_read_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_buffer_read");

    let ids: Vec<u16> = (1..=32).collect();
    let mut buffer = GroupBuffer::allocate(ids, 10_000, 30_000).unwrap();
    let frame = vec![7i16; 32];
    for t in 0..10_000u64 {
        buffer.push(t, &frame).unwrap();
    }

    group.bench_function("peek_full_buffer", |b| {
        b.iter(|| {
            buffer.latch_read_end();
            let (ts, samples) = buffer.read(false);
            black_box((ts, samples));
        });
    });

    group.finish();
}

/// Benchmark the whole dispatch path the link thread runs per packet.
fn dispatch_mixed_stream(c: &mut Criterion) {
    let registry = Registry::new();
    registry.open(0).unwrap();
    registry
        .configure_trial(
            0,
            TrialConfig {
                active: true,
                continuous_samples: 102_400,
                event_samples: 16_384,
                ..TrialConfig::default()
            },
        )
        .unwrap();

    let mut link = MockLink::new(1, 1, 1, (1..=32).collect());
    let packets = link.stream(1024, 7);

    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(packets.len() as u64));
    group.bench_function("mixed_stream_1k", |b| {
        b.iter(|| {
            for packet in &packets {
                registry.process_packet(0, black_box(packet)).unwrap();
            }
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    group_buffer_push_throughput,
    group_buffer_read_snapshot,
    dispatch_mixed_stream
);
criterion_main!(benches);
