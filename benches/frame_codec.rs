use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use arqcast::frame::{encode_ack, encode_control, encode_data, Frame};

fn bench_encode_data(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_data");
    for mtu in [64usize, 1024, 8192] {
        let payload = vec![0xA5u8; mtu];
        group.throughput(Throughput::Bytes(mtu as u64));
        group.bench_with_input(BenchmarkId::from_parameter(mtu), &payload, |b, payload| {
            b.iter(|| encode_data(black_box(42), black_box(payload), mtu))
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for mtu in [64usize, 1024, 8192] {
        let frame = encode_data(7, &vec![0x5Au8; mtu], mtu).unwrap_or_default();
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::new("data", mtu), &frame, |b, frame| {
            b.iter(|| Frame::decode(black_box(frame)))
        });
    }

    let ack = encode_ack(1234);
    group.bench_function("ack", |b| b.iter(|| Frame::decode(black_box(&ack))));

    let control = encode_control("backup/2024/archive.tar").unwrap_or_default();
    group.bench_function("control", |b| b.iter(|| Frame::decode(black_box(&control))));
    group.finish();
}

criterion_group!(benches, bench_encode_data, bench_decode);
criterion_main!(benches);
