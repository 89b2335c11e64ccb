// benches/ring_bench.rs
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ringpipe::prelude::*;
use std::hint::black_box;
use std::io::Cursor;
use std::sync::Arc;
use std::thread;

fn bench_write_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_operations");

    for size in [16, 256, 4096].iter() {
        let payload = vec![0xA5u8; *size];
        let mut out = vec![0u8; *size];
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("write_read", size), size, |b, _| {
            let ring = RingBuffer::new(64 * 1024);
            b.iter(|| {
                ring.write(black_box(&payload)).unwrap();
                ring.read(black_box(&mut out)).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_byte_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("byte_operations");

    group.bench_function("write_read_byte", |b| {
        let ring = RingBuffer::new(1024);
        b.iter(|| {
            ring.write_byte(black_box(42)).unwrap();
            black_box(ring.read_byte().unwrap());
        });
    });

    group.bench_function("try_write_read_byte", |b| {
        let ring = RingBuffer::new(1024);
        b.iter(|| {
            ring.try_write_byte(black_box(42)).unwrap();
            black_box(ring.try_read_byte().unwrap());
        });
    });

    group.finish();
}

fn bench_overwrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("overwrite");
    let payload = vec![0x5Au8; 1500];

    group.bench_function("sliding_window", |b| {
        let ring = RingBuffer::with_config(4096, RingConfig::window());
        b.iter(|| {
            ring.write(black_box(&payload)).unwrap();
        });
    });

    group.finish();
}

fn bench_pipe_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipe_throughput");
    let total = 1 << 20;

    for capacity in [1024, 16 * 1024, 256 * 1024].iter() {
        group.throughput(Throughput::Bytes(total as u64));

        group.bench_with_input(BenchmarkId::new("copy", capacity), capacity, |b, &cap| {
            let payload = vec![1u8; total];
            b.iter(|| {
                let ring = RingBuffer::new(cap);
                let mut src = Cursor::new(&payload[..]);
                let mut sink = std::io::sink();
                black_box(ring.copy(&mut sink, &mut src).unwrap());
            });
        });

        group.bench_with_input(
            BenchmarkId::new("threads", capacity),
            capacity,
            |b, &cap| {
                b.iter(|| {
                    let ring = Arc::new(RingBuffer::with_config(cap, RingConfig::pipe()));
                    let producer = {
                        let ring = Arc::clone(&ring);
                        thread::spawn(move || {
                            let chunk = [7u8; 4096];
                            for _ in 0..total / chunk.len() {
                                ring.write(&chunk).unwrap();
                            }
                            ring.close_writer();
                        })
                    };

                    let mut buf = [0u8; 4096];
                    let mut received = 0;
                    while let Ok(n) = ring.read(&mut buf) {
                        received += n;
                    }
                    producer.join().unwrap();
                    black_box(received);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_write_read,
    bench_byte_ops,
    bench_overwrite,
    bench_pipe_throughput
);
criterion_main!(benches);
