//! Criterion benchmark untuk Ring Buffer
//!
//! Run dengan: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kpipe::config::{WriteMode, BIGGEST_MSG_SIZE, PER_Q_BSIZE};
use kpipe::core::RingBuffer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn bench_write_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer");

    for mode in [WriteMode::Single, WriteMode::Multi] {
        for size in [8usize, 64, BIGGEST_MSG_SIZE] {
            group.throughput(Throughput::Bytes(size as u64));
            let id = BenchmarkId::new(format!("write_read_{:?}", mode).to_lowercase(), size);
            group.bench_with_input(id, &size, |b, &size| {
                let rb = RingBuffer::new(PER_Q_BSIZE, mode, false).unwrap();
                let msg = vec![0x5Au8; size];
                let mut out = vec![0u8; size];
                b.iter(|| {
                    rb.write(black_box(&msg), size).unwrap();
                    black_box(rb.read(&mut out, size, false).unwrap());
                });
            });
        }
    }

    group.finish();
}

fn bench_fill_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill_drain");

    // Isi ring sampai penuh lalu kosongkan, termasuk wraparound
    for msg_size in [16usize, 100] {
        let batch = (PER_Q_BSIZE - 1) / msg_size;
        group.throughput(Throughput::Bytes((batch * msg_size) as u64));
        group.bench_function(format!("batch_{}x{}", batch, msg_size), |b| {
            let rb = RingBuffer::new(PER_Q_BSIZE, WriteMode::Single, false).unwrap();
            let msg = vec![1u8; msg_size];
            let mut out = vec![0u8; PER_Q_BSIZE];
            b.iter(|| {
                for _ in 0..batch {
                    rb.write(black_box(&msg), msg_size).unwrap();
                }
                while rb.read(&mut out, PER_Q_BSIZE, false).unwrap() > 0 {}
            });
        });
    }

    group.finish();
}

fn bench_contended_multi_writer(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended");
    group.throughput(Throughput::Bytes(64));

    // Satu writer latar belakang terus berebut reservasi
    group.bench_function("multi_write_64_vs_1_writer", |b| {
        let rb = Arc::new(RingBuffer::new(PER_Q_BSIZE, WriteMode::Multi, false).unwrap());
        let stop = Arc::new(AtomicBool::new(false));
        let rival = {
            let rb = rb.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let msg = [2u8; 64];
                while !stop.load(Ordering::Relaxed) {
                    let _ = rb.write(&msg, msg.len());
                }
            })
        };

        let msg = [1u8; 64];
        let mut out = [0u8; 512];
        let out_len = out.len();
        b.iter(|| {
            while rb.write(black_box(&msg), msg.len()).is_err() {
                let _ = rb.read(&mut out, out_len, false);
            }
        });

        stop.store(true, Ordering::Relaxed);
        rival.join().unwrap();
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_write_read,
    bench_fill_drain,
    bench_contended_multi_writer
);
criterion_main!(benches);
