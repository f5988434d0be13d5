// Document benchmarks: local typing, remote replay, out-of-order replay

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use cotext::EngineConfig;
use cotext::Operation;
use cotext::crdt::primitives::ReplicaId;
use cotext::crdt::replica::Replica;

const SIZES: [usize; 3] = [100, 1_000, 5_000];

/// A history of random edits, roughly one delete per four inserts.
fn history(size: usize, seed: u64) -> Vec<Operation> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut author = Replica::new(ReplicaId(2), &EngineConfig::default());
    let mut ops = Vec::with_capacity(size);
    while ops.len() < size {
        let len = author.len();
        if len > 0 && rng.gen_ratio(1, 5) {
            ops.push(author.apply_local_delete(rng.gen_range(0..len)).unwrap());
        } else {
            ops.push(author.apply_local_insert(rng.gen_range(0..=len), 'x').unwrap());
        }
    }
    ops
}

fn bench_local_typing(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_typing");
    for size in SIZES {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("append", size), &size, |b, &size| {
            b.iter(|| {
                let mut replica = Replica::new(ReplicaId(2), &EngineConfig::default());
                for i in 0..size {
                    replica.apply_local_insert(i, 'a').unwrap();
                }
                black_box(replica.len())
            });
        });
        group.bench_with_input(BenchmarkId::new("random", size), &size, |b, &size| {
            b.iter(|| {
                let mut rng = StdRng::seed_from_u64(42);
                let mut replica = Replica::new(ReplicaId(2), &EngineConfig::default());
                for _ in 0..size {
                    let pos = rng.gen_range(0..=replica.len());
                    replica.apply_local_insert(pos, 'a').unwrap();
                }
                black_box(replica.len())
            });
        });
    }
    group.finish();
}

fn bench_remote_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("remote_replay");
    for size in SIZES {
        let ops = history(size, 7);
        let mut shuffled = ops.clone();
        shuffled.shuffle(&mut StdRng::seed_from_u64(8));

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("in_order", size), &ops, |b, ops| {
            b.iter(|| {
                let mut replica = Replica::new(ReplicaId(3), &EngineConfig::default());
                for op in ops {
                    replica.apply_remote_operation(*op, None).unwrap();
                }
                black_box(replica.len())
            });
        });
        group.bench_with_input(BenchmarkId::new("shuffled", size), &shuffled, |b, ops| {
            b.iter(|| {
                let mut replica = Replica::new(ReplicaId(3), &EngineConfig::default());
                for op in ops {
                    replica.apply_remote_operation(*op, None).unwrap();
                }
                black_box(replica.len())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_local_typing, bench_remote_replay);
criterion_main!(benches);
