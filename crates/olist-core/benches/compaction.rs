use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use olist_core::operation::{apply_all, compact};
use olist_core::{CheckItem, Operation};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const QUEUE_SIZES: [usize; 3] = [64, 1_024, 16_384];

/// Random queue over `texts` distinct item texts.
fn synthetic_queue(len: usize, texts: usize, seed: u64) -> Vec<Operation> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|_| {
            let item = CheckItem::new(format!("item-{}", rng.gen_range(0..texts)), rng.gen_bool(0.5));
            match rng.gen_range(0..3) {
                0 => Operation::Add(item),
                1 => Operation::Remove(item),
                _ => Operation::Toggle(item),
            }
        })
        .collect()
}

fn bench_compaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("compaction");

    for len in QUEUE_SIZES {
        group.throughput(Throughput::Elements(len as u64));

        // Few texts: long merge chains. Many texts: mostly survivors.
        for (label, texts) in [("dense", 8), ("sparse", len)] {
            let queue = synthetic_queue(len, texts, 0x0115_7000 + len as u64);
            group.bench_with_input(
                BenchmarkId::new(label, len),
                &queue,
                |b, queue| b.iter(|| black_box(compact(queue.clone()))),
            );
        }
    }

    group.finish();
}

fn bench_rebase(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebase");

    for len in QUEUE_SIZES {
        let snapshot: Vec<CheckItem> = (0..len)
            .map(|i| CheckItem::new(format!("item-{i}"), i % 3 == 0))
            .collect();
        let queue = synthetic_queue(len / 8, len, 0xBA5E + len as u64);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &queue, |b, queue| {
            b.iter(|| black_box(apply_all(queue.iter(), &snapshot)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compaction, bench_rebase);
criterion_main!(benches);
