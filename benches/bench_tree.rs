use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use interval_bin_tree::{ChrRange, GenomicInterval, InsertProps, IntervalTree, TraverseProps, TreeConfig};

fn sorted_intervals(count: i64, span: i64) -> Vec<Rc<GenomicInterval<()>>> {
    (0..count)
        .map(|i| Rc::new(GenomicInterval::new("chr1", i * span, i * span + span, ())))
        .collect()
}

fn bench_insert(c: &mut Criterion) {
    let range = ChrRange::new("chr1", 0, 1_000_000).unwrap();
    let data = sorted_intervals(10_000, 50);

    c.bench_function("insert_10k_sorted", |b| {
        b.iter_batched(
            || IntervalTree::new(range.clone(), TreeConfig::builder().branching_factor(64).build()),
            |mut tree| {
                let mut props = InsertProps {
                    add_new: true,
                    ..Default::default()
                };
                tree.insert(&range, black_box(&data), &mut props).unwrap();
            },
            BatchSize::LargeInput,
        )
    });
}

fn bench_traverse(c: &mut Criterion) {
    let range = ChrRange::new("chr1", 0, 1_000_000).unwrap();
    let data = sorted_intervals(10_000, 50);
    let mut tree = IntervalTree::new(range.clone(), TreeConfig::builder().branching_factor(64).build());
    let mut props = InsertProps {
        add_new: true,
        ..Default::default()
    };
    tree.insert(&range, &data, &mut props).unwrap();

    c.bench_function("traverse_full_range", |b| {
        b.iter(|| {
            let mut tprops = TraverseProps::default();
            tprops.do_not_wither = true;
            tprops.data_callback = Some(Box::new(|e: &Rc<GenomicInterval<()>>| {
                black_box(e.start);
                true
            }));
            tree.traverse(black_box(&range), &mut tprops).unwrap();
        })
    });
}

criterion_group!(benches, bench_insert, bench_traverse);
criterion_main!(benches);
