use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vellum_core::history::FileRef;
use vellum_core::{Change, History, HistoryConfig, Operation, TextOperation, timestamp};

const DOC_SIZES: [usize; 3] = [1_000, 10_000, 100_000];

fn document(len: usize) -> String {
    "lorem ipsum dolor sit amet\n".chars().cycle().take(len).collect()
}

/// A scattered edit: a handful of short inserts and removes across the text.
fn scattered_edit(rng: &mut StdRng, len: usize) -> TextOperation {
    let mut op = TextOperation::new();
    let mut cursor = 0;
    for _ in 0..8 {
        let skip = rng.gen_range(0..=(len - cursor) / 8);
        op = op.retain(skip).insert("edit");
        cursor += skip;
        let cut = rng.gen_range(0..=(len - cursor).min(4));
        op = op.remove(cut);
        cursor += cut;
    }
    op.retain(len - cursor)
}

fn bench_algebra(c: &mut Criterion) {
    let mut group = c.benchmark_group("text_operation");
    for size in DOC_SIZES {
        let text = document(size);
        let mut rng = StdRng::seed_from_u64(0x7e57 + size as u64);
        let a = scattered_edit(&mut rng, size);
        let b = scattered_edit(&mut rng, a.target_length());
        let concurrent = scattered_edit(&mut rng, size);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("apply", size), &text, |bench, text| {
            bench.iter(|| black_box(a.apply_to_string(text)));
        });
        group.bench_with_input(BenchmarkId::new("compose", size), &(&a, &b), |bench, (a, b)| {
            bench.iter(|| black_box(a.compose(b)));
        });
        group.bench_with_input(
            BenchmarkId::new("transform", size),
            &(&a, &concurrent),
            |bench, (a, other)| bench.iter(|| black_box(TextOperation::transform(a, other))),
        );
    }
    group.finish();
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("history.replay");
    for changes in [10_u64, 100, 500] {
        let mut config = HistoryConfig::default();
        config.chunking.max_changes_per_chunk = changes + 1;
        let history = History::in_memory(config).expect("history");
        let project = history.create_project().expect("project");
        let blob = history.blobs().put_string("").expect("blob");
        history
            .writer()
            .persist_changes(
                project,
                0,
                &[Change::new(
                    vec![Operation::add("main.tex", FileRef::from_blob(&blob))],
                    timestamp::now(),
                )],
            )
            .expect("add");
        for version in 1..changes {
            let len = usize::try_from(version - 1).expect("small") * 5;
            let edit = TextOperation::new().retain(len).insert("line\n");
            history
                .writer()
                .persist_changes(
                    project,
                    version,
                    &[Change::new(vec![Operation::edit("main.tex", edit)], timestamp::now())],
                )
                .expect("edit");
        }

        group.throughput(Throughput::Elements(changes));
        group.bench_function(BenchmarkId::new("latest", changes), |bench| {
            bench.iter(|| black_box(history.assembler().get_latest_snapshot(project)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_algebra, bench_replay);
criterion_main!(benches);
