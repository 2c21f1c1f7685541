//! Container write and split throughput.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use datavault::container::{ContainerHeader, DatasetFile, ImageHeader};

const ROW_WIDTH: usize = 28 * 28 + 10;

fn image_header(rows: u64) -> ContainerHeader {
    ContainerHeader::Image(ImageHeader::new(28, 28, 10, rows))
}

fn bench_add_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_block");
    let dir = tempfile::tempdir().unwrap();

    for rows in [1usize, 100, 1000] {
        let values = vec![0.5f32; rows * ROW_WIDTH];
        let path = dir.path().join(format!("add-{}", rows));
        let file = DatasetFile::create(path, "bench", image_header(rows as u64)).unwrap();
        group.throughput(Throughput::Bytes((values.len() * 4) as u64));

        group.bench_with_input(BenchmarkId::new("rows", rows), &values, |bench, values| {
            bench.iter(|| file.add_block(0, black_box(values)).unwrap());
        });
    }

    group.finish();
}

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("split");
    let dir = tempfile::tempdir().unwrap();

    for rows in [100u64, 1000] {
        let values = vec![0.25f32; rows as usize * ROW_WIDTH];
        group.throughput(Throughput::Elements(rows));

        group.bench_with_input(BenchmarkId::new("rows", rows), &rows, |bench, &rows| {
            bench.iter(|| {
                let path = dir.path().join("split-src");
                let mut file = DatasetFile::create(&path, "bench", image_header(rows)).unwrap();
                file.add_block(0, &values).unwrap();
                let part2 = file.split(black_box(0.8), dir.path().join("split-dst")).unwrap();
                black_box(part2.row_count())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_add_block, bench_split);
criterion_main!(benches);
