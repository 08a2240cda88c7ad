use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use datapulse::data::Dataset;
use datapulse::infer::SERIAL_UPPER_DEFAULT;
use datapulse::{infer, ingest, normalize};

fn generate_upload(rows: usize) -> String {
    let mut csv = String::from("order_id,region,revenue,ordered_at,note\n");
    for i in 0..rows {
        let region = match i % 4 {
            0 => "north",
            1 => "south",
            2 => "east",
            _ => "west",
        };
        let day = (i % 28) + 1;
        let revenue = 100.0 + (i % 900) as f64;
        csv.push_str(&format!(
            "{i},{region},{revenue:.2},2024-01-{day:02},order {i} fulfilled\n"
        ));
    }
    csv
}

fn parse(rows: usize) -> Dataset {
    ingest::from_csv_str("orders", &generate_upload(rows)).expect("parse upload")
}

fn bench_infer_and_normalize(c: &mut Criterion) {
    let dataset = parse(20_000);
    let mut group = c.benchmark_group("pipeline");

    group.bench_function("infer_20k_rows", |b| {
        b.iter(|| black_box(infer::infer_dataset(black_box(&dataset))));
    });

    let kinds = infer::infer_dataset(&dataset);
    group.bench_function("normalize_20k_rows", |b| {
        b.iter(|| {
            normalize::normalize_with(black_box(&dataset), &kinds, SERIAL_UPPER_DEFAULT)
                .expect("normalize")
        });
    });

    group.finish();
}

criterion_group!(benches, bench_infer_and_normalize);
criterion_main!(benches);
