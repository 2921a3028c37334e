//! Classification, screening and normalization microbench.
//!
//! Run with:
//! `cargo bench --bench classification`

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;
use upload_ingest::ingestion::{Classifier, TextNormalizer, TextSource, contains_unsafe_markup};

const TABULAR_LINES: usize = 20_000;

fn tabular_text(line_ending: &str) -> String {
    (0..TABULAR_LINES)
        .map(|i| format!("chr{}\t{}\t{}{line_ending}", i % 22 + 1, i * 100, i * 100 + 50))
        .collect()
}

fn write_inputs(dir: &Path) -> Vec<(&'static str, PathBuf)> {
    let text = dir.join("plain.tsv");
    fs::write(&text, tabular_text("\n")).unwrap();

    let gz = dir.join("plain.tsv.gz");
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(tabular_text("\n").as_bytes()).unwrap();
    fs::write(&gz, enc.finish().unwrap()).unwrap();

    let binary = dir.join("trace.ab1");
    fs::write(&binary, (0..=255u8).cycle().take(64 * 1024).collect::<Vec<_>>()).unwrap();

    vec![("text", text), ("gzip", gz), ("binary", binary)]
}

fn bench_classify(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let inputs = write_inputs(dir.path());
    let classifier = Classifier::standard();

    let mut group = c.benchmark_group("classify");
    for (label, path) in &inputs {
        group.bench_with_input(BenchmarkId::from_parameter(label), path, |b, path| {
            b.iter(|| black_box(classifier.classify(path).unwrap()))
        });
    }
    group.finish();
}

fn bench_screen(c: &mut Criterion) {
    let clean = tabular_text("\n");
    let mut late_script = tabular_text("\n");
    late_script.push_str("<script>alert(1)</script>\n");

    let mut group = c.benchmark_group("screen");
    group.throughput(Throughput::Bytes(clean.len() as u64));
    group.bench_function("clean", |b| {
        b.iter(|| black_box(contains_unsafe_markup(TextSource::Chunk(clean.as_bytes())).unwrap()))
    });
    group.bench_function("script_after_limit", |b| {
        b.iter(|| black_box(contains_unsafe_markup(TextSource::Chunk(late_script.as_bytes())).unwrap()))
    });
    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("crlf.txt");
    let text = tabular_text("\r\n").replace('\t', "  ");
    fs::write(&source, &text).unwrap();
    let normalizer = TextNormalizer::new(dir.path());

    let mut group = c.benchmark_group("normalize");
    group.throughput(Throughput::Bytes(text.len() as u64));
    for space_to_tab in [false, true] {
        group.bench_with_input(
            BenchmarkId::new("copy", space_to_tab),
            &space_to_tab,
            |b, &space_to_tab| {
                b.iter(|| black_box(normalizer.normalize(&source, space_to_tab, false).unwrap()))
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_classify, bench_screen, bench_normalize);
criterion_main!(benches);
