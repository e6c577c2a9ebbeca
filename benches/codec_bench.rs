use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use quire::doc_values::DocValuesWriter;
use quire::segment::{IndexDocument, SegmentBuilder, SegmentReader, delete_documents};
use quire::storage::memory::MemoryStorageConfig;
use quire::storage::{StorageConfig, StorageFactory};
use quire::{CodecConfig, SegmentMerger};

const WORDS: [&str; 16] = [
    "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india", "juliet",
    "kilo", "lima", "mike", "november", "oscar", "papa",
];

fn generate_document(i: usize) -> IndexDocument {
    let words: Vec<&str> = (0..8).map(|j| WORDS[(i * 7 + j * 3) % WORDS.len()]).collect();
    IndexDocument::new().with_text("body", words)
}

fn bench_numeric_doc_values(c: &mut Criterion) {
    let mut group = c.benchmark_group("Numeric Doc Values");
    let count = 100_000usize;
    let columns: [(&str, Vec<i64>); 3] = [
        ("table", (0..count as i64).map(|i| i % 13).collect()),
        ("gcd", (0..count as i64).map(|i| 1_000 + i * 250).collect()),
        ("delta", (0..count as i64).map(|i| i * 31 + (i % 5)).collect()),
    ];

    group.throughput(Throughput::Elements(count as u64));
    for (name, values) in columns.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(name), values, |b, values| {
            b.iter(|| {
                let storage_config = StorageConfig::Memory(MemoryStorageConfig::default());
                let storage = StorageFactory::create(storage_config).unwrap();
                let mut writer = DocValuesWriter::new(
                    &storage,
                    "bench.dvm",
                    "bench.dvd",
                    count as u32,
                    CodecConfig::default(),
                )
                .unwrap();
                writer.add_numeric(0, values).unwrap();
                writer.finish().unwrap();
            })
        });
    }
    group.finish();
}

fn bench_segment_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("Segment Merge");
    group.sample_size(10);
    let segment_counts = [2usize, 8];
    let docs_per_segment = 2_000usize;

    for segments in segment_counts.iter() {
        group.throughput(Throughput::Elements((segments * docs_per_segment) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(segments),
            segments,
            |b, &segments| {
                // Setup segments once
                let storage_config = StorageConfig::Memory(MemoryStorageConfig::default());
                let storage = StorageFactory::create(storage_config).unwrap();
                let mut readers = Vec::new();
                for s in 0..segments {
                    let name = format!("_s{s}");
                    let mut builder =
                        SegmentBuilder::new(storage.clone(), &name, CodecConfig::default())
                            .unwrap();
                    for i in 0..docs_per_segment {
                        builder.add_document(generate_document(s * docs_per_segment + i)).unwrap();
                    }
                    builder.flush().unwrap();
                    let deleted: Vec<u32> = (0..docs_per_segment as u32).step_by(10).collect();
                    delete_documents(&storage, &name, &deleted).unwrap();
                    readers.push(SegmentReader::open(&storage, &name).unwrap());
                }
                let merger = SegmentMerger::new(storage.clone(), CodecConfig::default()).unwrap();

                let mut round = 0usize;
                b.iter(|| {
                    round += 1;
                    merger.merge(&readers, &format!("_m{round}")).unwrap();
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_numeric_doc_values, bench_segment_merge);
criterion_main!(benches);
