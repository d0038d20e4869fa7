//! Criterion benchmarks for the barrels storage engine.
//!
//! Covers the hot paths of the engine:
//! - Chunk encoding and decoding for both codecs
//! - Deletion bitset compression
//! - Posting reads from a flushed barrel
//! - Barrel merging

use std::hint::black_box;
use std::sync::Arc;

use barrels::barrel::FieldOccurrences;
use barrels::bitset::Bitset;
use barrels::config::{Codec, IndexConfig, MergeStrategy};
use barrels::index::Index;
use barrels::posting::chunk::encode_chunk;
use barrels::posting::ChunkDecoder;
use barrels::storage::{MemoryStorage, Storage};
use barrels::types::DocId;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Generate one chunk of increasing doc ids with small frequencies.
fn generate_chunk(count: usize, seed: u64) -> (Vec<DocId>, Vec<u32>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut doc = 0;
    let mut docs = Vec::with_capacity(count);
    let mut freqs = Vec::with_capacity(count);
    for _ in 0..count {
        doc += rng.random_range(1..40);
        docs.push(doc);
        freqs.push(rng.random_range(1..8));
    }
    (docs, freqs)
}

/// Generate token streams over a small vocabulary.
fn generate_documents(count: usize) -> Vec<Vec<String>> {
    let words = [
        "barrel", "posting", "chunk", "skip", "merge", "cache", "block", "term", "field",
        "vocabulary", "bitset", "delete", "flush", "codec", "reader", "writer",
    ];
    (0..count)
        .map(|i| {
            let len = 20 + (i % 30);
            (0..len)
                .map(|j| words[(i * 7 + j * 13) % words.len()].to_string())
                .collect()
        })
        .collect()
}

fn build_index(docs: &[Vec<String>], barrels: usize, config: IndexConfig) -> Index {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let index = Index::open(storage, config).unwrap();
    let per_barrel = docs.len().div_ceil(barrels);
    for (id, tokens) in docs.iter().enumerate() {
        index
            .add_document(
                id as DocId,
                0,
                &[FieldOccurrences::from_tokens("body", tokens.iter().cloned())],
            )
            .unwrap();
        if (id + 1) % per_barrel == 0 {
            index.flush().unwrap();
        }
    }
    index.commit().unwrap();
    index
}

/// Benchmark chunk encoding and decoding.
fn bench_chunk_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_codec");
    let (docs, freqs) = generate_chunk(128, 7);
    group.throughput(Throughput::Elements(docs.len() as u64));

    for codec in [Codec::VByte, Codec::BitPacked] {
        let mut payload = Vec::new();
        encode_chunk(codec, 0, &docs, &freqs, &mut payload);

        group.bench_function(format!("encode_{codec:?}"), |b| {
            let mut out = Vec::with_capacity(payload.len());
            b.iter(|| {
                out.clear();
                encode_chunk(codec, 0, black_box(&docs), black_box(&freqs), &mut out);
                black_box(out.len())
            })
        });

        group.bench_function(format!("decode_{codec:?}"), |b| {
            let mut decoder = ChunkDecoder::new();
            b.iter(|| {
                decoder.decode_doc_ids(codec, black_box(&payload), 0).unwrap();
                decoder.decode_frequencies(&payload, None).unwrap();
                black_box(decoder.len())
            })
        });
    }
    group.finish();
}

/// Benchmark deletion bitset compression.
fn bench_bitset(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitset");
    let mut rng = StdRng::seed_from_u64(11);
    let mut bitset = Bitset::with_size(1_000_000);
    for _ in 0..5_000 {
        let start = rng.random_range(0..999_000);
        bitset.set_range(start, start + rng.random_range(1..64));
    }
    let compressed = bitset.compress();

    group.bench_function("compress", |b| b.iter(|| black_box(bitset.compress())));
    group.bench_function("decompress", |b| {
        b.iter(|| black_box(Bitset::decompress(&compressed).unwrap()))
    });
    group.bench_function("count_range", |b| {
        b.iter(|| black_box(bitset.count_range(black_box(1_000), black_box(900_000))))
    });
    group.finish();
}

/// Benchmark posting reads through the index reader.
fn bench_postings(c: &mut Criterion) {
    let mut group = c.benchmark_group("postings");
    let docs = generate_documents(5_000);
    let index = build_index(&docs, 4, IndexConfig::default());
    let reader = index.reader().unwrap();

    group.throughput(Throughput::Elements(reader.doc_freq("body", "barrel").unwrap()));
    group.bench_function("read_term", |b| {
        b.iter(|| black_box(reader.postings("body", black_box("barrel")).unwrap().len()))
    });
    group.bench_function("read_positions", |b| {
        b.iter(|| black_box(reader.positions("body", black_box("merge")).unwrap().len()))
    });
    group.finish();
}

/// Benchmark barrel merging.
fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    group.sample_size(10);
    let docs = generate_documents(2_000);
    group.throughput(Throughput::Elements(docs.len() as u64));

    for strategy in [MergeStrategy::Streaming, MergeStrategy::Sorting] {
        group.bench_function(format!("merge_four_barrels_{strategy:?}"), |b| {
            b.iter_with_setup(
                || {
                    let mut config = IndexConfig::default();
                    config.merge.strategy = strategy;
                    let index = build_index(&docs, 4, config);
                    for doc in (0..docs.len() as DocId).step_by(97) {
                        index.delete_document(doc);
                    }
                    let names: Vec<String> =
                        index.barrels().into_iter().map(|barrel| barrel.name).collect();
                    (index, names)
                },
                |(index, names)| black_box(index.merge(&names).unwrap()),
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chunk_codec, bench_bitset, bench_postings);

// Separate group for slower benchmarks
criterion_group!(slow_benches, bench_merge);

criterion_main!(benches, slow_benches);
