use std::hint::black_box;

use chrono::Utc;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use immatch::ranker::{RankOptions, normalized_distance, rank};
use immatch::record::{Hit, RecordId, StoredRecord};
use immatch::signature::WordsConfig;
use rand::prelude::*;

const DIM: usize = 544;

fn random_vector(rng: &mut impl Rng) -> Vec<f32> {
    (0..DIM).map(|_| rng.random_range(-1.0..1.0)).collect()
}

fn bench_distance(c: &mut Criterion) {
    let mut group = c.benchmark_group("Distance");
    let mut rng = rand::rng();
    let query = random_vector(&mut rng);
    let targets = (0..1000).map(|_| random_vector(&mut rng)).collect::<Vec<_>>();

    group.throughput(Throughput::Elements(targets.len() as u64));
    group.bench_function("normalized_distance", |b| {
        b.iter(|| targets.iter().map(|t| normalized_distance(&query, t)).sum::<f32>());
    });

    let hits = targets
        .iter()
        .enumerate()
        .map(|(i, t)| Hit {
            score: 1.,
            record: StoredRecord {
                id: RecordId(i.to_string()),
                key: i.to_string(),
                signature: t.clone(),
                metadata: None,
                created_at: Utc::now(),
            },
        })
        .collect::<Vec<_>>();
    let options = RankOptions { distance_cutoff: 1., sort_by_distance: true };
    group.bench_function("rank_sorted", |b| {
        b.iter(|| rank(black_box(hits.clone()), &query, options));
    });
    group.finish();
}

fn bench_words(c: &mut Criterion) {
    let mut rng = rand::rng();
    let vector = random_vector(&mut rng);
    let config = WordsConfig::default();
    c.bench_function("derive_words", |b| b.iter(|| config.derive(black_box(&vector))));
}

criterion_group!(benches, bench_distance, bench_words);
criterion_main!(benches);
