//! Performance benchmarks for rating calculation and match recording

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rating_ladder::ladder::MatchRecorder;
use rating_ladder::rating::compute_new_ratings;
use rating_ladder::storage::{InMemoryMatchStore, MatchStore};
use rating_ladder::types::{MatchReport, PlayerId};
use std::sync::Arc;

fn bench_rating_calculations(c: &mut Criterion) {
    c.bench_function("elo_equal_ratings", |b| {
        b.iter(|| black_box(compute_new_ratings(black_box(1500), black_box(1500), true)))
    });

    c.bench_function("elo_rating_spread", |b| {
        b.iter(|| {
            for gap in (0..800).step_by(50) {
                black_box(compute_new_ratings(1500 + gap, 1500 - gap, gap % 100 == 0));
            }
        })
    });
}

fn bench_record_match(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let store = Arc::new(InMemoryMatchStore::new());
    rt.block_on(async {
        for i in 0..16 {
            store.create_player(&format!("player_{}", i)).await.unwrap();
        }
    });
    let recorder = MatchRecorder::new(store);

    let mut round: i64 = 0;
    c.bench_function("record_match_in_memory", |b| {
        b.iter(|| {
            round += 1;
            let p1 = round % 16 + 1;
            let p2 = (round * 7 + 3) % 16 + 1;
            let p2 = if p2 == p1 { p1 % 16 + 1 } else { p2 };
            let report = MatchReport::new(PlayerId::new(p1), PlayerId::new(p2), PlayerId::new(p1));

            rt.block_on(async { black_box(recorder.record_match(&report).await) })
        })
    });
}

fn bench_refused_report(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let recorder = MatchRecorder::new(Arc::new(InMemoryMatchStore::new()));
    let report = MatchReport::new(PlayerId::new(3), PlayerId::new(3), PlayerId::new(3));

    c.bench_function("refused_self_match", |b| {
        b.iter(|| rt.block_on(async { black_box(recorder.record_match(&report).await) }))
    });
}

criterion_group!(
    benches,
    bench_rating_calculations,
    bench_record_match,
    bench_refused_report
);
criterion_main!(benches);
