//! Benchmark tests for roll-core operations
//!
//! Run with: cargo bench -p roll-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use roll_core::config::scale_for_rotation;
use roll_core::heuristic::{Candidate, RealPlayerHeuristic};
use roll_core::looper::parse_timestamp;
use roll_core::scanner::Scanner;
use roll_core::sim::{SimCapture, SimDocument, SimMedia};
use roll_core::site::VideoSelector;
use roll_core::types::*;
use roll_core::{DocumentRef, EngineConfig, Inbound, PersistedState, RollEngine};

// ============================================================================
// Helpers
// ============================================================================

fn create_candidates(count: usize) -> Vec<Candidate> {
    (0..count)
        .map(|i| {
            let snapshot = PlaybackSnapshot {
                ready_state: 4,
                current_time: if i == count / 2 { 12.0 } else { 0.0 },
                paused: i != count / 2,
                muted: i % 3 == 0,
                rendered: Dimensions::new(320.0 + i as f64 * 10.0, 180.0 + i as f64 * 5.0),
                intrinsic: Dimensions::new(1280.0, 720.0),
                ..Default::default()
            };
            Candidate::new(MediaId(format!("media-{}", i)), snapshot)
        })
        .collect()
}

fn create_page(media_per_frame: usize, frames: usize) -> DocumentRef {
    let root = Arc::new(SimDocument::new("bench"));
    for _ in 0..media_per_frame {
        root.add_media(Arc::new(SimMedia::new(640.0, 360.0)));
    }
    for f in 0..frames {
        let frame = Arc::new(SimDocument::new(format!("frame {}", f)));
        for _ in 0..media_per_frame {
            frame.add_media(Arc::new(SimMedia::new(640.0, 360.0)));
        }
        root.add_frame(format!("https://player.example.org/{}", f), frame);
    }
    root
}

// ============================================================================
// Heuristic Benchmarks
// ============================================================================

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("Real Player Classification");

    for &count in &[1, 4, 16, 64] {
        let candidates = create_candidates(count);
        group.bench_with_input(BenchmarkId::new("classify", count), &candidates, |b, candidates| {
            let mut heuristic = RealPlayerHeuristic::new();
            b.iter(|| black_box(heuristic.classify(black_box(candidates), None)));
        });
    }

    group.finish();
}

// ============================================================================
// Scanner Benchmarks
// ============================================================================

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("Document Scan");
    let selector = VideoSelector::default();

    for &(media, frames) in &[(1, 0), (4, 2), (8, 6)] {
        let page = create_page(media, frames);
        let scanner = Scanner::new();
        group.bench_with_input(
            BenchmarkId::new("scan", format!("{}x{}", media, frames + 1)),
            &page,
            |b, page| {
                b.iter(|| black_box(scanner.scan(page, &selector).elements.len()));
            },
        );
    }

    group.finish();
}

// ============================================================================
// Loop Benchmarks
// ============================================================================

fn bench_parse_timestamp(c: &mut Criterion) {
    let mut group = c.benchmark_group("Timestamp Parsing");

    for input in ["42", "03:25", "01:02:03.500"] {
        group.bench_with_input(BenchmarkId::new("parse_timestamp", input), input, |b, input| {
            b.iter(|| black_box(parse_timestamp(black_box(input))))
        });
    }

    group.finish();
}

fn bench_scale_for_rotation(c: &mut Criterion) {
    let container = Dimensions::new(1280.0, 720.0);
    let intrinsic = Dimensions::new(1920.0, 1080.0);

    c.bench_function("scale_for_rotation", |b| {
        b.iter(|| {
            for deg in [0u16, 90, 180, 270] {
                black_box(scale_for_rotation(container, intrinsic, deg));
            }
        })
    });
}

// ============================================================================
// Engine Benchmarks
// ============================================================================

fn bench_engine_rescan(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let (engine, mut channels) = RollEngine::new(EngineConfig::default(), Arc::new(SimCapture::new()));
    rt.block_on(async {
        engine
            .open_tab(TabId(1), create_page(4, 2), &PersistedState::new("https://example.org/"))
            .await
            .unwrap();
    });

    c.bench_function("engine_request_rescan", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine
                    .handle(Inbound::RequestRescan { tab_id: TabId(1) })
                    .await
                    .unwrap();
            });
            while channels.notifications.try_recv().is_ok() {}
        })
    });
}

criterion_group!(heuristic_benches, bench_classify);

criterion_group!(scanner_benches, bench_scan);

criterion_group!(loop_benches, bench_parse_timestamp, bench_scale_for_rotation);

criterion_group!(engine_benches, bench_engine_rescan);

criterion_main!(heuristic_benches, scanner_benches, loop_benches, engine_benches);
