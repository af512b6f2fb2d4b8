//! Engine Integration Tests
//!
//! End-to-end behavior across the facade:
//! - Change-log stream: exactly one event per mutation, in epoch order,
//!   before the mutating call returns
//! - Cooperative cancellation surfaces as SearchCancelled
//! - Causal edge storage and retrieval
//! - Export/import round trip
//! - Degraded-backend fallback keeps the engine usable

use smriti::backend::{Metadata, MetadataSchema, RecordId, SearchRequest, VectorRecord};
use smriti::cancel::CancelToken;
use smriti::changelog::ChangeOperation;
use smriti::collection::VectorCollection;
use smriti::config::{BackendKind, CacheConfig, CollectionConfig, EngineConfig};
use smriti::memory::types::CausalEdge;
use smriti::memory::MemoryEngine;
use std::time::Duration;
use tempfile::TempDir;

fn engine_with(backend: BackendKind) -> (MemoryEngine, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let mut config = EngineConfig {
        data_dir: dir.path().to_path_buf(),
        ..EngineConfig::default()
    };
    config.collection.backend = backend;
    config.collection.dimensions = 64;
    let engine = MemoryEngine::new(config).expect("engine");
    (engine, dir)
}

fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
    VectorRecord::new(RecordId::from(id), vector, Metadata::new())
}

fn unit_vector(dimensions: usize, seed: usize) -> Vec<f32> {
    (0..dimensions)
        .map(|j| ((seed * dimensions + j) as f32).sin())
        .collect()
}

// =============================================================================
// CHANGE LOG
// =============================================================================

#[test]
fn test_changelog_exactly_one_event_per_mutation_in_epoch_order() {
    let (engine, _dir) = engine_with(BackendKind::Embedded);
    let vectors = engine.vectors();
    let rx = vectors.changelog().subscribe();

    vectors.insert(record("a", unit_vector(64, 1))).unwrap();
    let report = vectors.batch_insert(vec![
        record("b", unit_vector(64, 2)),
        record("c", unit_vector(64, 3)),
    ]);
    assert!(report.all_ok());
    vectors.delete(&RecordId::from("b")).unwrap();

    // Events are already delivered: emission happens before the mutating
    // call returns.
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.len(), 4);

    let epochs: Vec<u64> = events.iter().map(|e| e.epoch).collect();
    assert_eq!(epochs, vec![1, 2, 3, 4], "strict epoch order");
    assert_eq!(vectors.epoch(), 4);

    assert_eq!(events[0].operation, ChangeOperation::Insert);
    assert_eq!(events[3].operation, ChangeOperation::Delete);
    assert_eq!(events[3].id.as_str(), "b");
    assert!(events.iter().all(|e| e.collection == "vectors"));
}

#[test]
fn test_failed_mutations_emit_nothing() {
    let (engine, _dir) = engine_with(BackendKind::Embedded);
    let vectors = engine.vectors();
    let rx = vectors.changelog().subscribe();

    assert!(vectors.insert(record("bad", vec![1.0, 2.0])).is_err());
    assert!(vectors.delete(&RecordId::from("ghost")).is_err());

    assert_eq!(rx.try_iter().count(), 0);
    assert_eq!(vectors.epoch(), 0);
}

#[test]
fn test_pattern_usage_side_effect_flows_through_changelog() {
    let (engine, _dir) = engine_with(BackendKind::Embedded);
    let rx = engine.patterns().collection().changelog().subscribe();

    engine
        .patterns()
        .store(smriti::memory::types::Pattern::new(
            "debug",
            "bisect commit history",
        ))
        .unwrap();
    engine
        .patterns()
        .search("bisect commit history", 1, 0.3)
        .unwrap();

    // One event for the store, one for the uses bump.
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.operation == ChangeOperation::Insert));
}

// =============================================================================
// CANCELLATION
// =============================================================================

#[test]
fn test_pre_cancelled_search_returns_search_cancelled() {
    let (engine, _dir) = engine_with(BackendKind::Embedded);
    for i in 0..50 {
        engine
            .vectors()
            .insert(record(&format!("r{i}"), unit_vector(64, i)))
            .unwrap();
    }

    let token = CancelToken::never();
    token.cancel();
    let err = engine
        .vectors()
        .search(SearchRequest::new(unit_vector(64, 3), 5).with_cancel(token))
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[test]
fn test_expired_deadline_cancels() {
    let (engine, _dir) = engine_with(BackendKind::Embedded);
    for i in 0..50 {
        engine
            .vectors()
            .insert(record(&format!("r{i}"), unit_vector(64, i)))
            .unwrap();
    }

    let token = CancelToken::with_timeout(Duration::from_millis(0));
    std::thread::sleep(Duration::from_millis(2));
    let err = engine
        .vectors()
        .search(SearchRequest::new(unit_vector(64, 3), 5).with_cancel(token))
        .unwrap_err();
    assert!(err.is_cancelled());
}

// =============================================================================
// CAUSAL EDGES
// =============================================================================

#[test]
fn test_causal_edges_store_and_search() {
    let (engine, _dir) = engine_with(BackendKind::Embedded);
    engine
        .causal_edges()
        .store(
            CausalEdge::new(
                "add-regression-test",
                "fewer-bug-reports",
                "adding a regression test reduces repeat bug reports",
            )
            .with_estimate(0.35, 0.8),
        )
        .unwrap();
    engine
        .causal_edges()
        .store(
            CausalEdge::new(
                "increase-cache-size",
                "lower-latency",
                "larger cache lowers tail latency",
            )
            .with_estimate(0.12, 0.6),
        )
        .unwrap();

    let hits = engine
        .causal_edges()
        .search("does a regression test reduce repeat bug reports", 2)
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].edge.cause_id, "add-regression-test");
    assert!((hits[0].edge.uplift_estimate - 0.35).abs() < 1e-6);
}

#[test]
fn test_learner_reestimates_upsert_same_edge() {
    let (engine, _dir) = engine_with(BackendKind::Embedded);
    let edge = CausalEdge::new("a", "b", "a improves b");

    let first = engine
        .causal_edges()
        .store(edge.clone().with_estimate(0.1, 0.3))
        .unwrap();
    let second = engine
        .causal_edges()
        .store(edge.with_estimate(0.4, 0.9))
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(engine.causal_edges().collection().stats().count, 1);
}

// =============================================================================
// EXPORT / IMPORT
// =============================================================================

#[test]
fn test_export_import_round_trip_preserves_search_results() {
    let (engine, _dir) = engine_with(BackendKind::Embedded);
    for i in 0..20 {
        engine
            .vectors()
            .insert(record(&format!("r{i}"), unit_vector(64, i)))
            .unwrap();
    }

    let dump_dir = TempDir::new().unwrap();
    let dump = dump_dir.path().join("vectors.json");
    assert_eq!(engine.vectors().export_to_json(&dump).unwrap(), 20);

    let (restored, _dir2) = engine_with(BackendKind::Embedded);
    let report = restored.vectors().import_from_json(&dump).unwrap();
    assert!(report.all_ok());

    let query = unit_vector(64, 7);
    let before = engine
        .vectors()
        .search(SearchRequest::new(query.clone(), 5))
        .unwrap();
    let after = restored
        .vectors()
        .search(SearchRequest::new(query, 5))
        .unwrap();
    let ids_before: Vec<_> = before.iter().map(|h| h.id.clone()).collect();
    let ids_after: Vec<_> = after.iter().map(|h| h.id.clone()).collect();
    assert_eq!(ids_before, ids_after);
}

// =============================================================================
// DEGRADED FALLBACK
// =============================================================================

#[test]
fn test_engine_survives_unavailable_rocks_backend() {
    let dir = TempDir::new().unwrap();
    // Occupy the vectors collection path with a file so RocksDB cannot open.
    std::fs::write(dir.path().join("vectors"), b"blocked").unwrap();

    let mut config = EngineConfig {
        data_dir: dir.path().to_path_buf(),
        ..EngineConfig::default()
    };
    config.collection.backend = BackendKind::Rocks;
    config.collection.dimensions = 8;

    let engine = MemoryEngine::new(config).expect("engine must start degraded, not fail");
    assert_eq!(
        engine.vectors().active_kind(),
        BackendKind::Embedded,
        "vectors collection should have fallen back"
    );

    engine
        .vectors()
        .insert(record("a", vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]))
        .unwrap();
    let hits = engine
        .vectors()
        .search(SearchRequest::new(
            vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            1,
        ))
        .unwrap();
    assert_eq!(hits[0].id.as_str(), "a");
}

// =============================================================================
// MULTI-COLLECTION ISOLATION
// =============================================================================

#[test]
fn test_tables_are_isolated() {
    let (engine, _dir) = engine_with(BackendKind::Embedded);
    engine
        .patterns()
        .store(smriti::memory::types::Pattern::new("debug", "bisect"))
        .unwrap();
    engine
        .episodes()
        .store(smriti::memory::types::Episode::new("s", "task", "in", "out"))
        .unwrap();

    let stats = engine.stats();
    assert_eq!(stats.vectors.count, 0);
    assert_eq!(stats.patterns.count, 1);
    assert_eq!(stats.episodes.count, 1);
    assert_eq!(stats.skills.count, 0);
    assert_eq!(stats.causal_edges.count, 0);
}

// =============================================================================
// NATIVE DISPATCH TIMEOUT
// =============================================================================

#[test]
fn test_native_backend_search_respects_engine_timeout() {
    let dir = TempDir::new().unwrap();
    let collection = VectorCollection::open(
        "timed",
        CollectionConfig::with_dimensions(8).with_backend(BackendKind::HnswLib),
        MetadataSchema::permissive(),
        &CacheConfig::default(),
        Some(smriti::dispatch::NativeCallPool::new(1)),
        Duration::from_millis(250),
        dir.path(),
    );
    assert_eq!(collection.active_kind(), BackendKind::HnswLib);

    for i in 0..20 {
        collection
            .insert(record(&format!("r{i}"), unit_vector(8, i)))
            .unwrap();
    }

    // A healthy search completes well inside the timeout.
    let hits = collection
        .search(SearchRequest::new(unit_vector(8, 3), 3))
        .unwrap();
    assert_eq!(hits.len(), 3);

    // A pre-cancelled token short-circuits inside the dispatched call. A
    // fresh query vector keeps the warm cache entry above out of the way.
    let token = CancelToken::never();
    token.cancel();
    let err = collection
        .search(SearchRequest::new(unit_vector(8, 5), 3).with_cancel(token))
        .unwrap_err();
    assert!(err.is_cancelled());
}
