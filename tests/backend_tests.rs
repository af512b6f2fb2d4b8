//! Backend Contract Tests
//!
//! Conformance of all three backends against the shared contract:
//! - Self-retrieval (scenario: 1,000 random 128-dim cosine vectors)
//! - Portable/accelerated top-1 agreement on a fixed dataset
//! - Delete visibility without the cache in the way
//! - Upsert and batch partial-failure semantics
//! - Degraded fallback when an accelerated backend cannot initialize

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smriti::backend::embedded::EmbeddedBackend;
use smriti::backend::hnsw_native::HnswLibBackend;
use smriti::backend::rocks::RocksBackend;
use smriti::backend::{Metadata, RecordId, SearchRequest, VectorBackend, VectorRecord};
use smriti::config::{BackendKind, CollectionConfig, Metric};
use tempfile::TempDir;

fn random_vectors(seed: u64, count: usize, dimensions: usize) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..dimensions).map(|_| rng.gen::<f32>() - 0.5).collect())
        .collect()
}

fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
    VectorRecord::new(RecordId::from(id), vector, Metadata::new())
}

fn config(dimensions: usize) -> CollectionConfig {
    CollectionConfig::with_dimensions(dimensions)
}

/// Build each backend kind over the same dataset. The TempDir keeps the
/// rocks instance alive for the caller's scope.
fn all_backends(
    dimensions: usize,
    vectors: &[Vec<f32>],
) -> (Vec<(&'static str, Box<dyn VectorBackend>)>, TempDir) {
    let dir = TempDir::new().expect("temp dir");

    let embedded = EmbeddedBackend::new(config(dimensions));
    let hnsw = HnswLibBackend::new(config(dimensions)).expect("hnsw-lib backend");
    let rocks = RocksBackend::open(config(dimensions), &dir.path().join("rocks"))
        .expect("rocks backend");

    let backends: Vec<(&'static str, Box<dyn VectorBackend>)> = vec![
        ("embedded", Box::new(embedded)),
        ("hnsw-lib", Box::new(hnsw)),
        ("rocks", Box::new(rocks)),
    ];

    for (name, backend) in &backends {
        for (i, vector) in vectors.iter().enumerate() {
            backend
                .insert(record(&format!("v{i}"), vector.clone()))
                .unwrap_or_else(|e| panic!("{name} insert failed: {e}"));
        }
    }
    (backends, dir)
}

// =============================================================================
// SELF-RETRIEVAL
// =============================================================================

#[test]
fn test_scenario_a_self_retrieval_1000x128_cosine() {
    let vectors = random_vectors(7, 1000, 128);
    let backend = EmbeddedBackend::new(config(128));
    for (i, vector) in vectors.iter().enumerate() {
        backend.insert(record(&format!("v{i}"), vector.clone())).unwrap();
    }

    let hits = backend
        .search(&SearchRequest::new(vectors[37].clone(), 1))
        .unwrap();
    assert_eq!(hits[0].id.as_str(), "v37");
    assert!(
        hits[0].distance < 1e-6,
        "self distance was {}",
        hits[0].distance
    );
}

#[test]
fn test_self_retrieval_every_backend() {
    let vectors = random_vectors(11, 200, 32);
    let (backends, _dir) = all_backends(32, &vectors);

    for (name, backend) in &backends {
        for probe in [0usize, 37, 123, 199] {
            let hits = backend
                .search(&SearchRequest::new(vectors[probe].clone(), 1))
                .unwrap();
            assert_eq!(
                hits[0].id.as_str(),
                format!("v{probe}"),
                "{name} failed self-retrieval for v{probe}"
            );
            assert!(hits[0].distance < 1e-4, "{name} distance {}", hits[0].distance);
        }
    }
}

// =============================================================================
// BACKEND EQUIVALENCE
// =============================================================================

#[test]
fn test_portable_and_accelerated_agree_on_top1() {
    let dimensions = 32;
    let vectors = random_vectors(23, 400, dimensions);
    let queries = random_vectors(29, 60, dimensions);
    let (backends, _dir) = all_backends(dimensions, &vectors);

    // The portable backend is exact at this size.
    let exact = &backends[0].1;
    for (name, backend) in &backends[1..] {
        let mut agree = 0;
        for query in &queries {
            let expected = exact.search(&SearchRequest::new(query.clone(), 1)).unwrap();
            let actual = backend
                .search(&SearchRequest::new(query.clone(), 1))
                .unwrap();
            if expected[0].id == actual[0].id {
                agree += 1;
            }
        }
        assert!(
            agree * 100 >= queries.len() * 95,
            "{name} top-1 agreement too low: {agree}/{}",
            queries.len()
        );
    }
}

// =============================================================================
// DELETE VISIBILITY
// =============================================================================

#[test]
fn test_deleted_id_never_returned_any_backend() {
    let vectors = random_vectors(31, 100, 16);
    let (backends, _dir) = all_backends(16, &vectors);

    for (name, backend) in &backends {
        backend.delete(&RecordId::from("v7")).unwrap();
        let hits = backend
            .search(&SearchRequest::new(vectors[7].clone(), 20))
            .unwrap();
        assert!(
            hits.iter().all(|h| h.id.as_str() != "v7"),
            "{name} returned a deleted id"
        );
        assert_eq!(backend.stats().count, 99, "{name} count after delete");
    }
}

#[test]
fn test_delete_missing_id_is_not_found() {
    let (backends, _dir) = all_backends(8, &random_vectors(37, 10, 8));
    for (name, backend) in &backends {
        let err = backend.delete(&RecordId::from("missing")).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND", "{name}");
    }
}

// =============================================================================
// EDGE CASES
// =============================================================================

#[test]
fn test_k_larger_than_collection_returns_all() {
    let vectors = random_vectors(41, 5, 8);
    let (backends, _dir) = all_backends(8, &vectors);
    for (name, backend) in &backends {
        let hits = backend
            .search(&SearchRequest::new(vectors[0].clone(), 50))
            .unwrap();
        assert_eq!(hits.len(), 5, "{name}");
    }
}

#[test]
fn test_empty_collection_search_is_empty_not_error() {
    let dir = TempDir::new().unwrap();
    let backends: Vec<(&str, Box<dyn VectorBackend>)> = vec![
        ("embedded", Box::new(EmbeddedBackend::new(config(8)))),
        (
            "hnsw-lib",
            Box::new(HnswLibBackend::new(config(8)).unwrap()),
        ),
        (
            "rocks",
            Box::new(RocksBackend::open(config(8), &dir.path().join("rocks")).unwrap()),
        ),
    ];
    for (name, backend) in &backends {
        let hits = backend
            .search(&SearchRequest::new(vec![0.0; 8], 3))
            .unwrap();
        assert!(hits.is_empty(), "{name}");
    }
}

#[test]
fn test_dimension_mismatch_rejected_never_coerced() {
    let (backends, _dir) = all_backends(8, &random_vectors(43, 5, 8));
    for (name, backend) in &backends {
        let err = backend.insert(record("short", vec![1.0, 2.0])).unwrap_err();
        assert_eq!(err.code(), "DIMENSION_MISMATCH", "{name}");
        assert_eq!(backend.stats().count, 5, "{name} must not grow");

        let err = backend
            .search(&SearchRequest::new(vec![1.0, 2.0], 3))
            .unwrap_err();
        assert_eq!(err.code(), "DIMENSION_MISMATCH", "{name}");
    }
}

#[test]
fn test_batch_insert_reports_each_failure() {
    let (backends, _dir) = all_backends(4, &random_vectors(47, 3, 4));
    for (name, backend) in &backends {
        let report = backend.batch_insert(vec![
            record("n1", vec![0.1, 0.2, 0.3, 0.4]),
            record("bad", vec![0.1]),
            record("n2", vec![0.4, 0.3, 0.2, 0.1]),
        ]);
        assert_eq!(report.succeeded.len(), 2, "{name}");
        assert_eq!(report.failed.len(), 1, "{name}");
        assert_eq!(report.failed[0].0.as_str(), "bad", "{name}");
        assert_eq!(backend.stats().count, 5, "{name}");
    }
}

#[test]
fn test_upsert_replaces_not_duplicates() {
    let (backends, _dir) = all_backends(2, &[]);
    for (name, backend) in &backends {
        backend.insert(record("x", vec![1.0, 0.0])).unwrap();
        backend.insert(record("x", vec![0.0, 1.0])).unwrap();
        assert_eq!(backend.stats().count, 1, "{name}");

        let hits = backend
            .search(&SearchRequest::new(vec![0.0, 1.0], 1))
            .unwrap();
        assert_eq!(hits[0].id.as_str(), "x", "{name}");
        assert!(hits[0].distance < 1e-5, "{name} kept the old vector");
    }
}

// =============================================================================
// METADATA ROUND TRIP
// =============================================================================

#[test]
fn test_metadata_survives_storage_and_search() {
    use smriti::backend::MetadataValue;

    let (backends, _dir) = all_backends(2, &[]);
    for (name, backend) in &backends {
        let mut metadata = Metadata::new();
        metadata.insert("kind".into(), MetadataValue::Str("note".into()));
        metadata.insert("priority".into(), MetadataValue::Int(3));
        backend
            .insert(VectorRecord::new(
                RecordId::from("m"),
                vec![1.0, 0.0],
                metadata.clone(),
            ))
            .unwrap();

        let hits = backend
            .search(&SearchRequest::new(vec![1.0, 0.0], 1))
            .unwrap();
        assert_eq!(hits[0].metadata, metadata, "{name}");

        let fetched = backend.get(&RecordId::from("m")).unwrap();
        assert_eq!(fetched.metadata, metadata, "{name}");
    }
}

// =============================================================================
// STATS
// =============================================================================

#[test]
fn test_stats_reports_backend_identity() {
    let (backends, _dir) = all_backends(8, &random_vectors(53, 4, 8));
    let expected = [
        BackendKind::Embedded,
        BackendKind::HnswLib,
        BackendKind::Rocks,
    ];
    for ((_, backend), kind) in backends.iter().zip(expected) {
        let stats = backend.stats();
        assert_eq!(stats.kind, kind);
        assert_eq!(stats.dimensions, 8);
        assert_eq!(stats.metric, Metric::Cosine);
        assert_eq!(stats.count, 4);
    }
}
