//! Query Cache Correctness Tests
//!
//! The cache must never serve results computed against deleted or
//! not-yet-visible data:
//! - Hits are byte-identical to a forced recompute at the same epoch
//! - Any mutation invalidates via the epoch bump (scenario: delete then
//!   query with the cache enabled)

use smriti::backend::{Metadata, MetadataSchema, RecordId, SearchRequest, VectorRecord};
use smriti::collection::VectorCollection;
use smriti::config::{CacheConfig, CollectionConfig};
use std::time::Duration;
use tempfile::TempDir;

fn collection_with_cache(dimensions: usize, enabled: bool) -> (VectorCollection, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let cache = CacheConfig {
        enabled,
        ..CacheConfig::default()
    };
    let collection = VectorCollection::open(
        "cache_test",
        CollectionConfig::with_dimensions(dimensions),
        MetadataSchema::permissive(),
        &cache,
        None,
        Duration::from_secs(1),
        dir.path(),
    );
    (collection, dir)
}

fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
    VectorRecord::new(RecordId::from(id), vector, Metadata::new())
}

#[test]
fn test_cache_hit_identical_to_forced_miss() {
    let (coll, _dir) = collection_with_cache(4, true);
    for i in 0..20 {
        let v: Vec<f32> = (0..4).map(|j| ((i * 4 + j) as f32).sin()).collect();
        coll.insert(record(&format!("r{i}"), v)).unwrap();
    }

    let query = || SearchRequest::new(vec![0.5, -0.2, 0.8, 0.1], 5);
    let populated = coll.search(query()).unwrap();
    let hit = coll.search(query()).unwrap();
    let forced = coll.search_uncached(query()).unwrap();

    assert_eq!(populated, hit);
    assert_eq!(hit, forced, "cache hit diverged from recompute at same epoch");

    let stats = coll.cache_stats().unwrap();
    assert!(stats.hits >= 1);
}

#[test]
fn test_scenario_d_delete_then_query_with_cache_enabled() {
    let (coll, _dir) = collection_with_cache(2, true);
    coll.insert(record("target", vec![1.0, 0.0])).unwrap();
    coll.insert(record("other", vec![0.8, 0.2])).unwrap();

    // Warm the cache with a query that returns the target.
    let query = || SearchRequest::new(vec![1.0, 0.0], 5);
    let warm = coll.search(query()).unwrap();
    assert!(warm.iter().any(|h| h.id.as_str() == "target"));

    // The delete bumps the epoch before returning, so the warm entry is
    // stale the moment this call completes.
    coll.delete(&RecordId::from("target")).unwrap();

    let after = coll.search(query()).unwrap();
    assert!(
        after.iter().all(|h| h.id.as_str() != "target"),
        "cache served a result computed against deleted data"
    );
}

#[test]
fn test_insert_also_invalidates() {
    let (coll, _dir) = collection_with_cache(2, true);
    coll.insert(record("far", vec![0.0, 1.0])).unwrap();

    let query = || SearchRequest::new(vec![1.0, 0.0], 1);
    let before = coll.search(query()).unwrap();
    assert_eq!(before[0].id.as_str(), "far");

    // A closer record lands after the cache was populated.
    coll.insert(record("near", vec![1.0, 0.0])).unwrap();
    let after = coll.search(query()).unwrap();
    assert_eq!(after[0].id.as_str(), "near");
}

#[test]
fn test_distinct_parameters_do_not_share_entries() {
    let (coll, _dir) = collection_with_cache(2, true);
    for i in 0..10 {
        coll.insert(record(&format!("r{i}"), vec![i as f32, 1.0]))
            .unwrap();
    }

    let k2 = coll.search(SearchRequest::new(vec![0.0, 1.0], 2)).unwrap();
    let k5 = coll.search(SearchRequest::new(vec![0.0, 1.0], 5)).unwrap();
    assert_eq!(k2.len(), 2);
    assert_eq!(k5.len(), 5, "k=5 must not be served from the k=2 entry");
}

#[test]
fn test_disabled_cache_still_correct() {
    let (coll, _dir) = collection_with_cache(2, false);
    coll.insert(record("a", vec![1.0, 0.0])).unwrap();

    assert!(coll.cache_stats().is_none());
    let hits = coll.search(SearchRequest::new(vec![1.0, 0.0], 1)).unwrap();
    assert_eq!(hits[0].id.as_str(), "a");
}

#[test]
fn test_equivalent_cosine_queries_share_an_entry() {
    let (coll, _dir) = collection_with_cache(2, true);
    coll.insert(record("a", vec![1.0, 0.0])).unwrap();

    // Same direction, different magnitude: normalization happens before
    // keying, so the second query is a hit.
    coll.search(SearchRequest::new(vec![2.0, 0.0], 1)).unwrap();
    coll.search(SearchRequest::new(vec![4.0, 0.0], 1)).unwrap();

    let stats = coll.cache_stats().unwrap();
    assert!(stats.hits >= 1, "scaled cosine query missed the cache");
}
