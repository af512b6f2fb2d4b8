//! Accelerated backend A: external graph-index library (`hnsw_rs`) adapter
//!
//! Records and id mappings live in sidecar maps next to the library index.
//! The library does not support hard deletion (removing nodes breaks the
//! proximity edges other nodes rely on), so deletes are soft: the data id is
//! tombstoned and filtered from results, and the index is rebuilt from live
//! records once tombstones dominate.

use dashmap::DashMap;
use hnsw_rs::prelude::*;
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{
    BackendStats, BatchReport, RecordId, SearchHit, SearchRequest, VectorBackend, VectorRecord,
};
use crate::config::{BackendKind, CollectionConfig, Metric};
use crate::errors::{EngineError, Result};
use crate::vector_db::distance_inline::{metric_distance, normalized};

/// Distance function wrapper for the library index
///
/// Cosine vectors are normalized before insertion, so every metric reduces
/// to the shared kernel dispatch.
struct DistanceFn {
    metric: Metric,
}

impl Distance<f32> for DistanceFn {
    fn eval(&self, a: &[f32], b: &[f32]) -> f32 {
        metric_distance(self.metric, a, b)
    }
}

/// hnsw_rs-backed vector store
pub struct HnswLibBackend {
    config: CollectionConfig,
    index: RwLock<Hnsw<'static, f32, DistanceFn>>,
    records: DashMap<RecordId, VectorRecord>,
    id_to_idx: DashMap<RecordId, usize>,
    idx_to_id: DashMap<usize, RecordId>,
    deleted: RwLock<HashSet<usize>>,
    next_idx: AtomicUsize,
}

impl HnswLibBackend {
    pub fn new(config: CollectionConfig) -> Result<Self> {
        if config.dimensions == 0 || config.m < 2 {
            return Err(EngineError::BackendUnavailable {
                kind: BackendKind::HnswLib.as_str().to_string(),
                reason: format!(
                    "invalid index parameters (dimensions={}, m={})",
                    config.dimensions, config.m
                ),
            });
        }

        let index = Self::build_index(&config);
        Ok(Self {
            config,
            index: RwLock::new(index),
            records: DashMap::new(),
            id_to_idx: DashMap::new(),
            idx_to_id: DashMap::new(),
            deleted: RwLock::new(HashSet::new()),
            next_idx: AtomicUsize::new(0),
        })
    }

    fn build_index(config: &CollectionConfig) -> Hnsw<'static, f32, DistanceFn> {
        Hnsw::new(
            config.m,
            config.max_elements,
            crate::constants::MAX_LAYER,
            config.ef_construction,
            DistanceFn {
                metric: config.metric,
            },
        )
    }

    /// Vector as handed to the index: unit-length under cosine
    fn index_vector(&self, vector: &[f32]) -> Vec<f32> {
        if self.config.metric == Metric::Cosine {
            normalized(vector)
        } else {
            vector.to_vec()
        }
    }

    fn insert_one(&self, index: &Hnsw<'static, f32, DistanceFn>, record: VectorRecord) -> Result<()> {
        if record.vector.len() != self.config.dimensions {
            return Err(EngineError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: record.vector.len(),
            });
        }

        let idx = self.next_idx.fetch_add(1, Ordering::SeqCst);
        index.insert_data(&self.index_vector(&record.vector), idx);

        if let Some((_, old_idx)) = self.id_to_idx.remove(&record.id) {
            self.deleted.write().insert(old_idx);
            self.idx_to_id.remove(&old_idx);
        }
        self.id_to_idx.insert(record.id.clone(), idx);
        self.idx_to_id.insert(idx, record.id.clone());
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    /// Rebuild from live records once the tombstone ratio crosses the
    /// configured threshold. Holds the index write lock for the duration.
    fn maybe_compact(&self, index: &mut Hnsw<'static, f32, DistanceFn>) {
        let total = self.next_idx.load(Ordering::SeqCst);
        if total == 0 {
            return;
        }
        let tombstones = self.deleted.read().len();
        if (tombstones as f32 / total as f32) < self.config.tombstone_compact_ratio {
            return;
        }

        tracing::info!(
            live = self.records.len(),
            tombstones,
            "rebuilding hnsw-lib index to drop tombstones"
        );

        let mut live: Vec<(usize, RecordId)> = self
            .idx_to_id
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        live.sort_by_key(|(idx, _)| *idx);

        let fresh = Self::build_index(&self.config);
        self.id_to_idx.clear();
        self.idx_to_id.clear();
        let mut next = 0usize;
        for (_, id) in live {
            if let Some(record) = self.records.get(&id) {
                fresh.insert_data(&self.index_vector(&record.vector), next);
                self.id_to_idx.insert(id.clone(), next);
                self.idx_to_id.insert(next, id.clone());
                next += 1;
            }
        }
        self.next_idx.store(next, Ordering::SeqCst);
        self.deleted.write().clear();
        *index = fresh;
    }
}

impl VectorBackend for HnswLibBackend {
    fn insert(&self, record: VectorRecord) -> Result<()> {
        let mut index = self.index.write();
        self.insert_one(&index, record)?;
        self.maybe_compact(&mut index);
        Ok(())
    }

    fn batch_insert(&self, records: Vec<VectorRecord>) -> BatchReport {
        // One lock acquisition for the whole batch.
        let mut index = self.index.write();
        let mut report = BatchReport {
            succeeded: Vec::with_capacity(records.len()),
            failed: Vec::new(),
        };
        for record in records {
            let id = record.id.clone();
            match self.insert_one(&index, record) {
                Ok(()) => report.succeeded.push(id),
                Err(err) => report.failed.push((id, err)),
            }
        }
        self.maybe_compact(&mut index);
        report
    }

    fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        if request.vector.len() != self.config.dimensions {
            return Err(EngineError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: request.vector.len(),
            });
        }
        if request.cancel.cancelled() {
            return Err(EngineError::SearchCancelled);
        }
        if self.records.is_empty() || request.k == 0 {
            return Ok(Vec::new());
        }

        let ef = request.ef.unwrap_or(self.config.ef_search).max(request.k);

        // Over-fetch so tombstone/filter removal still yields k hits.
        let mut fetch = request.k;
        if request.filter.is_some() {
            fetch *= crate::constants::FILTER_OVERFETCH_FACTOR;
        }
        fetch += self.deleted.read().len().min(fetch * 2);
        fetch = fetch.min(self.next_idx.load(Ordering::SeqCst).max(1));

        let query = self.index_vector(&request.vector);
        let neighbours = {
            let index = self.index.read();
            index.search(&query, fetch, ef.max(fetch))
        };

        if request.cancel.cancelled() {
            return Err(EngineError::SearchCancelled);
        }

        let deleted = self.deleted.read();
        let mut ranked: Vec<(OrderedFloat<f32>, usize)> = neighbours
            .into_iter()
            .filter(|n| !deleted.contains(&n.d_id))
            .map(|n| (OrderedFloat(n.distance), n.d_id))
            .collect();
        // The library sorts by distance; re-sort with the data id as a
        // deterministic tie-break.
        ranked.sort();

        let mut hits = Vec::with_capacity(request.k);
        for (distance, idx) in ranked {
            let Some(id) = self.idx_to_id.get(&idx).map(|e| e.value().clone()) else {
                continue;
            };
            let Some(record) = self.records.get(&id) else {
                continue;
            };
            if let Some(filter) = &request.filter {
                if !filter.matches(&record.metadata) {
                    continue;
                }
            }
            hits.push(SearchHit {
                id,
                distance: distance.0,
                metadata: record.metadata.clone(),
            });
            if hits.len() == request.k {
                break;
            }
        }
        Ok(hits)
    }

    fn delete(&self, id: &RecordId) -> Result<()> {
        let mut index = self.index.write();
        let Some((_, idx)) = self.id_to_idx.remove(id) else {
            return Err(EngineError::NotFound(id.to_string()));
        };
        self.deleted.write().insert(idx);
        self.idx_to_id.remove(&idx);
        self.records.remove(id);
        self.maybe_compact(&mut index);
        Ok(())
    }

    fn get(&self, id: &RecordId) -> Option<VectorRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    fn export_records(&self) -> Vec<VectorRecord> {
        let mut live: Vec<(usize, RecordId)> = self
            .idx_to_id
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        live.sort_by_key(|(idx, _)| *idx);
        live.into_iter()
            .filter_map(|(_, id)| self.records.get(&id).map(|r| r.value().clone()))
            .collect()
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            count: self.records.len(),
            dimensions: self.config.dimensions,
            metric: self.config.metric,
            kind: BackendKind::HnswLib,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Metadata;

    fn backend(dimensions: usize) -> HnswLibBackend {
        HnswLibBackend::new(CollectionConfig::with_dimensions(dimensions)).unwrap()
    }

    fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord::new(RecordId::from(id), vector, Metadata::new())
    }

    #[test]
    fn test_invalid_config_is_backend_unavailable() {
        let err = HnswLibBackend::new(CollectionConfig::with_dimensions(0)).unwrap_err();
        assert_eq!(err.code(), "BACKEND_UNAVAILABLE");
    }

    #[test]
    fn test_self_retrieval() {
        let backend = backend(8);
        for i in 0..50 {
            let v: Vec<f32> = (0..8).map(|j| ((i * 8 + j) as f32).sin()).collect();
            backend.insert(record(&format!("r{i}"), v)).unwrap();
        }
        let probe: Vec<f32> = (0..8).map(|j| ((37 * 8 + j) as f32).sin()).collect();
        let hits = backend.search(&SearchRequest::new(probe, 1)).unwrap();
        assert_eq!(hits[0].id.as_str(), "r37");
        assert!(hits[0].distance < 1e-5);
    }

    #[test]
    fn test_soft_delete_filtered_from_results() {
        let backend = backend(4);
        backend.insert(record("keep", vec![1.0, 0.0, 0.0, 0.0])).unwrap();
        backend.insert(record("drop", vec![0.9, 0.1, 0.0, 0.0])).unwrap();
        backend.delete(&RecordId::from("drop")).unwrap();

        let hits = backend
            .search(&SearchRequest::new(vec![1.0, 0.0, 0.0, 0.0], 5))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_str(), "keep");
    }

    #[test]
    fn test_upsert_returns_latest_vector() {
        let backend = backend(2);
        backend.insert(record("a", vec![1.0, 0.0])).unwrap();
        backend.insert(record("a", vec![0.0, 1.0])).unwrap();

        assert_eq!(backend.stats().count, 1);
        let hits = backend
            .search(&SearchRequest::new(vec![0.0, 1.0], 1))
            .unwrap();
        assert_eq!(hits[0].id.as_str(), "a");
        assert!(hits[0].distance < 1e-6);
    }
}
