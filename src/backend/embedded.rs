//! Portable in-process backend
//!
//! Exact scan below `brute_force_limit` (brute force over a few thousand
//! vectors beats graph traversal and is exact), in-process HNSW above it.
//! Works everywhere; the accelerated backends fall back to this one.

use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{
    BackendStats, BatchReport, RecordId, SearchHit, SearchRequest, VectorBackend, VectorRecord,
};
use crate::config::{BackendKind, CollectionConfig, Metric};
use crate::errors::{EngineError, Result};
use crate::vector_db::distance_inline::{cosine_similarity, dot_product, euclidean_squared};
use crate::vector_db::hnsw::{HnswConfig, HnswIndex};

/// Exact distance on raw (unnormalized) stored vectors
///
/// Matches the graph index's normalized-at-insert distances within floating
/// point tolerance, so both search paths rank identically.
#[inline]
fn exact_distance(metric: Metric, query: &[f32], vector: &[f32]) -> f32 {
    match metric {
        Metric::Cosine => 1.0 - cosine_similarity(query, vector),
        Metric::Euclidean => euclidean_squared(query, vector),
        Metric::Dot => -dot_product(query, vector),
    }
}

struct EmbeddedState {
    records: HashMap<RecordId, VectorRecord>,
    index: HnswIndex,
    id_to_node: HashMap<RecordId, u32>,
    node_to_id: HashMap<u32, RecordId>,
}

/// Portable backend: brute-force scan plus an in-process graph index
pub struct EmbeddedBackend {
    config: CollectionConfig,
    state: RwLock<EmbeddedState>,
}

impl EmbeddedBackend {
    pub fn new(config: CollectionConfig) -> Self {
        let index = HnswIndex::new(HnswConfig {
            dimension: config.dimensions,
            metric: config.metric,
            m: config.m,
            ef_construction: config.ef_construction,
            max_elements: config.max_elements,
        });
        Self {
            config,
            state: RwLock::new(EmbeddedState {
                records: HashMap::new(),
                index,
                id_to_node: HashMap::new(),
                node_to_id: HashMap::new(),
            }),
        }
    }

    fn insert_locked(&self, state: &mut EmbeddedState, record: VectorRecord) -> Result<()> {
        if record.vector.len() != self.config.dimensions {
            return Err(EngineError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: record.vector.len(),
            });
        }

        // Index first: a failed graph insert must not leave a record behind.
        let node = state.index.insert(record.vector.clone())?;

        // Upsert: tombstone the previous node for this id.
        if let Some(old_node) = state.id_to_node.insert(record.id.clone(), node) {
            state.index.mark_deleted(old_node);
            state.node_to_id.remove(&old_node);
        }
        state.node_to_id.insert(node, record.id.clone());
        state.records.insert(record.id.clone(), record);

        self.maybe_compact(state);
        Ok(())
    }

    /// Rebuild the graph from live records once tombstones dominate
    ///
    /// Records are reinserted in their original insertion sequence so
    /// tie-break ordering survives compaction.
    fn maybe_compact(&self, state: &mut EmbeddedState) {
        if !state
            .index
            .needs_compaction(self.config.tombstone_compact_ratio)
        {
            return;
        }

        tracing::info!(
            live = state.records.len(),
            total = state.index.len(),
            "compacting graph index"
        );

        let mut live: Vec<(u32, RecordId)> = state
            .node_to_id
            .iter()
            .map(|(node, id)| (*node, id.clone()))
            .collect();
        live.sort_by_key(|(node, _)| *node);

        let mut index = HnswIndex::new(state.index.config().clone());
        let mut id_to_node = HashMap::with_capacity(live.len());
        let mut node_to_id = HashMap::with_capacity(live.len());

        for (_, id) in live {
            let Some(record) = state.records.get(&id) else {
                continue;
            };
            match index.insert(record.vector.clone()) {
                Ok(node) => {
                    id_to_node.insert(id.clone(), node);
                    node_to_id.insert(node, id);
                }
                Err(err) => {
                    // Keep the old graph rather than lose a record.
                    tracing::warn!(id = %id, error = %err, "compaction insert failed, aborting");
                    return;
                }
            }
        }

        state.index = index;
        state.id_to_node = id_to_node;
        state.node_to_id = node_to_id;
    }

    fn search_exact(
        &self,
        state: &EmbeddedState,
        request: &SearchRequest,
    ) -> Result<Vec<SearchHit>> {
        let mut scored: Vec<(OrderedFloat<f32>, u32, &VectorRecord)> =
            Vec::with_capacity(state.records.len());

        for (checked, record) in state.records.values().enumerate() {
            if checked % 256 == 0 && request.cancel.cancelled() {
                return Err(EngineError::SearchCancelled);
            }
            if let Some(filter) = &request.filter {
                if !filter.matches(&record.metadata) {
                    continue;
                }
            }
            let distance = exact_distance(self.config.metric, &request.vector, &record.vector);
            let seq = state.id_to_node.get(&record.id).copied().unwrap_or(u32::MAX);
            scored.push((OrderedFloat(distance), seq, record));
        }

        // Rank by distance, then insertion sequence for reproducible ties.
        scored.sort_by_key(|(distance, seq, _)| (*distance, *seq));

        Ok(scored
            .into_iter()
            .take(request.k)
            .map(|(distance, _, record)| SearchHit {
                id: record.id.clone(),
                distance: distance.0,
                metadata: record.metadata.clone(),
            })
            .collect())
    }

    fn search_graph(
        &self,
        state: &EmbeddedState,
        request: &SearchRequest,
    ) -> Result<Vec<SearchHit>> {
        let ef = request.ef.unwrap_or(self.config.ef_search).max(request.k);
        let fetch = if request.filter.is_some() {
            request.k * crate::constants::FILTER_OVERFETCH_FACTOR
        } else {
            request.k
        };

        let found = state
            .index
            .search(&request.vector, fetch, ef.max(fetch), &request.cancel)?;

        let mut hits = Vec::with_capacity(request.k);
        for (node, distance) in found {
            let Some(id) = state.node_to_id.get(&node) else {
                continue;
            };
            let Some(record) = state.records.get(id) else {
                continue;
            };
            if let Some(filter) = &request.filter {
                if !filter.matches(&record.metadata) {
                    continue;
                }
            }
            hits.push(SearchHit {
                id: id.clone(),
                distance,
                metadata: record.metadata.clone(),
            });
            if hits.len() == request.k {
                break;
            }
        }
        Ok(hits)
    }
}

impl VectorBackend for EmbeddedBackend {
    fn insert(&self, record: VectorRecord) -> Result<()> {
        let mut state = self.state.write();
        self.insert_locked(&mut state, record)
    }

    fn batch_insert(&self, records: Vec<VectorRecord>) -> BatchReport {
        // One lock acquisition for the whole batch.
        let mut state = self.state.write();
        let mut report = BatchReport {
            succeeded: Vec::with_capacity(records.len()),
            failed: Vec::new(),
        };
        for record in records {
            let id = record.id.clone();
            match self.insert_locked(&mut state, record) {
                Ok(()) => report.succeeded.push(id),
                Err(err) => report.failed.push((id, err)),
            }
        }
        report
    }

    fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        if request.vector.len() != self.config.dimensions {
            return Err(EngineError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: request.vector.len(),
            });
        }
        let state = self.state.read();
        if state.records.is_empty() || request.k == 0 {
            return Ok(Vec::new());
        }
        if state.records.len() <= self.config.brute_force_limit {
            self.search_exact(&state, request)
        } else {
            self.search_graph(&state, request)
        }
    }

    fn delete(&self, id: &RecordId) -> Result<()> {
        let mut state = self.state.write();
        let Some(node) = state.id_to_node.remove(id) else {
            return Err(EngineError::NotFound(id.to_string()));
        };
        state.index.mark_deleted(node);
        state.node_to_id.remove(&node);
        state.records.remove(id);
        self.maybe_compact(&mut state);
        Ok(())
    }

    fn get(&self, id: &RecordId) -> Option<VectorRecord> {
        self.state.read().records.get(id).cloned()
    }

    fn export_records(&self) -> Vec<VectorRecord> {
        let state = self.state.read();
        let mut live: Vec<(u32, RecordId)> = state
            .node_to_id
            .iter()
            .map(|(node, id)| (*node, id.clone()))
            .collect();
        live.sort_by_key(|(node, _)| *node);
        live.into_iter()
            .filter_map(|(_, id)| state.records.get(&id).cloned())
            .collect()
    }

    fn stats(&self) -> BackendStats {
        let state = self.state.read();
        BackendStats {
            count: state.records.len(),
            dimensions: self.config.dimensions,
            metric: self.config.metric,
            kind: BackendKind::Embedded,
        }
    }
}
