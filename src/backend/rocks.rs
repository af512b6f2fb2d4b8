//! Accelerated backend B: RocksDB-persisted vector table
//!
//! The embedded database is the source of truth; the graph index is a
//! derived, rebuildable structure. A snapshot of the graph is persisted on
//! flush/drop and loaded at open — if it is missing, stale, or corrupt, the
//! index is rebuilt from the vector table instead of refusing to start.

use anyhow::{anyhow, Context};
use parking_lot::RwLock;
use rocksdb::{BlockBasedOptions, Direction, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use std::collections::HashMap;
use std::path::Path;

use super::{
    BackendStats, BatchReport, RecordId, SearchHit, SearchRequest, VectorBackend, VectorRecord,
};
use crate::config::{BackendKind, CollectionConfig};
use crate::errors::{EngineError, Result};
use crate::vector_db::hnsw::{HnswConfig, HnswIndex};

/// Row prefix for vector records
const RECORD_PREFIX: &[u8] = b"rec:";
/// Persisted graph snapshot
const INDEX_KEY: &[u8] = b"meta:index";
/// Persisted node<->id mapping matching the snapshot
const MAPPING_KEY: &[u8] = b"meta:mapping";

fn record_key(id: &RecordId) -> Vec<u8> {
    let mut key = RECORD_PREFIX.to_vec();
    key.extend_from_slice(id.as_str().as_bytes());
    key
}

struct IndexState {
    index: HnswIndex,
    id_to_node: HashMap<RecordId, u32>,
    node_to_id: HashMap<u32, RecordId>,
}

/// RocksDB-backed vector store with an in-process graph index
pub struct RocksBackend {
    config: CollectionConfig,
    db: DB,
    state: RwLock<IndexState>,
}

impl RocksBackend {
    /// Open (or create) the store at `path`
    pub fn open(config: CollectionConfig, path: &Path) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits/key = ~1% FPR on point reads
        opts.set_block_based_table_factory(&block_opts);

        let db = DB::open(&opts, path).map_err(|e| EngineError::BackendUnavailable {
            kind: BackendKind::Rocks.as_str().to_string(),
            reason: format!("rocksdb open failed: {e}"),
        })?;

        let state = Self::load_or_rebuild_index(&config, &db)?;
        Ok(Self { config, db, state: RwLock::new(state) })
    }

    /// Load the persisted graph, falling back to a rebuild from the table
    fn load_or_rebuild_index(config: &CollectionConfig, db: &DB) -> Result<IndexState> {
        let snapshot = db
            .get(INDEX_KEY)
            .map_err(|e| EngineError::Internal(anyhow!("rocksdb read failed: {e}")))?;
        let mapping = db
            .get(MAPPING_KEY)
            .map_err(|e| EngineError::Internal(anyhow!("rocksdb read failed: {e}")))?;

        if let (Some(snapshot), Some(mapping)) = (snapshot, mapping) {
            match Self::restore_index(config, db, &snapshot, &mapping) {
                Ok(state) => return Ok(state),
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        "persisted graph unusable, rebuilding from vector table"
                    );
                }
            }
        }

        Self::rebuild_index(config, db)
    }

    fn restore_index(
        config: &CollectionConfig,
        db: &DB,
        snapshot: &[u8],
        mapping: &[u8],
    ) -> Result<IndexState> {
        let index = HnswIndex::from_bytes(snapshot, config.dimensions)?;

        let (pairs, _): (Vec<(String, u32)>, usize) =
            bincode::serde::decode_from_slice(mapping, bincode::config::standard())
                .map_err(|e| EngineError::IndexCorruption(format!("mapping decode failed: {e}")))?;

        let mut id_to_node = HashMap::with_capacity(pairs.len());
        let mut node_to_id = HashMap::with_capacity(pairs.len());
        for (id, node) in pairs {
            let id = RecordId(id);
            id_to_node.insert(id.clone(), node);
            node_to_id.insert(node, id);
        }

        // Staleness check: the snapshot must cover exactly the rows on disk.
        let row_count = Self::scan_records(db)?.len();
        if row_count != id_to_node.len() {
            return Err(EngineError::IndexCorruption(format!(
                "snapshot covers {} records but table holds {row_count}",
                id_to_node.len()
            )));
        }

        Ok(IndexState { index, id_to_node, node_to_id })
    }

    /// Full rebuild from the vector table
    ///
    /// Rows are inserted in (created_at, id) order so a rebuild is
    /// deterministic even though RocksDB iterates keys lexicographically.
    fn rebuild_index(config: &CollectionConfig, db: &DB) -> Result<IndexState> {
        let mut records = Self::scan_records(db)?;
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        if !records.is_empty() {
            tracing::info!(count = records.len(), "rebuilding graph index from vector table");
        }

        let mut index = HnswIndex::new(HnswConfig {
            dimension: config.dimensions,
            metric: config.metric,
            m: config.m,
            ef_construction: config.ef_construction,
            max_elements: config.max_elements,
        });
        let mut id_to_node = HashMap::with_capacity(records.len());
        let mut node_to_id = HashMap::with_capacity(records.len());

        for record in records {
            let node = index.insert(record.vector.clone())?;
            id_to_node.insert(record.id.clone(), node);
            node_to_id.insert(node, record.id);
        }

        Ok(IndexState { index, id_to_node, node_to_id })
    }

    fn scan_records(db: &DB) -> Result<Vec<VectorRecord>> {
        let mut records = Vec::new();
        let iter = db.iterator(IteratorMode::From(RECORD_PREFIX, Direction::Forward));
        for item in iter {
            let (key, value) =
                item.map_err(|e| EngineError::Internal(anyhow!("rocksdb iterator error: {e}")))?;
            if !key.starts_with(RECORD_PREFIX) {
                break;
            }
            let (record, _): (VectorRecord, usize) =
                bincode::serde::decode_from_slice(&value, bincode::config::standard()).map_err(
                    |e| EngineError::Internal(anyhow!("record decode failed: {e}")),
                )?;
            records.push(record);
        }
        Ok(records)
    }

    fn put_record(&self, record: &VectorRecord, sync: bool) -> Result<()> {
        let value = bincode::serde::encode_to_vec(record, bincode::config::standard())
            .map_err(|e| EngineError::Internal(anyhow!("record encode failed: {e}")))?;
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(sync);
        self.db
            .put_opt(record_key(&record.id), value, &write_opts)
            .map_err(|e| EngineError::Internal(anyhow!("rocksdb write failed: {e}")))?;
        Ok(())
    }

    fn insert_locked(&self, state: &mut IndexState, record: VectorRecord) -> Result<()> {
        if record.vector.len() != self.config.dimensions {
            return Err(EngineError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: record.vector.len(),
            });
        }

        // Durable row first; the graph is derived state.
        self.put_record(&record, false)?;

        let node = state.index.insert(record.vector.clone())?;
        if let Some(old_node) = state.id_to_node.insert(record.id.clone(), node) {
            state.index.mark_deleted(old_node);
            state.node_to_id.remove(&old_node);
        }
        state.node_to_id.insert(node, record.id);

        self.maybe_compact(state);
        Ok(())
    }

    fn maybe_compact(&self, state: &mut IndexState) {
        if !state
            .index
            .needs_compaction(self.config.tombstone_compact_ratio)
        {
            return;
        }
        match Self::rebuild_index(&self.config, &self.db) {
            Ok(fresh) => {
                *state = fresh;
                if let Err(err) = self.persist_index_locked(state) {
                    tracing::warn!(error = %err, "failed to persist compacted index");
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "index compaction failed, keeping tombstoned graph");
            }
        }
    }

    fn persist_index_locked(&self, state: &IndexState) -> Result<()> {
        let snapshot = state
            .index
            .to_bytes()
            .context("graph snapshot encode")
            .map_err(EngineError::Internal)?;
        let pairs: Vec<(String, u32)> = state
            .id_to_node
            .iter()
            .map(|(id, node)| (id.as_str().to_string(), *node))
            .collect();
        let mapping = bincode::serde::encode_to_vec(&pairs, bincode::config::standard())
            .map_err(|e| EngineError::Internal(anyhow!("mapping encode failed: {e}")))?;

        let mut batch = WriteBatch::default();
        batch.put(INDEX_KEY, snapshot);
        batch.put(MAPPING_KEY, mapping);
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.db
            .write_opt(batch, &write_opts)
            .map_err(|e| EngineError::Internal(anyhow!("rocksdb write failed: {e}")))?;
        Ok(())
    }

    /// Persist the graph snapshot so the next open can skip the rebuild
    pub fn flush(&self) -> Result<()> {
        let state = self.state.read();
        self.persist_index_locked(&state)
    }
}

impl Drop for RocksBackend {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            tracing::warn!(error = %err, "failed to persist graph snapshot on drop");
        }
    }
}

impl VectorBackend for RocksBackend {
    fn insert(&self, record: VectorRecord) -> Result<()> {
        let mut state = self.state.write();
        self.insert_locked(&mut state, record)
    }

    fn batch_insert(&self, records: Vec<VectorRecord>) -> BatchReport {
        // One lock acquisition and one snapshot persist for the whole batch.
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
        if let Err(err) = self.persist_index_locked(&state) {
            tracing::warn!(error = %err, "failed to persist graph snapshot after batch");
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
        if request.cancel.cancelled() {
            return Err(EngineError::SearchCancelled);
        }

        let state = self.state.read();
        if state.id_to_node.is_empty() || request.k == 0 {
            return Ok(Vec::new());
        }

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
            let Some(record) = self.get(id) else {
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
                metadata: record.metadata,
            });
            if hits.len() == request.k {
                break;
            }
        }
        Ok(hits)
    }

    fn delete(&self, id: &RecordId) -> Result<()> {
        let mut state = self.state.write();
        let Some(node) = state.id_to_node.remove(id) else {
            return Err(EngineError::NotFound(id.to_string()));
        };
        self.db
            .delete(record_key(id))
            .map_err(|e| EngineError::Internal(anyhow!("rocksdb delete failed: {e}")))?;
        state.index.mark_deleted(node);
        state.node_to_id.remove(&node);
        self.maybe_compact(&mut state);
        Ok(())
    }

    fn get(&self, id: &RecordId) -> Option<VectorRecord> {
        let value = self.db.get(record_key(id)).ok().flatten()?;
        bincode::serde::decode_from_slice(&value, bincode::config::standard())
            .ok()
            .map(|(record, _)| record)
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
            .filter_map(|(_, id)| self.get(&id))
            .collect()
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            count: self.state.read().id_to_node.len(),
            dimensions: self.config.dimensions,
            metric: self.config.metric,
            kind: BackendKind::Rocks,
        }
    }
}
