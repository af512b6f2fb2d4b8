//! Collection layer: one backend plus its epoch, cache, and change log
//!
//! Single-writer/multiple-reader per collection: the writer gate serializes
//! mutations (held once for a whole batch), while readers go straight to the
//! backend, which uses interior locks. Readers observe the snapshot implied
//! by the epoch counter — a read that begins before a write's epoch bump may
//! legitimately return pre-write results. That relaxed-consistency trade-off
//! is part of the contract, not a bug.

use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{
    open_backend, BackendStats, BatchReport, MetadataSchema, RecordId, SearchHit, SearchRequest,
    VectorBackend, VectorRecord,
};
use crate::cache::{CacheStats, QueryCache};
use crate::changelog::{ChangeLog, ChangeOperation};
use crate::config::{BackendKind, CacheConfig, CollectionConfig, Metric};
use crate::dispatch::NativeCallPool;
use crate::errors::{EngineError, Result};
use crate::vector_db::distance_inline::normalize_in_place;

/// One named collection of vector records
pub struct VectorCollection {
    name: String,
    config: CollectionConfig,
    schema: MetadataSchema,
    backend: Arc<dyn VectorBackend>,
    active_kind: BackendKind,
    epoch: AtomicU64,
    write_gate: Mutex<()>,
    cache: Option<QueryCache>,
    changelog: ChangeLog,
    dispatch: Option<Arc<NativeCallPool>>,
    native_timeout: Duration,
}

impl VectorCollection {
    /// Open the collection, falling back to the portable backend when the
    /// configured one cannot initialize.
    pub fn open(
        name: &str,
        config: CollectionConfig,
        schema: MetadataSchema,
        cache: &CacheConfig,
        dispatch: Option<Arc<NativeCallPool>>,
        native_timeout: Duration,
        data_dir: &Path,
    ) -> Self {
        let (backend, active_kind) = open_backend(name, &config, data_dir);
        Self {
            name: name.to_string(),
            config,
            schema,
            backend: Arc::from(backend),
            active_kind,
            epoch: AtomicU64::new(0),
            write_gate: Mutex::new(()),
            cache: cache.enabled.then(|| QueryCache::new(cache.max_entries)),
            changelog: ChangeLog::new(name),
            dispatch,
            native_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend actually serving requests (may differ from the configured
    /// kind after a degraded fallback)
    pub fn active_kind(&self) -> BackendKind {
        self.active_kind
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Upsert one record
    pub fn insert(&self, record: VectorRecord) -> Result<()> {
        self.schema.validate(&record.metadata)?;
        let id = record.id.clone();

        let _gate = self.write_gate.lock();
        self.backend.insert(record)?;
        let epoch = self.bump_epoch();
        self.changelog.emit(ChangeOperation::Insert, id, epoch);
        Ok(())
    }

    /// Upsert many records under one writer-gate acquisition
    pub fn batch_insert(&self, records: Vec<VectorRecord>) -> BatchReport {
        let mut rejected = Vec::new();
        let mut accepted = Vec::with_capacity(records.len());
        for record in records {
            match self.schema.validate(&record.metadata) {
                Ok(()) => accepted.push(record),
                Err(err) => rejected.push((record.id, err)),
            }
        }

        let _gate = self.write_gate.lock();
        let mut report = self.backend.batch_insert(accepted);
        for id in &report.succeeded {
            let epoch = self.bump_epoch();
            self.changelog.emit(ChangeOperation::Insert, id.clone(), epoch);
        }
        report.failed.extend(rejected);
        report
    }

    /// Delete by id
    pub fn delete(&self, id: &RecordId) -> Result<()> {
        let _gate = self.write_gate.lock();
        self.backend.delete(id)?;
        let epoch = self.bump_epoch();
        self.changelog.emit(ChangeOperation::Delete, id.clone(), epoch);
        Ok(())
    }

    /// Ranked similarity search through the cache
    pub fn search(&self, request: SearchRequest) -> Result<Vec<SearchHit>> {
        self.search_inner(request, true)
    }

    /// Search that always recomputes (cache bypass)
    pub fn search_uncached(&self, request: SearchRequest) -> Result<Vec<SearchHit>> {
        self.search_inner(request, false)
    }

    fn search_inner(&self, mut request: SearchRequest, use_cache: bool) -> Result<Vec<SearchHit>> {
        if request.vector.len() != self.config.dimensions {
            return Err(EngineError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: request.vector.len(),
            });
        }

        // Normalize once so equivalent cosine queries share a cache entry
        // and backends skip their own re-normalization work.
        if self.config.metric == Metric::Cosine {
            normalize_in_place(&mut request.vector);
        }

        // Epoch is read before the backend runs: a write landing during the
        // search leaves the stored entry stale, which the next lookup treats
        // as a miss.
        let epoch = self.epoch();
        let key = self
            .cache
            .as_ref()
            .map(|_| QueryCache::key(&self.name, self.config.metric, &request, &request.vector));

        if use_cache {
            if let (Some(cache), Some(key)) = (&self.cache, &key) {
                if let Some(hits) = cache.lookup(key, epoch) {
                    return Ok(hits);
                }
            }
        }

        let hits = self.execute(&request)?;

        if use_cache {
            if let (Some(cache), Some(key)) = (&self.cache, key) {
                cache.store(key, epoch, hits.clone());
            }
        }
        Ok(hits)
    }

    /// Run the backend search, off-thread for native-bound backends
    fn execute(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let native = matches!(self.active_kind, BackendKind::HnswLib | BackendKind::Rocks);
        match (&self.dispatch, native) {
            (Some(pool), true) => {
                let backend = Arc::clone(&self.backend);
                let mut dispatched = request.clone();
                dispatched.cancel = request.cancel.with_deadline(self.native_timeout);
                // Small grace past the cooperative deadline so an in-flight
                // abort surfaces as the backend's own SearchCancelled.
                let wait = self.native_timeout + Duration::from_millis(50);
                pool.run(wait, move || backend.search(&dispatched))?
            }
            _ => self.backend.search(request),
        }
    }

    /// Point read (copy), bypassing similarity search
    pub fn get(&self, id: &RecordId) -> Option<VectorRecord> {
        self.backend.get(id)
    }

    pub fn stats(&self) -> BackendStats {
        self.backend.stats()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    pub fn changelog(&self) -> &ChangeLog {
        &self.changelog
    }

    /// Copy of every live record
    pub fn export_records(&self) -> Vec<VectorRecord> {
        self.backend.export_records()
    }

    /// Documented export half of the export/import round trip
    pub fn export_to_json(&self, path: &Path) -> Result<usize> {
        let records = self.export_records();
        let file = std::fs::File::create(path)
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("export create failed: {e}")))?;
        serde_json::to_writer(std::io::BufWriter::new(file), &records)
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("export encode failed: {e}")))?;
        Ok(records.len())
    }

    /// Import records produced by `export_to_json`, via the normal upsert
    /// path so epoch and change-log invariants hold.
    pub fn import_from_json(&self, path: &Path) -> Result<BatchReport> {
        let file = std::fs::File::open(path)
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("import open failed: {e}")))?;
        let records: Vec<VectorRecord> = serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("import decode failed: {e}")))?;
        Ok(self.batch_insert(records))
    }
}
