//! Backend contract: the abstract storage+search interface
//!
//! Every backend implements [`VectorBackend`]. Mutating methods take `&self`
//! and use interior mutability so concurrent readers proceed while the
//! collection layer serializes writers. Backends return copies of records,
//! never handles into index internals.
//!
//! Backend-specific failures are translated into the crate error taxonomy
//! here and in the implementations; callers never see rocksdb or graph
//! library error types.

pub mod embedded;
pub mod hnsw_native;
pub mod rocks;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::cancel::CancelToken;
use crate::config::{BackendKind, CollectionConfig, Metric};
use crate::errors::{EngineError, Result};

/// Unique identifier for vector records
///
/// Caller-assigned (any non-empty string) or engine-assigned (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Typed metadata value
///
/// Externally tagged on the wire: bincode rows in the RocksDB backend need
/// a self-describing-free encoding, which untagged enums cannot provide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    StrList(Vec<String>),
}

impl MetadataValue {
    pub fn kind(&self) -> MetadataKind {
        match self {
            MetadataValue::Str(_) => MetadataKind::Str,
            MetadataValue::Int(_) => MetadataKind::Int,
            MetadataValue::Float(_) => MetadataKind::Float,
            MetadataValue::Bool(_) => MetadataKind::Bool,
            MetadataValue::StrList(_) => MetadataKind::StrList,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(f) => Some(*f),
            MetadataValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            MetadataValue::StrList(l) => Some(l),
            _ => None,
        }
    }
}

/// Typed key->value metadata map
///
/// BTreeMap keeps key order canonical, which the cache relies on when it
/// hashes filter descriptors.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Declared value type for a metadata field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataKind {
    Str,
    Int,
    Float,
    Bool,
    StrList,
}

/// Declared, validated schema for a collection's metadata
///
/// Checked at insert time rather than trusted at read time. Unknown fields
/// are rejected unless the schema is open.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataSchema {
    fields: BTreeMap<String, MetadataKind>,
    /// Accept fields the schema does not declare
    open: bool,
}

impl MetadataSchema {
    /// Schema that accepts anything (no declared fields, open)
    pub fn permissive() -> Self {
        Self {
            fields: BTreeMap::new(),
            open: true,
        }
    }

    pub fn with_field(mut self, name: &str, kind: MetadataKind) -> Self {
        self.fields.insert(name.to_string(), kind);
        self
    }

    pub fn validate(&self, metadata: &Metadata) -> Result<()> {
        for (key, value) in metadata {
            match self.fields.get(key) {
                Some(expected) if *expected != value.kind() => {
                    return Err(EngineError::InvalidMetadata {
                        field: key.clone(),
                        reason: format!("expected {:?}, got {:?}", expected, value.kind()),
                    });
                }
                Some(_) => {}
                None if !self.open => {
                    return Err(EngineError::InvalidMetadata {
                        field: key.clone(),
                        reason: "field not declared in collection schema".to_string(),
                    });
                }
                None => {}
            }
        }
        Ok(())
    }
}

/// A stored vector with its metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: RecordId,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl VectorRecord {
    pub fn new(id: RecordId, vector: Vec<f32>, metadata: Metadata) -> Self {
        Self {
            id,
            vector,
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// One ranked search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: RecordId,
    /// Distance under the collection metric; lower is closer
    pub distance: f32,
    pub metadata: Metadata,
}

/// Equality filter over metadata fields, applied at the result step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub equals: BTreeMap<String, MetadataValue>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.equals.is_empty()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.equals
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }

    /// Canonical descriptor for cache keying
    pub fn descriptor(&self) -> String {
        if self.equals.is_empty() {
            return String::new();
        }
        serde_json::to_string(&self.equals).unwrap_or_default()
    }
}

/// A similarity query against one backend
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub vector: Vec<f32>,
    pub k: usize,
    /// Query-time beam width; clamped up to k. None uses the collection
    /// default.
    pub ef: Option<usize>,
    pub filter: Option<MetadataFilter>,
    pub cancel: CancelToken,
}

impl SearchRequest {
    pub fn new(vector: Vec<f32>, k: usize) -> Self {
        Self {
            vector,
            k,
            ef: None,
            filter: None,
            cancel: CancelToken::never(),
        }
    }

    pub fn with_ef(mut self, ef: usize) -> Self {
        self.ef = Some(ef);
        self
    }

    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Backend identity and size
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendStats {
    pub count: usize,
    pub dimensions: usize,
    pub metric: Metric,
    pub kind: BackendKind,
}

/// Per-record outcome of a batch insert
///
/// A failed record is reported and skipped; it never leaves a partially
/// linked index entry behind.
#[derive(Debug)]
pub struct BatchReport {
    pub succeeded: Vec<RecordId>,
    pub failed: Vec<(RecordId, EngineError)>,
}

impl BatchReport {
    pub fn all_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The abstract storage+search contract
pub trait VectorBackend: Send + Sync {
    /// Upsert: re-inserting an existing id replaces vector+metadata.
    fn insert(&self, record: VectorRecord) -> Result<()>;

    /// Insert many records under one internal lock acquisition.
    fn batch_insert(&self, records: Vec<VectorRecord>) -> BatchReport;

    /// Ranked similarity search.
    fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>>;

    /// Delete by id. `NotFound` if absent.
    fn delete(&self, id: &RecordId) -> Result<()>;

    /// Point read; returns a copy.
    fn get(&self, id: &RecordId) -> Option<VectorRecord>;

    /// Copy of every live record, for export and index rebuild.
    fn export_records(&self) -> Vec<VectorRecord>;

    fn stats(&self) -> BackendStats;
}

/// Open the configured backend, falling back to the portable one
///
/// Accelerated backends that fail to initialize degrade to `Embedded` with a
/// logged warning instead of failing startup; correctness is preserved, only
/// performance changes. Returns the backend plus the kind actually running.
pub fn open_backend(
    name: &str,
    config: &CollectionConfig,
    data_dir: &Path,
) -> (Box<dyn VectorBackend>, BackendKind) {
    match config.backend {
        BackendKind::Embedded => (
            Box::new(embedded::EmbeddedBackend::new(config.clone())),
            BackendKind::Embedded,
        ),
        BackendKind::HnswLib => match hnsw_native::HnswLibBackend::new(config.clone()) {
            Ok(backend) => (Box::new(backend), BackendKind::HnswLib),
            Err(err) => {
                tracing::warn!(
                    collection = name,
                    backend = "hnsw-lib",
                    error = %err,
                    "BackendDegraded: falling back to embedded backend"
                );
                (
                    Box::new(embedded::EmbeddedBackend::new(config.clone())),
                    BackendKind::Embedded,
                )
            }
        },
        BackendKind::Rocks => {
            let path = data_dir.join(name);
            match rocks::RocksBackend::open(config.clone(), &path) {
                Ok(backend) => (Box::new(backend), BackendKind::Rocks),
                Err(err) => {
                    tracing::warn!(
                        collection = name,
                        backend = "rocks",
                        error = %err,
                        "BackendDegraded: falling back to embedded backend"
                    );
                    (
                        Box::new(embedded::EmbeddedBackend::new(config.clone())),
                        BackendKind::Embedded,
                    )
                }
            }
        }
    }
}
