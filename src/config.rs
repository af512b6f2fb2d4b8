//! Configuration management for the engine
//!
//! All configurable parameters in one place with environment variable
//! overrides. Follows the principle: sensible defaults, configurable in
//! production.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::constants::{
    BRUTE_FORCE_LIMIT, DEFAULT_CACHE_ENTRIES, DEFAULT_DISPATCH_WORKERS, DEFAULT_EF_CONSTRUCTION,
    DEFAULT_EF_SEARCH, DEFAULT_M, DEFAULT_NATIVE_CALL_TIMEOUT_MS, DEFAULT_REWARD_ALPHA,
    DEFAULT_SUCCESS_ALPHA, TOMBSTONE_COMPACT_RATIO,
};

/// Distance metric for similarity search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// 1 - cos(a, b). Vectors are L2-normalized once at insertion so the
    /// query-time computation reduces to a dot product.
    #[default]
    Cosine,
    /// Squared Euclidean distance. No normalization.
    Euclidean,
    /// Negative dot product (higher dot = closer). No normalization.
    Dot,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
            Metric::Dot => "dot",
        }
    }
}

/// Backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Portable in-process backend: exact scan for small collections, own
    /// HNSW graph above `brute_force_limit`. Works everywhere.
    #[default]
    Embedded,
    /// External graph-index library (hnsw_rs) adapter.
    HnswLib,
    /// RocksDB-persisted vector table with an in-process graph index.
    Rocks,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Embedded => "embedded",
            BackendKind::HnswLib => "hnsw-lib",
            BackendKind::Rocks => "rocks",
        }
    }
}

/// Per-collection index and storage parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Embedding dimensionality. Every vector in the collection must match.
    pub dimensions: usize,
    /// Distance metric.
    pub metric: Metric,
    /// Which backend serves this collection.
    pub backend: BackendKind,
    /// Capacity hint for the graph index.
    pub max_elements: usize,
    /// Beam width during graph construction.
    pub ef_construction: usize,
    /// Maximum connections per graph node.
    pub m: usize,
    /// Default query-time beam width (clamped up to k per query).
    pub ef_search: usize,
    /// Collection size below which the portable backend scans exactly.
    pub brute_force_limit: usize,
    /// Tombstone ratio that triggers compaction.
    pub tombstone_compact_ratio: f32,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            dimensions: 384,
            metric: Metric::Cosine,
            backend: BackendKind::Embedded,
            max_elements: 100_000,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            m: DEFAULT_M,
            ef_search: DEFAULT_EF_SEARCH,
            brute_force_limit: BRUTE_FORCE_LIMIT,
            tombstone_compact_ratio: TOMBSTONE_COMPACT_RATIO,
        }
    }
}

impl CollectionConfig {
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            ..Self::default()
        }
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }
}

/// Query cache parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Disable to force every read through the backend.
    pub enabled: bool,
    /// LRU capacity in entries.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_CACHE_ENTRIES,
        }
    }
}

/// Native-call dispatch pool parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Worker threads shared by native-bound backends.
    pub workers: usize,
    /// Engine-enforced timeout for a single dispatched call.
    pub native_call_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_DISPATCH_WORKERS,
            native_call_timeout_ms: DEFAULT_NATIVE_CALL_TIMEOUT_MS,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root directory for on-disk state (RocksDB column paths, exports).
    pub data_dir: PathBuf,
    /// Collection parameters applied to the five logical tables unless a
    /// store overrides them.
    pub collection: CollectionConfig,
    /// Query cache parameters.
    pub cache: CacheConfig,
    /// Native-call dispatch parameters.
    pub dispatch: DispatchConfig,
    /// Smoothing factor for pattern success-rate updates.
    pub success_alpha: f32,
    /// Smoothing factor for pattern average-reward updates.
    pub reward_alpha: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./smriti-data"),
            collection: CollectionConfig::default(),
            cache: CacheConfig::default(),
            dispatch: DispatchConfig::default(),
            success_alpha: DEFAULT_SUCCESS_ALPHA,
            reward_alpha: DEFAULT_REWARD_ALPHA,
        }
    }
}

impl EngineConfig {
    /// Load configuration with environment variable overrides
    ///
    /// Recognized variables:
    /// - `SMRITI_DATA_DIR`: storage root
    /// - `SMRITI_BACKEND`: `embedded` | `hnsw-lib` | `rocks`
    /// - `SMRITI_DIMENSIONS`: embedding dimensionality
    /// - `SMRITI_METRIC`: `cosine` | `euclidean` | `dot`
    /// - `SMRITI_EF_SEARCH`, `SMRITI_EF_CONSTRUCTION`, `SMRITI_M`
    /// - `SMRITI_CACHE_ENTRIES` (0 disables the cache)
    /// - `SMRITI_DISPATCH_WORKERS`, `SMRITI_NATIVE_TIMEOUT_MS`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var("SMRITI_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Ok(backend) = env::var("SMRITI_BACKEND") {
            match backend.to_lowercase().as_str() {
                "embedded" => config.collection.backend = BackendKind::Embedded,
                "hnsw-lib" => config.collection.backend = BackendKind::HnswLib,
                "rocks" => config.collection.backend = BackendKind::Rocks,
                other => {
                    tracing::warn!("Unknown SMRITI_BACKEND '{}', keeping default", other);
                }
            }
        }

        if let Ok(val) = env::var("SMRITI_DIMENSIONS") {
            if let Ok(n) = val.parse::<usize>() {
                if n > 0 {
                    config.collection.dimensions = n;
                }
            }
        }

        if let Ok(metric) = env::var("SMRITI_METRIC") {
            match metric.to_lowercase().as_str() {
                "cosine" => config.collection.metric = Metric::Cosine,
                "euclidean" => config.collection.metric = Metric::Euclidean,
                "dot" => config.collection.metric = Metric::Dot,
                other => {
                    tracing::warn!("Unknown SMRITI_METRIC '{}', keeping default", other);
                }
            }
        }

        if let Ok(val) = env::var("SMRITI_EF_SEARCH") {
            if let Ok(n) = val.parse() {
                config.collection.ef_search = n;
            }
        }

        if let Ok(val) = env::var("SMRITI_EF_CONSTRUCTION") {
            if let Ok(n) = val.parse() {
                config.collection.ef_construction = n;
            }
        }

        if let Ok(val) = env::var("SMRITI_M") {
            if let Ok(n) = val.parse::<usize>() {
                if n >= 2 {
                    config.collection.m = n;
                }
            }
        }

        if let Ok(val) = env::var("SMRITI_CACHE_ENTRIES") {
            if let Ok(n) = val.parse::<usize>() {
                if n == 0 {
                    config.cache.enabled = false;
                } else {
                    config.cache.max_entries = n;
                }
            }
        }

        if let Ok(val) = env::var("SMRITI_DISPATCH_WORKERS") {
            if let Ok(n) = val.parse::<usize>() {
                if n > 0 {
                    config.dispatch.workers = n;
                }
            }
        }

        if let Ok(val) = env::var("SMRITI_NATIVE_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                config.dispatch.native_call_timeout_ms = n;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let config = EngineConfig::default();
        assert!(config.collection.ef_construction >= config.collection.m);
        assert!(config.collection.ef_search > 0);
        assert!(config.cache.enabled);
        assert!(config.collection.tombstone_compact_ratio > 0.0);
        assert!(config.collection.tombstone_compact_ratio < 1.0);
    }

    #[test]
    fn test_metric_names_round_trip() {
        for metric in [Metric::Cosine, Metric::Euclidean, Metric::Dot] {
            let json = serde_json::to_string(&metric).unwrap();
            let back: Metric = serde_json::from_str(&json).unwrap();
            assert_eq!(metric, back);
        }
    }

    #[test]
    fn test_backend_kind_names() {
        assert_eq!(BackendKind::Embedded.as_str(), "embedded");
        assert_eq!(BackendKind::HnswLib.as_str(), "hnsw-lib");
        assert_eq!(BackendKind::Rocks.as_str(), "rocks");
    }
}
