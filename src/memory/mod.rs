//! Memory engine facade
//!
//! Wires the embedder, the native-call dispatch pool, and the five logical
//! tables (`vectors`, `patterns`, `episodes`, `skills`, `causal_edges`)
//! into one explicitly-constructed context object. Nothing here is global:
//! the caller builds the engine once and passes it (or its stores) down.

pub mod causal;
pub mod episodes;
pub mod patterns;
pub mod skills;
pub mod types;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{BackendStats, MetadataSchema};
use crate::collection::VectorCollection;
use crate::config::EngineConfig;
use crate::dispatch::NativeCallPool;
use crate::embeddings::{Embedder, HashingEmbedder};
use crate::errors::{EngineError, Result};

use causal::CausalEdgeStore;
use episodes::EpisodicStore;
use patterns::PatternStore;
use skills::SkillLibrary;

/// Names of the five logical tables
pub const VECTORS: &str = "vectors";
pub const PATTERNS: &str = "patterns";
pub const EPISODES: &str = "episodes";
pub const SKILLS: &str = "skills";
pub const CAUSAL_EDGES: &str = "causal_edges";

/// Per-table stats snapshot
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub vectors: BackendStats,
    pub patterns: BackendStats,
    pub episodes: BackendStats,
    pub skills: BackendStats,
    pub causal_edges: BackendStats,
}

/// The embedded vector-memory engine
pub struct MemoryEngine {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<VectorCollection>,
    patterns: PatternStore,
    episodes: EpisodicStore,
    skills: SkillLibrary,
    causal_edges: CausalEdgeStore,
}

impl MemoryEngine {
    /// Construct with the default deterministic embedder
    pub fn new(config: EngineConfig) -> Result<Self> {
        let embedder = Arc::new(HashingEmbedder::new(config.collection.dimensions));
        Self::with_embedder(config, embedder)
    }

    /// Construct with a caller-supplied embedder (must match the configured
    /// dimensionality)
    pub fn with_embedder(config: EngineConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if embedder.dimension() != config.collection.dimensions {
            return Err(EngineError::DimensionMismatch {
                expected: config.collection.dimensions,
                actual: embedder.dimension(),
            });
        }

        std::fs::create_dir_all(&config.data_dir).map_err(|e| {
            EngineError::Internal(anyhow::anyhow!(
                "failed to create data dir {}: {e}",
                config.data_dir.display()
            ))
        })?;

        let dispatch = NativeCallPool::new(config.dispatch.workers);
        let native_timeout = Duration::from_millis(config.dispatch.native_call_timeout_ms);

        let open = |name: &str, schema: MetadataSchema| -> Arc<VectorCollection> {
            Arc::new(VectorCollection::open(
                name,
                config.collection.clone(),
                schema,
                &config.cache,
                Some(Arc::clone(&dispatch)),
                native_timeout,
                &config.data_dir,
            ))
        };

        let vectors = open(VECTORS, MetadataSchema::permissive());
        let patterns_collection = open(PATTERNS, types::Pattern::schema());
        let episodes_collection = open(EPISODES, types::Episode::schema());
        let skills_collection = open(SKILLS, types::Skill::schema());
        let causal_collection = open(CAUSAL_EDGES, types::CausalEdge::schema());

        tracing::info!(
            backend = config.collection.backend.as_str(),
            dimensions = config.collection.dimensions,
            metric = config.collection.metric.as_str(),
            "memory engine ready"
        );

        Ok(Self {
            patterns: PatternStore::new(
                Arc::clone(&patterns_collection),
                Arc::clone(&embedder),
                config.success_alpha,
                config.reward_alpha,
            ),
            episodes: EpisodicStore::new(Arc::clone(&episodes_collection), Arc::clone(&embedder)),
            skills: SkillLibrary::new(
                Arc::clone(&skills_collection),
                Arc::clone(&embedder),
                config.success_alpha,
                config.reward_alpha,
            ),
            causal_edges: CausalEdgeStore::new(
                Arc::clone(&causal_collection),
                Arc::clone(&embedder),
            ),
            vectors,
            embedder,
        })
    }

    /// The shared text embedder
    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Raw vector table
    pub fn vectors(&self) -> &VectorCollection {
        &self.vectors
    }

    pub fn patterns(&self) -> &PatternStore {
        &self.patterns
    }

    pub fn episodes(&self) -> &EpisodicStore {
        &self.episodes
    }

    pub fn skills(&self) -> &SkillLibrary {
        &self.skills
    }

    pub fn causal_edges(&self) -> &CausalEdgeStore {
        &self.causal_edges
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            vectors: self.vectors.stats(),
            patterns: self.patterns.collection().stats(),
            episodes: self.episodes.collection().stats(),
            skills: self.skills.collection().stats(),
            causal_edges: self.causal_edges.collection().stats(),
        }
    }
}
