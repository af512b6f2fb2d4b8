//! Type definitions for the memory abstractions
//!
//! Patterns, episodes, skills, and causal edges are typed tables over the
//! backend contract: each row is a vector record whose metadata carries the
//! struct fields, validated against a declared schema at insert time.
//!
//! Rewards and success rates live in [0, 1]; updates clamp back into range.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::backend::{
    Metadata, MetadataKind, MetadataSchema, MetadataValue, RecordId, VectorRecord,
};
use crate::errors::{EngineError, Result};

fn meta_str(metadata: &Metadata, field: &str) -> Result<String> {
    metadata
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| missing(field))
}

fn meta_f32(metadata: &Metadata, field: &str) -> Result<f32> {
    metadata
        .get(field)
        .and_then(|v| v.as_f64())
        .map(|f| f as f32)
        .ok_or_else(|| missing(field))
}

fn meta_u64(metadata: &Metadata, field: &str) -> Result<u64> {
    metadata
        .get(field)
        .and_then(|v| v.as_i64())
        .map(|i| i.max(0) as u64)
        .ok_or_else(|| missing(field))
}

fn meta_bool(metadata: &Metadata, field: &str) -> Result<bool> {
    metadata
        .get(field)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| missing(field))
}

fn meta_time(metadata: &Metadata, field: &str) -> Result<DateTime<Utc>> {
    let raw = meta_str(metadata, field)?;
    raw.parse::<DateTime<Utc>>()
        .map_err(|e| EngineError::Internal(anyhow::anyhow!("bad timestamp in '{field}': {e}")))
}

fn missing(field: &str) -> EngineError {
    EngineError::Internal(anyhow::anyhow!("stored row missing field '{field}'"))
}

fn short_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    digest[..12].iter().map(|b| format!("{b:02x}")).collect()
}

// =============================================================================
// PATTERN
// =============================================================================

/// A reusable strategy for a task type
///
/// Created on the first successful strategy for a task type; mutated on
/// every subsequent use via exponential-moving-average outcome updates.
/// Never hard-deleted, only down-weighted, so provenance survives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub task_type: String,
    pub approach: String,
    /// Derived from `task_type + approach` when not supplied
    pub embedding: Option<Vec<f32>>,
    /// In [0, 1]
    pub success_rate: f32,
    /// Monotonically increasing
    pub uses: u64,
    /// In [0, 1]
    pub avg_reward: f32,
    pub tags: BTreeSet<String>,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Pattern {
    pub fn new(task_type: &str, approach: &str) -> Self {
        let now = Utc::now();
        Self {
            task_type: task_type.to_string(),
            approach: approach.to_string(),
            embedding: None,
            success_rate: 0.0,
            uses: 0,
            avg_reward: 0.0,
            tags: BTreeSet::new(),
            last_used: now,
            created_at: now,
        }
    }

    pub fn with_success_rate(mut self, success_rate: f32) -> Self {
        self.success_rate = success_rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_tags<I: IntoIterator<Item = String>>(mut self, tags: I) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    /// Deterministic identity: (task_type, approach) keys the upsert
    pub fn id(&self) -> RecordId {
        RecordId(format!(
            "pat:{}",
            short_digest(&[&self.task_type, &self.approach])
        ))
    }

    /// Text the embedding is derived from when none is supplied
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.task_type, self.approach)
    }

    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("task_type".into(), MetadataValue::Str(self.task_type.clone()));
        metadata.insert("approach".into(), MetadataValue::Str(self.approach.clone()));
        metadata.insert(
            "success_rate".into(),
            MetadataValue::Float(self.success_rate as f64),
        );
        metadata.insert("uses".into(), MetadataValue::Int(self.uses as i64));
        metadata.insert(
            "avg_reward".into(),
            MetadataValue::Float(self.avg_reward as f64),
        );
        metadata.insert(
            "tags".into(),
            MetadataValue::StrList(self.tags.iter().cloned().collect()),
        );
        metadata.insert(
            "last_used".into(),
            MetadataValue::Str(self.last_used.to_rfc3339()),
        );
        metadata.insert(
            "created_at".into(),
            MetadataValue::Str(self.created_at.to_rfc3339()),
        );
        metadata
    }

    pub fn from_record(record: &VectorRecord) -> Result<Self> {
        let metadata = &record.metadata;
        Ok(Self {
            task_type: meta_str(metadata, "task_type")?,
            approach: meta_str(metadata, "approach")?,
            embedding: Some(record.vector.clone()),
            success_rate: meta_f32(metadata, "success_rate")?,
            uses: meta_u64(metadata, "uses")?,
            avg_reward: meta_f32(metadata, "avg_reward")?,
            tags: metadata
                .get("tags")
                .and_then(|v| v.as_str_list())
                .map(|l| l.iter().cloned().collect())
                .unwrap_or_default(),
            last_used: meta_time(metadata, "last_used")?,
            created_at: meta_time(metadata, "created_at")?,
        })
    }

    pub fn schema() -> MetadataSchema {
        MetadataSchema::default()
            .with_field("task_type", MetadataKind::Str)
            .with_field("approach", MetadataKind::Str)
            .with_field("success_rate", MetadataKind::Float)
            .with_field("uses", MetadataKind::Int)
            .with_field("avg_reward", MetadataKind::Float)
            .with_field("tags", MetadataKind::StrList)
            .with_field("last_used", MetadataKind::Str)
            .with_field("created_at", MetadataKind::Str)
    }
}

/// A pattern returned from similarity search
#[derive(Debug, Clone)]
pub struct PatternHit {
    pub id: RecordId,
    pub similarity: f32,
    pub pattern: Pattern,
}

// =============================================================================
// EPISODE
// =============================================================================

/// One task attempt, recorded once and never mutated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub session_id: String,
    pub task: String,
    pub input: String,
    pub output: String,
    /// Self-assessment text
    pub critique: String,
    /// In [0, 1]
    pub reward: f32,
    pub success: bool,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl Episode {
    pub fn new(session_id: &str, task: &str, input: &str, output: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            task: task.to_string(),
            input: input.to_string(),
            output: output.to_string(),
            critique: String::new(),
            reward: 0.0,
            success: false,
            latency_ms: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_outcome(mut self, success: bool, reward: f32) -> Self {
        self.success = success;
        self.reward = reward.clamp(0.0, 1.0);
        self
    }

    pub fn with_critique(mut self, critique: &str) -> Self {
        self.critique = critique.to_string();
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Text the embedding is derived from
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.task, self.input)
    }

    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("session_id".into(), MetadataValue::Str(self.session_id.clone()));
        metadata.insert("task".into(), MetadataValue::Str(self.task.clone()));
        metadata.insert("input".into(), MetadataValue::Str(self.input.clone()));
        metadata.insert("output".into(), MetadataValue::Str(self.output.clone()));
        metadata.insert("critique".into(), MetadataValue::Str(self.critique.clone()));
        metadata.insert("reward".into(), MetadataValue::Float(self.reward as f64));
        metadata.insert("success".into(), MetadataValue::Bool(self.success));
        metadata.insert("latency_ms".into(), MetadataValue::Int(self.latency_ms as i64));
        metadata.insert(
            "created_at".into(),
            MetadataValue::Str(self.created_at.to_rfc3339()),
        );
        metadata
    }

    pub fn from_record(record: &VectorRecord) -> Result<Self> {
        let metadata = &record.metadata;
        Ok(Self {
            session_id: meta_str(metadata, "session_id")?,
            task: meta_str(metadata, "task")?,
            input: meta_str(metadata, "input")?,
            output: meta_str(metadata, "output")?,
            critique: meta_str(metadata, "critique")?,
            reward: meta_f32(metadata, "reward")?,
            success: meta_bool(metadata, "success")?,
            latency_ms: meta_u64(metadata, "latency_ms")?,
            created_at: meta_time(metadata, "created_at")?,
        })
    }

    pub fn schema() -> MetadataSchema {
        MetadataSchema::default()
            .with_field("session_id", MetadataKind::Str)
            .with_field("task", MetadataKind::Str)
            .with_field("input", MetadataKind::Str)
            .with_field("output", MetadataKind::Str)
            .with_field("critique", MetadataKind::Str)
            .with_field("reward", MetadataKind::Float)
            .with_field("success", MetadataKind::Bool)
            .with_field("latency_ms", MetadataKind::Int)
            .with_field("created_at", MetadataKind::Str)
    }
}

/// An episode returned from similarity search
#[derive(Debug, Clone)]
pub struct EpisodeHit {
    pub id: RecordId,
    pub similarity: f32,
    pub episode: Episode,
}

// =============================================================================
// SKILL
// =============================================================================

/// A consolidated capability with typed signature and prerequisites
///
/// Prerequisites form a DAG over skill names; cycles are rejected at insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    /// Typed inputs/outputs description
    pub signature: String,
    /// Optional reference to executable code
    pub code_ref: Option<String>,
    pub success_rate: f32,
    pub uses: u64,
    pub avg_reward: f32,
    pub prerequisites: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl Skill {
    pub fn new(name: &str, signature: &str) -> Self {
        Self {
            name: name.to_string(),
            signature: signature.to_string(),
            code_ref: None,
            success_rate: 0.0,
            uses: 0,
            avg_reward: 0.0,
            prerequisites: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_prerequisites<I: IntoIterator<Item = String>>(mut self, prerequisites: I) -> Self {
        self.prerequisites = prerequisites.into_iter().collect();
        self
    }

    pub fn with_code_ref(mut self, code_ref: &str) -> Self {
        self.code_ref = Some(code_ref.to_string());
        self
    }

    /// Skills are keyed by name
    pub fn id(&self) -> RecordId {
        RecordId(format!("skill:{}", self.name))
    }

    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.name, self.signature)
    }

    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("name".into(), MetadataValue::Str(self.name.clone()));
        metadata.insert("signature".into(), MetadataValue::Str(self.signature.clone()));
        if let Some(code_ref) = &self.code_ref {
            metadata.insert("code_ref".into(), MetadataValue::Str(code_ref.clone()));
        }
        metadata.insert(
            "success_rate".into(),
            MetadataValue::Float(self.success_rate as f64),
        );
        metadata.insert("uses".into(), MetadataValue::Int(self.uses as i64));
        metadata.insert(
            "avg_reward".into(),
            MetadataValue::Float(self.avg_reward as f64),
        );
        metadata.insert(
            "prerequisites".into(),
            MetadataValue::StrList(self.prerequisites.iter().cloned().collect()),
        );
        metadata.insert(
            "created_at".into(),
            MetadataValue::Str(self.created_at.to_rfc3339()),
        );
        metadata
    }

    pub fn from_record(record: &VectorRecord) -> Result<Self> {
        let metadata = &record.metadata;
        Ok(Self {
            name: meta_str(metadata, "name")?,
            signature: meta_str(metadata, "signature")?,
            code_ref: metadata
                .get("code_ref")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            success_rate: meta_f32(metadata, "success_rate")?,
            uses: meta_u64(metadata, "uses")?,
            avg_reward: meta_f32(metadata, "avg_reward")?,
            prerequisites: metadata
                .get("prerequisites")
                .and_then(|v| v.as_str_list())
                .map(|l| l.iter().cloned().collect())
                .unwrap_or_default(),
            created_at: meta_time(metadata, "created_at")?,
        })
    }

    pub fn schema() -> MetadataSchema {
        MetadataSchema::default()
            .with_field("name", MetadataKind::Str)
            .with_field("signature", MetadataKind::Str)
            .with_field("code_ref", MetadataKind::Str)
            .with_field("success_rate", MetadataKind::Float)
            .with_field("uses", MetadataKind::Int)
            .with_field("avg_reward", MetadataKind::Float)
            .with_field("prerequisites", MetadataKind::StrList)
            .with_field("created_at", MetadataKind::Str)
    }
}

/// A skill returned from similarity search
#[derive(Debug, Clone)]
pub struct SkillHit {
    pub id: RecordId,
    pub similarity: f32,
    pub skill: Skill,
}

// =============================================================================
// CAUSAL EDGE
// =============================================================================

/// A cause -> effect relationship with an externally estimated uplift
///
/// Written only by the external causal learner; the engine stores and
/// retrieves, nothing more.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalEdge {
    pub cause_id: String,
    pub effect_id: String,
    pub uplift_estimate: f32,
    pub confidence: f32,
    /// Textual description of the relationship; the embedding derives from it
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl CausalEdge {
    pub fn new(cause_id: &str, effect_id: &str, description: &str) -> Self {
        Self {
            cause_id: cause_id.to_string(),
            effect_id: effect_id.to_string(),
            uplift_estimate: 0.0,
            confidence: 0.0,
            description: description.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn with_estimate(mut self, uplift_estimate: f32, confidence: f32) -> Self {
        self.uplift_estimate = uplift_estimate;
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// One row per (cause, effect) pair; the learner's re-estimates upsert
    pub fn id(&self) -> RecordId {
        RecordId(format!(
            "edge:{}",
            short_digest(&[&self.cause_id, &self.effect_id])
        ))
    }

    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("cause_id".into(), MetadataValue::Str(self.cause_id.clone()));
        metadata.insert("effect_id".into(), MetadataValue::Str(self.effect_id.clone()));
        metadata.insert(
            "uplift_estimate".into(),
            MetadataValue::Float(self.uplift_estimate as f64),
        );
        metadata.insert(
            "confidence".into(),
            MetadataValue::Float(self.confidence as f64),
        );
        metadata.insert(
            "description".into(),
            MetadataValue::Str(self.description.clone()),
        );
        metadata.insert(
            "created_at".into(),
            MetadataValue::Str(self.created_at.to_rfc3339()),
        );
        metadata
    }

    pub fn from_record(record: &VectorRecord) -> Result<Self> {
        let metadata = &record.metadata;
        Ok(Self {
            cause_id: meta_str(metadata, "cause_id")?,
            effect_id: meta_str(metadata, "effect_id")?,
            uplift_estimate: meta_f32(metadata, "uplift_estimate")?,
            confidence: meta_f32(metadata, "confidence")?,
            description: meta_str(metadata, "description")?,
            created_at: meta_time(metadata, "created_at")?,
        })
    }

    pub fn schema() -> MetadataSchema {
        MetadataSchema::default()
            .with_field("cause_id", MetadataKind::Str)
            .with_field("effect_id", MetadataKind::Str)
            .with_field("uplift_estimate", MetadataKind::Float)
            .with_field("confidence", MetadataKind::Float)
            .with_field("description", MetadataKind::Str)
            .with_field("created_at", MetadataKind::Str)
    }
}

/// A causal edge returned from similarity search
#[derive(Debug, Clone)]
pub struct CausalEdgeHit {
    pub id: RecordId,
    pub similarity: f32,
    pub edge: CausalEdge,
}

// =============================================================================
// CONSOLIDATION POLICY
// =============================================================================

/// Caller-supplied thresholds for episode consolidation
///
/// Deliberately without defaults: the right values depend on the embedder
/// and the host's reward scale, and are external configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationPolicy {
    /// Minimum episodes in a group before it produces a skill
    pub min_group_size: usize,
    /// Minimum fraction of successful episodes in the group
    pub min_success_rate: f32,
    /// Pairwise similarity every group member must reach
    pub similarity_threshold: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_identity_is_deterministic() {
        let a = Pattern::new("debug", "bisect commit history");
        let b = Pattern::new("debug", "bisect commit history");
        assert_eq!(a.id(), b.id());

        let c = Pattern::new("debug", "add print statements");
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_pattern_metadata_round_trip() {
        let pattern = Pattern::new("debug", "bisect commit history")
            .with_success_rate(0.9)
            .with_tags(vec!["git".to_string(), "regression".to_string()]);
        let record = VectorRecord::new(pattern.id(), vec![0.0; 4], pattern.to_metadata());
        let back = Pattern::from_record(&record).unwrap();

        assert_eq!(back.task_type, "debug");
        assert_eq!(back.approach, "bisect commit history");
        assert!((back.success_rate - 0.9).abs() < 1e-6);
        assert_eq!(back.tags.len(), 2);
    }

    #[test]
    fn test_episode_metadata_round_trip() {
        let episode = Episode::new("s1", "fix test", "failing assertion", "patched")
            .with_outcome(true, 0.8)
            .with_critique("worked first try")
            .with_latency_ms(1200);
        let record = VectorRecord::new(RecordId::generate(), vec![0.0; 4], episode.to_metadata());
        let back = Episode::from_record(&record).unwrap();

        assert!(back.success);
        assert!((back.reward - 0.8).abs() < 1e-6);
        assert_eq!(back.latency_ms, 1200);
        assert_eq!(back.critique, "worked first try");
    }

    #[test]
    fn test_skill_metadata_round_trip_without_code_ref() {
        let skill = Skill::new("deploy", "env -> release")
            .with_prerequisites(vec!["build".to_string(), "test".to_string()]);
        let record = VectorRecord::new(skill.id(), vec![0.0; 4], skill.to_metadata());
        let back = Skill::from_record(&record).unwrap();

        assert_eq!(back.name, "deploy");
        assert!(back.code_ref.is_none());
        assert_eq!(back.prerequisites.len(), 2);
    }

    #[test]
    fn test_causal_edge_upsert_identity() {
        let a = CausalEdge::new("add-tests", "fewer-regressions", "tests reduce regressions");
        let b = CausalEdge::new("add-tests", "fewer-regressions", "different wording");
        assert_eq!(a.id(), b.id(), "identity is the (cause, effect) pair");
    }

    #[test]
    fn test_schemas_accept_their_own_rows() {
        let pattern = Pattern::new("t", "a");
        assert!(Pattern::schema().validate(&pattern.to_metadata()).is_ok());

        let episode = Episode::new("s", "t", "i", "o");
        assert!(Episode::schema().validate(&episode.to_metadata()).is_ok());

        let skill = Skill::new("n", "sig");
        assert!(Skill::schema().validate(&skill.to_metadata()).is_ok());

        let edge = CausalEdge::new("c", "e", "d");
        assert!(CausalEdge::schema().validate(&edge.to_metadata()).is_ok());
    }
}
