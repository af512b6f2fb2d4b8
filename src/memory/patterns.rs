//! Pattern store: reusable strategies ranked by similarity then success
//!
//! `search` has a documented read-through side effect: every returned
//! pattern gets its `uses` counter bumped and `last_used` refreshed, through
//! the normal upsert path so epoch and change-log invariants hold. Callers
//! that need a pure read use `peek`.

use chrono::Utc;
use ordered_float::OrderedFloat;
use std::sync::Arc;

use crate::backend::{RecordId, SearchRequest, VectorRecord};
use crate::collection::VectorCollection;
use crate::embeddings::Embedder;
use crate::errors::{EngineError, Result};
use crate::memory::types::{Pattern, PatternHit};
use crate::vector_db::distance_inline::distance_to_similarity;

pub struct PatternStore {
    collection: Arc<VectorCollection>,
    embedder: Arc<dyn Embedder>,
    success_alpha: f32,
    reward_alpha: f32,
}

impl PatternStore {
    pub fn new(
        collection: Arc<VectorCollection>,
        embedder: Arc<dyn Embedder>,
        success_alpha: f32,
        reward_alpha: f32,
    ) -> Self {
        Self {
            collection,
            embedder,
            success_alpha,
            reward_alpha,
        }
    }

    pub fn collection(&self) -> &VectorCollection {
        &self.collection
    }

    /// Upsert a pattern, deriving the embedding from its text if absent
    pub fn store(&self, mut pattern: Pattern) -> Result<RecordId> {
        let id = pattern.id();
        let embedding = match pattern.embedding.take() {
            Some(embedding) => embedding,
            None => self.embedder.encode(&pattern.embedding_text())?,
        };
        self.collection
            .insert(VectorRecord::new(id.clone(), embedding, pattern.to_metadata()))?;
        Ok(id)
    }

    /// Ranked patterns for a task, bumping usage on every returned one
    pub fn search(&self, task: &str, k: usize, min_similarity: f32) -> Result<Vec<PatternHit>> {
        let mut hits = self.ranked(task, k, min_similarity)?;

        // Read-through side effect: usage bookkeeping via the upsert path.
        for hit in &mut hits {
            hit.pattern.uses += 1;
            hit.pattern.last_used = Utc::now();
            let mut refreshed = hit.pattern.clone();
            let embedding = match refreshed.embedding.take() {
                Some(embedding) => embedding,
                None => self.embedder.encode(&refreshed.embedding_text())?,
            };
            self.collection.insert(VectorRecord::new(
                hit.id.clone(),
                embedding,
                refreshed.to_metadata(),
            ))?;
        }
        Ok(hits)
    }

    /// Same ranking as `search`, no side effects
    pub fn peek(&self, task: &str, k: usize, min_similarity: f32) -> Result<Vec<PatternHit>> {
        self.ranked(task, k, min_similarity)
    }

    fn ranked(&self, task: &str, k: usize, min_similarity: f32) -> Result<Vec<PatternHit>> {
        let query = self.embedder.encode(task)?;
        let metric = self.collection.stats().metric;
        let found = self.collection.search(SearchRequest::new(query, k))?;

        let mut hits = Vec::with_capacity(found.len());
        for hit in found {
            let similarity = distance_to_similarity(metric, hit.distance);
            if similarity < min_similarity {
                continue;
            }
            let Some(record) = self.collection.get(&hit.id) else {
                continue;
            };
            hits.push(PatternHit {
                id: hit.id,
                similarity,
                pattern: Pattern::from_record(&record)?,
            });
        }

        // Similarity first, then success rate; id as the final stable key so
        // identical calls against an unchanged epoch rank identically.
        hits.sort_by(|a, b| {
            OrderedFloat(b.similarity)
                .cmp(&OrderedFloat(a.similarity))
                .then_with(|| {
                    OrderedFloat(b.pattern.success_rate).cmp(&OrderedFloat(a.pattern.success_rate))
                })
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(hits)
    }

    /// EMA outcome update, clamped to the declared ranges
    pub fn update_outcome(&self, id: &RecordId, success: bool, reward: f32) -> Result<Pattern> {
        let record = self
            .collection
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let mut pattern = Pattern::from_record(&record)?;

        let outcome = if success { 1.0 } else { 0.0 };
        pattern.success_rate =
            (pattern.success_rate + self.success_alpha * (outcome - pattern.success_rate))
                .clamp(0.0, 1.0);
        pattern.avg_reward = (pattern.avg_reward
            + self.reward_alpha * (reward.clamp(0.0, 1.0) - pattern.avg_reward))
            .clamp(0.0, 1.0);

        self.collection.insert(VectorRecord::new(
            id.clone(),
            record.vector,
            pattern.to_metadata(),
        ))?;
        Ok(pattern)
    }

    /// Point read by id
    pub fn get(&self, id: &RecordId) -> Result<Pattern> {
        let record = self
            .collection
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        Pattern::from_record(&record)
    }
}
