//! Episodic store: append-only task attempts plus consolidation
//!
//! Episodes are immutable once stored. `consolidate` is the only operation
//! that crosses from here into the skill library, and it is idempotent:
//! groups are keyed by their earliest episode's task, and skill rows are
//! recomputed from the group rather than accumulated, so running it twice on
//! unchanged data changes nothing.

use chrono::Utc;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::sync::Arc;

use crate::backend::{RecordId, SearchRequest, VectorRecord};
use crate::collection::VectorCollection;
use crate::embeddings::Embedder;
use crate::errors::Result;
use crate::memory::skills::SkillLibrary;
use crate::memory::types::{ConsolidationPolicy, Episode, EpisodeHit, Skill};
use crate::vector_db::distance_inline::{cosine_similarity, distance_to_similarity};

/// Outcome of one consolidation pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolidationReport {
    /// Groups that met size and success thresholds
    pub qualifying_groups: usize,
    pub skills_created: usize,
    pub skills_refreshed: usize,
}

pub struct EpisodicStore {
    collection: Arc<VectorCollection>,
    embedder: Arc<dyn Embedder>,
}

impl EpisodicStore {
    pub fn new(collection: Arc<VectorCollection>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            collection,
            embedder,
        }
    }

    pub fn collection(&self) -> &VectorCollection {
        &self.collection
    }

    /// Append one episode; ids are engine-assigned so nothing is overwritten
    pub fn store(&self, episode: Episode) -> Result<RecordId> {
        let id = RecordId::generate();
        let embedding = self.embedder.encode(&episode.embedding_text())?;
        self.collection
            .insert(VectorRecord::new(id.clone(), embedding, episode.to_metadata()))?;
        Ok(id)
    }

    /// Similar past attempts for self-critique context, newest first among
    /// equal distances
    pub fn retrieve_similar(&self, task: &str, k: usize) -> Result<Vec<EpisodeHit>> {
        let query = self.embedder.encode(task)?;
        let metric = self.collection.stats().metric;
        let found = self.collection.search(SearchRequest::new(query, k))?;

        let mut hits = Vec::with_capacity(found.len());
        for hit in found {
            let Some(record) = self.collection.get(&hit.id) else {
                continue;
            };
            let episode = Episode::from_record(&record)?;
            hits.push((hit.distance, episode, hit.id));
        }

        hits.sort_by_key(|(distance, episode, _)| {
            (OrderedFloat(*distance), Reverse(episode.created_at))
        });

        Ok(hits
            .into_iter()
            .map(|(distance, episode, id)| EpisodeHit {
                id,
                similarity: distance_to_similarity(metric, distance),
                episode,
            })
            .collect())
    }

    /// Every stored episode, oldest first
    pub fn all(&self) -> Result<Vec<Episode>> {
        let mut episodes: Vec<Episode> = self
            .collection
            .export_records()
            .iter()
            .map(Episode::from_record)
            .collect::<Result<_>>()?;
        episodes.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(episodes)
    }

    /// Group mutually similar episodes and create-or-refresh skills
    ///
    /// A candidate joins a group only when it clears the similarity
    /// threshold against every current member, not just the seed. Groups are
    /// seeded oldest-first so the grouping is deterministic.
    pub fn consolidate(
        &self,
        policy: &ConsolidationPolicy,
        skills: &SkillLibrary,
    ) -> Result<ConsolidationReport> {
        let records = self.collection.export_records();
        let mut rows: Vec<(Episode, Vec<f32>)> = records
            .iter()
            .map(|record| Ok((Episode::from_record(record)?, record.vector.clone())))
            .collect::<Result<_>>()?;
        rows.sort_by(|a, b| {
            a.0.created_at
                .cmp(&b.0.created_at)
                .then_with(|| a.0.task.cmp(&b.0.task))
        });

        let mut assigned = vec![false; rows.len()];
        let mut report = ConsolidationReport::default();
        let now = Utc::now();

        for seed in 0..rows.len() {
            if assigned[seed] {
                continue;
            }
            let mut members = vec![seed];
            for candidate in (seed + 1)..rows.len() {
                if assigned[candidate] {
                    continue;
                }
                let mutual = members.iter().all(|&member| {
                    cosine_similarity(&rows[member].1, &rows[candidate].1)
                        >= policy.similarity_threshold
                });
                if mutual {
                    members.push(candidate);
                }
            }

            if members.len() < policy.min_group_size {
                continue;
            }

            let successes = members.iter().filter(|&&i| rows[i].0.success).count();
            let success_rate = successes as f32 / members.len() as f32;
            if success_rate < policy.min_success_rate {
                continue;
            }

            for &member in &members {
                assigned[member] = true;
            }
            report.qualifying_groups += 1;

            let seed_episode = &rows[seed].0;
            let avg_reward = members.iter().map(|&i| rows[i].0.reward).sum::<f32>()
                / members.len() as f32;

            let mut skill = Skill::new(
                &seed_episode.task,
                &format!("{} -> completed output", seed_episode.task),
            );
            skill.success_rate = success_rate;
            skill.uses = members.len() as u64;
            skill.avg_reward = avg_reward.clamp(0.0, 1.0);

            let existed = skills.get(&skill.name).is_ok();
            skills.upsert_consolidated(skill, now)?;
            if existed {
                report.skills_refreshed += 1;
            } else {
                report.skills_created += 1;
            }
        }

        tracing::info!(
            groups = report.qualifying_groups,
            created = report.skills_created,
            refreshed = report.skills_refreshed,
            "episode consolidation pass complete"
        );
        Ok(report)
    }
}
