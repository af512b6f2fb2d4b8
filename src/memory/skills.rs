//! Skill library: consolidated capabilities with a prerequisite DAG
//!
//! Prerequisites reference other skills by name and must stay acyclic;
//! insertion runs a toposort over the whole library including the candidate
//! and rejects cycles before anything is written.

use chrono::Utc;
use ordered_float::OrderedFloat;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{RecordId, SearchRequest, VectorRecord};
use crate::collection::VectorCollection;
use crate::embeddings::Embedder;
use crate::errors::{EngineError, Result};
use crate::memory::types::{Skill, SkillHit};
use crate::vector_db::distance_inline::distance_to_similarity;

pub struct SkillLibrary {
    collection: Arc<VectorCollection>,
    embedder: Arc<dyn Embedder>,
    success_alpha: f32,
    reward_alpha: f32,
}

impl SkillLibrary {
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

    /// Every stored skill
    pub fn all(&self) -> Result<Vec<Skill>> {
        self.collection
            .export_records()
            .iter()
            .map(Skill::from_record)
            .collect()
    }

    /// Upsert a skill after proving the prerequisite graph stays acyclic
    pub fn add(&self, skill: Skill) -> Result<RecordId> {
        let mut skills: HashMap<String, Skill> = self
            .all()?
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();
        // The candidate replaces any previous version of itself before the
        // cycle check, so tightening an existing skill's prerequisites is
        // validated against the new list.
        skills.insert(skill.name.clone(), skill.clone());

        if Self::has_cycle(&skills) {
            return Err(EngineError::CyclicDependency(skill.name));
        }

        let id = skill.id();
        let embedding = self.embedder.encode(&skill.embedding_text())?;
        self.collection
            .insert(VectorRecord::new(id.clone(), embedding, skill.to_metadata()))?;
        Ok(id)
    }

    fn build_graph(skills: &HashMap<String, Skill>) -> (DiGraph<String, ()>, HashMap<String, NodeIndex>) {
        let mut graph = DiGraph::<String, ()>::new();
        let mut indices: HashMap<String, NodeIndex> = HashMap::new();

        for name in skills.keys() {
            indices.insert(name.clone(), graph.add_node(name.clone()));
        }
        for skill in skills.values() {
            let Some(&from) = indices.get(&skill.name) else {
                continue;
            };
            for prerequisite in &skill.prerequisites {
                // Prerequisites not yet in the library cannot close a cycle;
                // they become nodes once added.
                if let Some(&to) = indices.get(prerequisite) {
                    graph.add_edge(from, to, ());
                }
            }
        }
        (graph, indices)
    }

    fn has_cycle(skills: &HashMap<String, Skill>) -> bool {
        let (graph, _) = Self::build_graph(skills);
        toposort(&graph, None).is_err()
    }

    /// Ranked skills for a description
    pub fn search(&self, description: &str, k: usize) -> Result<Vec<SkillHit>> {
        let query = self.embedder.encode(description)?;
        let metric = self.collection.stats().metric;
        let found = self.collection.search(SearchRequest::new(query, k))?;

        let mut hits = Vec::with_capacity(found.len());
        for hit in found {
            let Some(record) = self.collection.get(&hit.id) else {
                continue;
            };
            hits.push(SkillHit {
                similarity: distance_to_similarity(metric, hit.distance),
                id: hit.id,
                skill: Skill::from_record(&record)?,
            });
        }
        hits.sort_by(|a, b| {
            OrderedFloat(b.similarity)
                .cmp(&OrderedFloat(a.similarity))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(hits)
    }

    /// Execution order for a skill: prerequisites first, the skill last
    ///
    /// The cycle error here is a defensive check — insert-time validation
    /// should make it unreachable.
    pub fn resolve_composition(&self, name: &str) -> Result<Vec<String>> {
        let skills: HashMap<String, Skill> = self
            .all()?
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();
        if !skills.contains_key(name) {
            return Err(EngineError::NotFound(format!("skill:{name}")));
        }

        let (graph, indices) = Self::build_graph(&skills);
        let order = toposort(&graph, None)
            .map_err(|_| EngineError::CyclicDependency(name.to_string()))?;

        // Reachable closure from the requested skill along prerequisite
        // edges.
        let mut reachable = std::collections::HashSet::new();
        if let Some(&start) = indices.get(name) {
            let mut bfs = Bfs::new(&graph, start);
            while let Some(node) = bfs.next(&graph) {
                reachable.insert(node);
            }
        }

        // toposort puts dependents before prerequisites; execution wants the
        // reverse.
        let mut sequence: Vec<String> = order
            .into_iter()
            .filter(|node| reachable.contains(node))
            .map(|node| graph[node].clone())
            .collect();
        sequence.reverse();
        Ok(sequence)
    }

    /// EMA outcome update on reuse
    pub fn record_use(&self, name: &str, success: bool, reward: f32) -> Result<Skill> {
        let id = RecordId(format!("skill:{name}"));
        let record = self
            .collection
            .get(&id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let mut skill = Skill::from_record(&record)?;

        skill.uses += 1;
        let outcome = if success { 1.0 } else { 0.0 };
        skill.success_rate =
            (skill.success_rate + self.success_alpha * (outcome - skill.success_rate))
                .clamp(0.0, 1.0);
        skill.avg_reward = (skill.avg_reward
            + self.reward_alpha * (reward.clamp(0.0, 1.0) - skill.avg_reward))
            .clamp(0.0, 1.0);

        self.collection.insert(VectorRecord::new(
            id,
            record.vector,
            skill.to_metadata(),
        ))?;
        Ok(skill)
    }

    /// Point read by name
    pub fn get(&self, name: &str) -> Result<Skill> {
        let id = RecordId(format!("skill:{name}"));
        let record = self
            .collection
            .get(&id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        Skill::from_record(&record)
    }

    /// Create-or-refresh hook used by episode consolidation
    ///
    /// Consolidated skills carry no prerequisites, so the cycle check is a
    /// formality, but routing through `add` keeps one write path.
    pub(crate) fn upsert_consolidated(&self, skill: Skill, refreshed_at: chrono::DateTime<Utc>) -> Result<RecordId> {
        let mut skill = skill;
        skill.created_at = match self.get(&skill.name) {
            Ok(existing) => existing.created_at,
            Err(_) => refreshed_at,
        };
        self.add(skill)
    }
}
