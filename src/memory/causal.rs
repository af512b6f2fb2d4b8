//! Causal edge store: thin, similarity-searchable table
//!
//! Written only by the external causal learner; no estimation logic lives
//! here. One row per (cause, effect) pair — re-estimates upsert.

use ordered_float::OrderedFloat;
use std::sync::Arc;

use crate::backend::{RecordId, SearchRequest, VectorRecord};
use crate::collection::VectorCollection;
use crate::embeddings::Embedder;
use crate::errors::Result;
use crate::memory::types::{CausalEdge, CausalEdgeHit};
use crate::vector_db::distance_inline::distance_to_similarity;

pub struct CausalEdgeStore {
    collection: Arc<VectorCollection>,
    embedder: Arc<dyn Embedder>,
}

impl CausalEdgeStore {
    pub fn new(collection: Arc<VectorCollection>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            collection,
            embedder,
        }
    }

    pub fn collection(&self) -> &VectorCollection {
        &self.collection
    }

    /// Upsert an edge, embedding its description for later retrieval
    pub fn store(&self, edge: CausalEdge) -> Result<RecordId> {
        let id = edge.id();
        let embedding = self.embedder.encode(&edge.description)?;
        self.collection
            .insert(VectorRecord::new(id.clone(), embedding, edge.to_metadata()))?;
        Ok(id)
    }

    /// Edges whose descriptions are similar to the query, best first
    pub fn search(&self, description: &str, k: usize) -> Result<Vec<CausalEdgeHit>> {
        let query = self.embedder.encode(description)?;
        let metric = self.collection.stats().metric;
        let found = self.collection.search(SearchRequest::new(query, k))?;

        let mut hits = Vec::with_capacity(found.len());
        for hit in found {
            let Some(record) = self.collection.get(&hit.id) else {
                continue;
            };
            hits.push(CausalEdgeHit {
                similarity: distance_to_similarity(metric, hit.distance),
                id: hit.id,
                edge: CausalEdge::from_record(&record)?,
            });
        }
        hits.sort_by(|a, b| {
            OrderedFloat(b.similarity)
                .cmp(&OrderedFloat(a.similarity))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(hits)
    }
}
