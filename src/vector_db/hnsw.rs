//! Hierarchical proximity graph for approximate nearest-neighbor search
//!
//! Multi-layer graph in the HNSW family (Malkov & Yashunin 2016): each node
//! is assigned a top layer drawn from an exponential distribution with scale
//! 1/ln(M), so higher layers are exponentially sparser. Search descends
//! greedily through the upper layers and runs a beam search at layer 0.
//!
//! # Index Maintenance
//!
//! Deletions are tombstones: edges stay intact (eager unlinking risks
//! disconnecting the graph) and deleted ids are filtered from results.
//! Rebuild from live records once `needs_compaction()` reports true.
//!
//! The index is not internally synchronized; owners wrap it in a lock and
//! keep the single-writer discipline.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use crate::cancel::CancelToken;
use crate::config::Metric;
use crate::constants::MAX_LAYER;
use crate::errors::{EngineError, Result};
use crate::vector_db::distance_inline::{metric_distance, normalize_in_place};

/// Graph construction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Vector dimension
    pub dimension: usize,
    /// Distance metric; cosine vectors are normalized once at insertion
    pub metric: Metric,
    /// Maximum connections per node per layer (M)
    pub m: usize,
    /// Beam width during construction
    pub ef_construction: usize,
    /// Capacity hint; the graph grows past it with a warning
    pub max_elements: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            metric: Metric::Cosine,
            m: crate::constants::DEFAULT_M,
            ef_construction: crate::constants::DEFAULT_EF_CONSTRUCTION,
            max_elements: 100_000,
        }
    }
}

/// Node in the proximity graph
///
/// Internal id doubles as the insertion sequence number, which is also the
/// tie-break order for equal distances.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HnswNode {
    /// Stored vector (unit-length when the metric is cosine)
    vector: Vec<f32>,
    /// Neighbor lists, one per layer 0..=top_layer
    neighbors: Vec<Vec<u32>>,
}

/// Search candidate ordered by (distance, insertion sequence)
///
/// The total order makes results reproducible: equal distances rank by
/// insertion sequence, never by memory address or hash order.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    distance: f32,
    id: u32,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Hierarchical proximity graph index
#[derive(Serialize, Deserialize)]
pub struct HnswIndex {
    config: HnswConfig,
    /// 1/ln(M), the layer-assignment scale
    level_scale: f64,
    nodes: Vec<HnswNode>,
    entry_point: Option<u32>,
    max_level: usize,
    /// Tombstoned internal ids, excluded from results but kept in the graph
    deleted: HashSet<u32>,
}

impl HnswIndex {
    pub fn new(config: HnswConfig) -> Self {
        let level_scale = 1.0 / (config.m.max(2) as f64).ln();
        Self {
            config,
            level_scale,
            nodes: Vec::new(),
            entry_point: None,
            max_level: 0,
            deleted: HashSet::new(),
        }
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// Total nodes including tombstones
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes that are not tombstoned
    pub fn live_len(&self) -> usize {
        self.nodes.len() - self.deleted.len()
    }

    /// Fraction of nodes that are tombstones
    pub fn tombstone_ratio(&self) -> f32 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        self.deleted.len() as f32 / self.nodes.len() as f32
    }

    /// True once the tombstone ratio crosses the given threshold
    pub fn needs_compaction(&self, threshold: f32) -> bool {
        self.tombstone_ratio() >= threshold
    }

    /// Draw a top layer from the exponential distribution with scale 1/ln(M)
    fn sample_level(&self) -> usize {
        let mut rng = rand::thread_rng();
        let u: f64 = rng.gen_range(f64::EPSILON..1.0);
        let level = (-u.ln() * self.level_scale) as usize;
        level.min(MAX_LAYER)
    }

    #[inline(always)]
    fn dist(&self, query: &[f32], id: u32) -> f32 {
        metric_distance(self.config.metric, query, &self.nodes[id as usize].vector)
    }

    /// Insert a vector, returning its internal id (== insertion sequence)
    ///
    /// The neighbor lists of existing nodes are only touched after every
    /// distance computation for the new node has succeeded, so a failed
    /// insert never leaves a half-linked multi-layer state.
    pub fn insert(&mut self, mut vector: Vec<f32>) -> Result<u32> {
        if vector.len() != self.config.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }

        if self.config.metric == Metric::Cosine {
            normalize_in_place(&mut vector);
        }

        let id = self.nodes.len() as u32;
        if self.nodes.len() == self.config.max_elements {
            tracing::warn!(
                "graph index grew past max_elements hint ({})",
                self.config.max_elements
            );
        }

        let level = self.sample_level();

        let Some(entry) = self.entry_point else {
            // First node: becomes the global entry point.
            self.nodes.push(HnswNode {
                vector,
                neighbors: vec![Vec::new(); level + 1],
            });
            self.entry_point = Some(id);
            self.max_level = level;
            return Ok(id);
        };

        // Phase 1 (read-only): find neighbors per layer.
        let mut curr = entry;
        let mut curr_dist = self.dist(&vector, curr);

        // Greedy descent through layers above the node's top layer.
        let mut layer = self.max_level;
        while layer > level {
            (curr, curr_dist) = self.greedy_step(&vector, curr, curr_dist, layer);
            layer -= 1;
        }

        // Beam search from the node's top layer down to 0, collecting the
        // selected neighbors for each layer.
        let mut entries = vec![Candidate {
            distance: curr_dist,
            id: curr,
        }];
        let top = level.min(self.max_level);
        let mut selected_per_layer: Vec<Vec<u32>> = Vec::with_capacity(top + 1);
        for layer in (0..=top).rev() {
            let found = self.search_layer(
                &vector,
                &entries,
                self.config.ef_construction,
                layer,
                &CancelToken::never(),
            )?;
            let selected: Vec<u32> = found.iter().take(self.config.m).map(|c| c.id).collect();
            selected_per_layer.push(selected);
            entries = found;
        }
        selected_per_layer.reverse(); // index by layer

        // Phase 2 (mutation): link the node in.
        let mut neighbors = vec![Vec::new(); level + 1];
        for (layer, selected) in selected_per_layer.iter().enumerate() {
            neighbors[layer] = selected.clone();
        }
        self.nodes.push(HnswNode { vector, neighbors });

        for (layer, selected) in selected_per_layer.iter().enumerate() {
            for &neighbor in selected {
                self.link_back(neighbor, id, layer);
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(id);
        }

        Ok(id)
    }

    /// Add a reverse edge neighbor -> new node, pruning the neighbor's list
    /// back to M by keeping the overall nearest
    fn link_back(&mut self, neighbor: u32, new_id: u32, layer: usize) {
        let neighbor_vec = self.nodes[neighbor as usize].vector.clone();
        let list = &mut self.nodes[neighbor as usize].neighbors;
        if layer >= list.len() {
            // The neighbor's top layer is below this one; nothing to link.
            return;
        }
        list[layer].push(new_id);

        if list[layer].len() <= self.config.m {
            return;
        }

        // Prune: keep the M nearest by (distance, insertion sequence).
        let ids = list[layer].clone();
        let mut ranked: Vec<Candidate> = ids
            .into_iter()
            .map(|other| Candidate {
                distance: metric_distance(
                    self.config.metric,
                    &neighbor_vec,
                    &self.nodes[other as usize].vector,
                ),
                id: other,
            })
            .collect();
        ranked.sort();
        self.nodes[neighbor as usize].neighbors[layer] = ranked
            .into_iter()
            .take(self.config.m)
            .map(|c| c.id)
            .collect();
    }

    /// Single-step greedy descent at one layer (beam width 1)
    fn greedy_step(&self, query: &[f32], mut curr: u32, mut curr_dist: f32, layer: usize) -> (u32, f32) {
        loop {
            let mut improved = false;
            let node = &self.nodes[curr as usize];
            if let Some(layer_neighbors) = node.neighbors.get(layer) {
                for &n in layer_neighbors {
                    let d = self.dist(query, n);
                    if d < curr_dist {
                        curr = n;
                        curr_dist = d;
                        improved = true;
                    }
                }
            }
            if !improved {
                return (curr, curr_dist);
            }
        }
    }

    /// Beam search at one layer
    ///
    /// Returns up to `ef` candidates sorted ascending by (distance, seq).
    /// Tombstoned nodes participate in traversal (they keep the graph
    /// connected) and are filtered later at the result step.
    fn search_layer(
        &self,
        query: &[f32],
        entries: &[Candidate],
        ef: usize,
        layer: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<Candidate>> {
        let mut visited: HashSet<u32> = entries.iter().map(|c| c.id).collect();
        let mut frontier: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

        for &c in entries {
            frontier.push(Reverse(c));
            results.push(c);
        }

        while let Some(Reverse(curr)) = frontier.pop() {
            if cancel.cancelled() {
                return Err(EngineError::SearchCancelled);
            }

            if results.len() >= ef {
                let worst = results.peek().map(|c| c.distance).unwrap_or(f32::INFINITY);
                if curr.distance > worst {
                    break;
                }
            }

            let node = &self.nodes[curr.id as usize];
            let Some(layer_neighbors) = node.neighbors.get(layer) else {
                continue;
            };
            for &n in layer_neighbors {
                if !visited.insert(n) {
                    continue;
                }
                let d = self.dist(query, n);
                let candidate = Candidate { distance: d, id: n };
                let accept = match results.peek() {
                    Some(worst) if results.len() >= ef => candidate < *worst,
                    _ => true,
                };
                if accept {
                    frontier.push(Reverse(candidate));
                    results.push(candidate);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        Ok(results.into_sorted_vec())
    }

    /// Search for the k nearest live vectors
    ///
    /// `ef` is clamped up to k. Empty index returns an empty list; k larger
    /// than the live count returns everything reachable.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<(u32, f32)>> {
        if query.len() != self.config.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.config.dimension,
                actual: query.len(),
            });
        }
        let Some(entry) = self.entry_point else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let query = if self.config.metric == Metric::Cosine {
            crate::vector_db::distance_inline::normalized(query)
        } else {
            query.to_vec()
        };

        let mut curr = entry;
        let mut curr_dist = self.dist(&query, curr);
        for layer in (1..=self.max_level).rev() {
            (curr, curr_dist) = self.greedy_step(&query, curr, curr_dist, layer);
        }

        // Over-fetch so tombstone filtering still yields k results.
        let mut beam = ef.max(k);
        if !self.deleted.is_empty() {
            beam = beam
                .saturating_add(self.deleted.len().min(beam * crate::constants::FILTER_OVERFETCH_FACTOR));
        }

        let entries = [Candidate {
            distance: curr_dist,
            id: curr,
        }];
        let found = self.search_layer(&query, &entries, beam, 0, cancel)?;

        Ok(found
            .into_iter()
            .filter(|c| !self.deleted.contains(&c.id))
            .take(k)
            .map(|c| (c.id, c.distance))
            .collect())
    }

    /// Tombstone a node. Returns false when the id is out of range or
    /// already deleted.
    pub fn mark_deleted(&mut self, id: u32) -> bool {
        if (id as usize) < self.nodes.len() {
            self.deleted.insert(id)
        } else {
            false
        }
    }

    pub fn is_deleted(&self, id: u32) -> bool {
        self.deleted.contains(&id)
    }

    /// Stored vector for an internal id (unit-length under cosine)
    pub fn vector(&self, id: u32) -> Option<&[f32]> {
        self.nodes.get(id as usize).map(|n| n.vector.as_slice())
    }

    /// Serialize for persistence
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| anyhow::anyhow!("failed to encode graph index: {e}"))
    }

    /// Deserialize a persisted graph, verifying basic structural invariants
    pub fn from_bytes(bytes: &[u8], expected_dimension: usize) -> Result<Self> {
        let (index, _): (Self, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| EngineError::IndexCorruption(format!("graph decode failed: {e}")))?;

        if index.config.dimension != expected_dimension {
            return Err(EngineError::IndexCorruption(format!(
                "persisted dimension {} != configured {}",
                index.config.dimension, expected_dimension
            )));
        }
        if let Some(entry) = index.entry_point {
            if entry as usize >= index.nodes.len() {
                return Err(EngineError::IndexCorruption(format!(
                    "entry point {} out of range ({} nodes)",
                    entry,
                    index.nodes.len()
                )));
            }
        }
        for (i, node) in index.nodes.iter().enumerate() {
            if node.vector.len() != index.config.dimension {
                return Err(EngineError::IndexCorruption(format!(
                    "node {i} has dimension {}",
                    node.vector.len()
                )));
            }
            for layer in &node.neighbors {
                if layer.iter().any(|&n| n as usize >= index.nodes.len()) {
                    return Err(EngineError::IndexCorruption(format!(
                        "node {i} references a missing neighbor"
                    )));
                }
            }
        }
        Ok(index)
    }
}
