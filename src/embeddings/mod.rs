//! Embedding generation module
//!
//! The engine treats the text embedder as a stateless, thread-safe shared
//! resource: construct one, wrap it in `Arc`, and pass it into every store.
//! No hidden process-wide state.
//!
//! The default implementation is a deterministic feature-hashing embedder.
//! It needs no model files, produces identical vectors on every platform,
//! and ranks lexically related texts close together (tokens plus character
//! trigrams, so word forms like "regression"/"regress" overlap). Hosts with
//! a semantic sentence encoder plug it in through the same trait.

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::vector_db::distance_inline::normalize_in_place;

/// Trait for embedding generation
pub trait Embedder: Send + Sync {
    /// Generate an embedding for text
    fn encode(&self, text: &str) -> Result<Vec<f32>>;

    /// Embedding dimension
    fn dimension(&self) -> usize;

    /// Batch encode multiple texts (default: sequential)
    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.encode(text)).collect()
    }
}

/// Deterministic feature-hashing embedder
///
/// Each token and each character trigram hashes to a bucket with a sign bit;
/// the resulting sparse vector is L2-normalized. Trigram features get half
/// the weight of whole tokens so exact word overlap dominates.
pub struct HashingEmbedder {
    dimension: usize,
}

/// Weight of a whole-token feature
const TOKEN_WEIGHT: f32 = 1.0;

/// Weight of a character-trigram feature
const TRIGRAM_WEIGHT: f32 = 0.5;

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Map a feature string to (bucket, signed weight)
    ///
    /// sha256 keeps bucket assignment stable across platforms and Rust
    /// versions; persisted embeddings must not depend on hasher internals.
    fn feature(&self, feature: &str, weight: f32) -> (usize, f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let bucket = u64::from_le_bytes(
            digest[..8].try_into().unwrap_or([0u8; 8]),
        ) as usize
            % self.dimension;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (bucket, sign * weight)
    }

    fn tokens(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect()
    }
}

impl Embedder for HashingEmbedder {
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in Self::tokens(text) {
            let (bucket, value) = self.feature(&token, TOKEN_WEIGHT);
            vector[bucket] += value;

            let chars: Vec<char> = token.chars().collect();
            if chars.len() > 3 {
                for window in chars.windows(3) {
                    let trigram: String = window.iter().collect();
                    let (bucket, value) = self.feature(&trigram, TRIGRAM_WEIGHT);
                    vector[bucket] += value;
                }
            }
        }

        normalize_in_place(&mut vector);
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_db::distance_inline::{cosine_similarity, l2_norm};

    fn embedder() -> HashingEmbedder {
        HashingEmbedder::new(384)
    }

    #[test]
    fn test_deterministic() {
        let e = embedder();
        let a = e.encode("bisect commit history").unwrap();
        let b = e.encode("bisect commit history").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unit_length() {
        let e = embedder();
        let v = e.encode("normalize me please").unwrap();
        assert!((l2_norm(&v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let e = embedder();
        let v = e.encode("").unwrap();
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_related_texts_rank_above_unrelated() {
        let e = embedder();
        let base = e.encode("bisect commit history to isolate regression").unwrap();
        let related = e
            .encode("bisect the commit history to find the regression")
            .unwrap();
        let unrelated = e.encode("bake sourdough bread overnight").unwrap();

        let sim_related = cosine_similarity(&base, &related);
        let sim_unrelated = cosine_similarity(&base, &unrelated);
        assert!(sim_related > 0.5, "related similarity too low: {sim_related}");
        assert!(sim_related > sim_unrelated);
    }

    #[test]
    fn test_batch_matches_single() {
        let e = embedder();
        let batch = e.encode_batch(&["alpha beta", "gamma"]).unwrap();
        assert_eq!(batch[0], e.encode("alpha beta").unwrap());
        assert_eq!(batch[1], e.encode("gamma").unwrap());
    }
}
