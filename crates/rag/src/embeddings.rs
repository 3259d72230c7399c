//! Text Embeddings
//!
//! Deterministic feature-hashing embedder. Needs no model, so indexes can be
//! built offline and in tests; production deployments plug a provider in
//! through the core `Embedder` trait instead.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use unicode_segmentation::UnicodeSegmentation;

use askdoc_core::{Embedder, Result};

/// Embedding configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Embedding dimension
    pub embedding_dim: usize,
    /// Normalize embeddings to unit length
    pub normalize: bool,
    /// Also hash character trigrams, for tolerance to inflection and typos
    pub char_ngrams: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 384,
            normalize: true,
            char_ngrams: true,
        }
    }
}

/// Feature-hashing embedder over words and character trigrams
pub struct HashEmbedder {
    config: EmbeddingConfig,
}

impl HashEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let mut hasher = DefaultHasher::new();
        feature.hash(&mut hasher);
        let hash = hasher.finish();
        let idx = (hash % self.config.embedding_dim as u64) as usize;
        // sign bit keeps collisions from always adding up
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        (idx, sign)
    }

    /// Synchronous embedding
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.config.embedding_dim];
        let lower = text.to_lowercase();

        for word in lower.unicode_words() {
            let (idx, sign) = self.bucket(word);
            embedding[idx] += sign;

            if self.config.char_ngrams {
                let padded: Vec<char> = format!("#{}#", word).chars().collect();
                for gram in padded.windows(3) {
                    let gram: String = gram.iter().collect();
                    let (idx, sign) = self.bucket(&gram);
                    embedding[idx] += 0.5 * sign;
                }
            }
        }

        if self.config.normalize {
            let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for v in &mut embedding {
                    *v /= norm;
                }
            }
        }

        embedding
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.config.embedding_dim
    }
}
