//! In-memory vector store
//!
//! Dense vector storage and brute-force similarity search. Suitable for
//! corpora that fit in memory; larger deployments implement `VectorIndex`
//! over an external store.

use async_trait::async_trait;
use parking_lot::RwLock;

use askdoc_core::{Document, Error, Result, VectorIndex};

/// Distance metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorDistance {
    #[default]
    Cosine,
    Euclidean,
    DotProduct,
}

impl VectorDistance {
    /// Similarity where higher is better
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            VectorDistance::DotProduct => dot(a, b),
            VectorDistance::Cosine => {
                let denom = dot(a, a).sqrt() * dot(b, b).sqrt();
                if denom > 0.0 {
                    dot(a, b) / denom
                } else {
                    0.0
                }
            }
            VectorDistance::Euclidean => {
                let dist: f32 = a
                    .iter()
                    .zip(b)
                    .map(|(x, y)| (x - y) * (x - y))
                    .sum::<f32>()
                    .sqrt();
                1.0 / (1.0 + dist)
            }
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Vector store configuration
#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub vector_dim: usize,
    pub distance: VectorDistance,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            vector_dim: 384,
            distance: VectorDistance::Cosine,
        }
    }
}

struct Entry {
    document: Document,
    vector: Vec<f32>,
}

/// Brute-force vector store keeping insertion order
pub struct VectorStore {
    entries: RwLock<Vec<Entry>>,
    config: VectorStoreConfig,
}

impl VectorStore {
    pub fn new(config: VectorStoreConfig) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            config,
        }
    }
}

#[async_trait]
impl VectorIndex for VectorStore {
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<Document>> {
        if vector.len() != self.config.vector_dim {
            return Err(Error::Index(format!(
                "Query vector has dimension {}, expected {}",
                vector.len(),
                self.config.vector_dim
            )));
        }

        let entries = self.entries.read();
        let mut scored: Vec<(f32, &Entry)> = entries
            .iter()
            .map(|e| (self.config.distance.similarity(vector, &e.vector), e))
            .collect();

        // stable: equal scores keep insertion order
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, e)| e.document.clone().with_score(score))
            .collect())
    }

    /// Insert or replace by id
    async fn insert(&self, document: Document, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.config.vector_dim {
            return Err(Error::Index(format!(
                "Vector for '{}' has dimension {}, expected {}",
                document.id,
                vector.len(),
                self.config.vector_dim
            )));
        }

        let mut entries = self.entries.write();
        match entries.iter_mut().find(|e| e.document.id == document.id) {
            Some(existing) => {
                existing.document = document;
                existing.vector = vector;
            }
            None => entries.push(Entry { document, vector }),
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.entries.write().retain(|e| e.document.id != id);
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}
