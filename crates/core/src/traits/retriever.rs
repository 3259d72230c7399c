//! Retrieval capability traits

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::Result;

/// Retrieved document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document ID, unique within an index
    pub id: String,
    /// Document text
    pub content: String,
    /// Relevance score assigned by whoever produced this copy
    pub score: f32,
    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Name of the retriever that produced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            score,
            metadata: HashMap::new(),
            source: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }
}

/// Text embedding capability
#[async_trait]
pub trait Embedder: Send + Sync + 'static {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Vector dimension produced by `embed`
    fn dimension(&self) -> usize;
}

/// Vector similarity index
///
/// May be remote, so both operations are async.
#[async_trait]
pub trait VectorIndex: Send + Sync + 'static {
    /// Ranked nearest neighbours, best first
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<Document>>;

    async fn insert(&self, document: Document, vector: Vec<f32>) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lexical (term-frequency) index
///
/// In-process and CPU bound; async callers should go through
/// `spawn_blocking`.
pub trait LexicalIndex: Send + Sync + 'static {
    /// Ranked matches, best first
    fn search(&self, query: &str, k: usize) -> Result<Vec<Document>>;

    fn insert(&self, documents: &[Document]) -> Result<()>;

    fn delete(&self, id: &str) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
