//! Document index
//!
//! One document store feeding both a vector index and a lexical index, so
//! the dense and sparse retrievers always see the same corpus.

use std::sync::Arc;

use askdoc_config::RagConfig;
use askdoc_core::{Document, Embedder, LexicalIndex, VectorIndex};

use crate::embeddings::{EmbeddingConfig, HashEmbedder};
use crate::retriever::{DenseRetriever, SparseRetriever};
use crate::sparse_search::{SparseConfig, SparseIndex};
use crate::vector_store::{VectorStore, VectorStoreConfig};
use crate::RagError;

pub struct DocumentIndex {
    embedder: Arc<dyn Embedder>,
    vector: Arc<dyn VectorIndex>,
    lexical: Arc<dyn LexicalIndex>,
}

impl DocumentIndex {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector: Arc<dyn VectorIndex>,
        lexical: Arc<dyn LexicalIndex>,
    ) -> Self {
        Self {
            embedder,
            vector,
            lexical,
        }
    }

    /// Hash embedder, in-memory vector store and in-RAM tantivy index
    pub fn in_memory(config: &RagConfig) -> Result<Self, RagError> {
        let embedder = HashEmbedder::new(EmbeddingConfig {
            embedding_dim: config.embedding_dim,
            ..Default::default()
        });
        let vector = VectorStore::new(VectorStoreConfig {
            vector_dim: config.embedding_dim,
            ..Default::default()
        });
        let lexical = SparseIndex::new(SparseConfig::default())?;
        Ok(Self::new(
            Arc::new(embedder),
            Arc::new(vector),
            Arc::new(lexical),
        ))
    }

    pub async fn insert(&self, document: Document) -> Result<(), RagError> {
        self.insert_batch(vec![document]).await
    }

    /// Embed and index documents; an existing id is replaced
    pub async fn insert_batch(&self, documents: Vec<Document>) -> Result<(), RagError> {
        if documents.is_empty() {
            return Ok(());
        }

        let texts: Vec<&str> = documents.iter().map(|d| d.content.as_str()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        let lexical = Arc::clone(&self.lexical);
        let batch = documents.clone();
        tokio::task::spawn_blocking(move || lexical.insert(&batch))
            .await
            .map_err(|e| RagError::Index(format!("Lexical indexing task failed: {}", e)))??;

        let count = documents.len();
        for (document, vector) in documents.into_iter().zip(vectors) {
            self.vector.insert(document, vector).await?;
        }

        tracing::debug!(count, total = self.len(), "Indexed documents");
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), RagError> {
        self.vector.delete(id).await?;
        self.lexical.delete(id)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dense_retriever(&self) -> DenseRetriever {
        DenseRetriever::new(Arc::clone(&self.embedder), Arc::clone(&self.vector))
    }

    pub fn sparse_retriever(&self) -> SparseRetriever {
        SparseRetriever::new(Arc::clone(&self.lexical))
    }
}
