//! Hybrid Retriever
//!
//! Runs every candidate retriever for the query and each of its LLM-generated
//! variants concurrently, then fuses all ranked lists into one.
//!
//! Failed or empty branches are logged and dropped; only when no branch
//! produced anything does retrieval fail.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;

use askdoc_config::RagConfig;
use askdoc_core::{Document, Embedder, LexicalIndex, VectorIndex};

use crate::fusion::{fuse, FusionConfig, RankedList};
use crate::query_expansion::QueryGenerator;
use crate::RagError;

/// A single ranked-list producer
#[async_trait]
pub trait CandidateRetriever: Send + Sync {
    /// Short name used in logs and `Document::source`
    fn name(&self) -> &str;

    /// Ranked candidates for `query`, best first, at most `k`
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Document>, RagError>;
}

/// Embeds the query and searches a vector index
pub struct DenseRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl DenseRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }
}

#[async_trait]
impl CandidateRetriever for DenseRetriever {
    fn name(&self) -> &str {
        "vector"
    }

    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Document>, RagError> {
        let embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        let results = self.index.search(&embedding, k).await?;
        Ok(results
            .into_iter()
            .map(|d| d.with_source(self.name()))
            .collect())
    }
}

/// BM25 search over a lexical index, off the async executor
pub struct SparseRetriever {
    index: Arc<dyn LexicalIndex>,
}

impl SparseRetriever {
    pub fn new(index: Arc<dyn LexicalIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl CandidateRetriever for SparseRetriever {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Document>, RagError> {
        let index = Arc::clone(&self.index);
        let query_owned = query.to_string();

        // Tantivy search is CPU bound
        let results = tokio::task::spawn_blocking(move || index.search(&query_owned, k))
            .await
            .map_err(|e| RagError::Search(format!("Sparse search task failed: {}", e)))??;

        Ok(results
            .into_iter()
            .map(|d| d.with_source(self.name()))
            .collect())
    }
}

/// Hybrid retriever configuration
#[derive(Debug, Clone)]
pub struct HybridRetrieverConfig {
    /// Candidates requested from each retriever
    pub per_retriever_k: usize,
    /// Query variants including the original; 1 disables expansion
    pub num_queries: usize,
    pub fusion: FusionConfig,
}

impl Default for HybridRetrieverConfig {
    fn default() -> Self {
        HybridRetrieverConfig::from(&RagConfig::default())
    }
}

impl From<&RagConfig> for HybridRetrieverConfig {
    fn from(config: &RagConfig) -> Self {
        Self {
            per_retriever_k: config.top_k,
            num_queries: config.num_queries,
            fusion: FusionConfig::from(config),
        }
    }
}

/// Multi-retriever, multi-query fusion retriever
pub struct HybridRetriever {
    retrievers: Vec<Arc<dyn CandidateRetriever>>,
    generator: Option<QueryGenerator>,
    config: HybridRetrieverConfig,
}

type BranchResult = (usize, String, Result<Vec<Document>, RagError>);

impl HybridRetriever {
    pub fn new(config: HybridRetrieverConfig) -> Self {
        Self {
            retrievers: Vec::new(),
            generator: None,
            config,
        }
    }

    /// Add a retriever; its position is its weight index
    pub fn with_retriever(mut self, retriever: Arc<dyn CandidateRetriever>) -> Self {
        self.retrievers.push(retriever);
        self
    }

    /// Enable query expansion when `num_queries > 1`
    pub fn with_query_generator(mut self, generator: QueryGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn config(&self) -> &HybridRetrieverConfig {
        &self.config
    }

    /// Run every retriever against one query variant concurrently
    async fn retrieve_variant(&self, query: &str) -> Vec<BranchResult> {
        let k = self.config.per_retriever_k;
        let branches = self.retrievers.iter().enumerate().map(|(idx, retriever)| {
            let query = query.to_string();
            async move {
                let result = retriever.retrieve(&query, k).await;
                (idx, query, result)
            }
        });
        join_all(branches).await
    }

    /// Alternative phrasings; a failed expansion degrades to none
    async fn expand(&self, query: &str) -> Vec<String> {
        let Some(generator) = &self.generator else {
            return Vec::new();
        };
        match generator.generate(query, self.config.num_queries).await {
            Ok(variants) => variants,
            Err(e) => {
                tracing::warn!(error = %e, "Query expansion failed, using the original query only");
                Vec::new()
            }
        }
    }

    /// Retrieve, expand and fuse
    pub async fn retrieve(&self, query: &str) -> Result<Vec<Document>, RagError> {
        if self.retrievers.is_empty() {
            return Err(RagError::RetrievalFailure(
                "No retrievers configured".to_string(),
            ));
        }

        // variants start as soon as expansion returns, overlapping the original
        let expanded = async {
            let variants = distinct_variants(query, self.expand(query).await);
            join_all(variants.iter().map(|v| self.retrieve_variant(v))).await
        };
        let (mut branches, variant_branches) =
            tokio::join!(self.retrieve_variant(query), expanded);
        branches.extend(variant_branches.into_iter().flatten());

        let total = branches.len();
        let mut lists = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (retriever, variant, result) in branches {
            let name = self.retrievers[retriever].name();
            match result {
                Ok(documents) if !documents.is_empty() => {
                    tracing::debug!(
                        retriever = name,
                        query = %variant,
                        ids = ?documents.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
                        "Retrieved candidates"
                    );
                    lists.push(RankedList::new(retriever, variant, documents));
                }
                Ok(_) => {
                    tracing::debug!(retriever = name, query = %variant, "Retriever returned nothing");
                }
                Err(e) => {
                    tracing::warn!(retriever = name, query = %variant, error = %e, "Retriever failed");
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }

        if lists.is_empty() {
            let detail = if failures.is_empty() {
                format!("no results from {} retrieval branches", total)
            } else {
                failures.join("; ")
            };
            return Err(RagError::RetrievalFailure(detail));
        }

        Ok(fuse(&lists, &self.config.fusion))
    }
}

/// Drop variants equal to the original or to an earlier variant
///
/// Expansion pads short replies with the original query; retrieving those
/// again would add duplicate ranked lists and inflate the original's fused
/// score.
fn distinct_variants(original: &str, variants: Vec<String>) -> Vec<String> {
    let mut distinct: Vec<String> = Vec::with_capacity(variants.len());
    for variant in variants {
        if variant == original || distinct.contains(&variant) {
            continue;
        }
        distinct.push(variant);
    }
    if distinct.is_empty() {
        tracing::debug!(query = original, "No distinct query variants");
    }
    distinct
}
