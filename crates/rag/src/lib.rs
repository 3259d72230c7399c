//! RAG (Retrieval-Augmented Generation) with hybrid search and routing
//!
//! Features:
//! - Dense vector search over an in-memory store
//! - Sparse BM25 search via Tantivy
//! - LLM query expansion
//! - Hybrid fusion (reciprocal rank, relative score, distribution based, simple)
//! - LLM and keyword reranking
//! - Direct and sub-question answering engines
//! - Router fanning a query out to several engines and combining their answers

pub mod embeddings;
pub mod engine;
pub mod factory;
pub mod fusion;
pub mod index;
pub mod query_expansion;
pub mod reranker;
pub mod retriever;
pub mod router;
pub mod sparse_search;
pub mod vector_store;

pub use embeddings::{EmbeddingConfig, HashEmbedder};
pub use engine::{
    AnsweringStrategy, EngineResponse, QueryEngine, RetrieverQueryEngine, SubQuestionQueryEngine,
};
pub use factory::{
    build_retriever, build_router, build_router_with_selector, SIMPLE_QUERY_TOOL,
    SUBQUESTION_QUERY_TOOL,
};
pub use fusion::{fuse, FusionConfig, RankedList};
pub use index::DocumentIndex;
pub use query_expansion::QueryGenerator;
pub use reranker::{
    build_reranker, KeywordReranker, KeywordScorer, LlmReranker, NoopReranker, Reranker,
};
pub use retriever::{
    CandidateRetriever, DenseRetriever, HybridRetriever, HybridRetrieverConfig, SparseRetriever,
};
pub use router::{
    CombineStrategy, EngineFailure, LlmMultiSelector, RouterQueryEngine, RouterResponse,
    SelectAllSelector, SelectionResult, Selector, SingleSelection, ToolDescriptor, ToolMetadata,
};
pub use sparse_search::{SparseConfig, SparseIndex};
pub use vector_store::{VectorDistance, VectorStore, VectorStoreConfig};

pub use askdoc_config::FusionMode;

use thiserror::Error;

/// RAG errors
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Reranker error: {0}")]
    Reranker(String),

    /// Every retriever for every query variant failed or came back empty
    #[error("Retrieval failed: {0}")]
    RetrievalFailure(String),

    /// The router could not resolve any engine
    #[error("Selection error: {0}")]
    Selection(String),
}

impl RagError {
    /// True when an LLM or embedding call is the cause
    pub fn is_capability_failure(&self) -> bool {
        matches!(self, RagError::Llm(_) | RagError::Embedding(_))
    }
}

impl From<askdoc_core::Error> for RagError {
    fn from(err: askdoc_core::Error) -> Self {
        match err {
            askdoc_core::Error::Llm(msg) => RagError::Llm(msg),
            askdoc_core::Error::Embedding(msg) => RagError::Embedding(msg),
            askdoc_core::Error::Index(msg) => RagError::Index(msg),
            other => RagError::Search(other.to_string()),
        }
    }
}

impl From<RagError> for askdoc_core::Error {
    fn from(err: RagError) -> Self {
        match err {
            RagError::Llm(msg) => askdoc_core::Error::Llm(msg),
            RagError::Embedding(msg) => askdoc_core::Error::Embedding(msg),
            RagError::Index(msg) => askdoc_core::Error::Index(msg),
            other => askdoc_core::Error::Rag(other.to_string()),
        }
    }
}
