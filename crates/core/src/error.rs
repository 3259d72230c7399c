//! Error types shared across crates

use thiserror::Error;

/// Top-level error type
///
/// Crate-specific errors (`LlmError`, `RagError`, `WorkflowError`, ...)
/// convert into this type at crate boundaries.
#[derive(Error, Debug)]
pub enum Error {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Retrieval error: {0}")]
    Rag(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True for failures that originate in an external model call
    pub fn is_capability_failure(&self) -> bool {
        matches!(self, Error::Llm(_) | Error::Embedding(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
