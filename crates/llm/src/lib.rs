//! LLM integration
//!
//! Features:
//! - Ollama and OpenAI-compatible HTTP backends with retry/backoff
//! - Adapter onto the core `LanguageModel` capability
//! - `ChatSession`: a role-scoped chat engine that remembers its own exchanges
//! - Factory building a backend from settings

pub mod adapter;
pub mod backend;
pub mod chat;
pub mod factory;

pub use adapter::LanguageModelAdapter;
pub use backend::{BackendConfig, GenerationResult, LlmBackend, OllamaBackend, OpenAIBackend};
pub use chat::ChatSession;
pub use factory::create_language_model;

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LlmError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Network(_) | LlmError::Timeout)
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for askdoc_core::Error {
    fn from(err: LlmError) -> Self {
        askdoc_core::Error::Llm(err.to_string())
    }
}
