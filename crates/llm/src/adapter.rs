//! Language Model adapter
//!
//! Bridges the `LlmBackend` trait to the core `LanguageModel` trait,
//! so HTTP backends can be used wherever a capability is expected.

use async_trait::async_trait;
use std::sync::Arc;

use askdoc_core::{GenerateRequest, GenerateResponse, LanguageModel, Message, Result, TokenUsage};

use crate::backend::LlmBackend;

/// Adapter that wraps an LlmBackend to implement the core LanguageModel trait.
///
/// Request-level overrides (`temperature`, `max_tokens`) are ignored; the
/// backend's own configuration applies.
///
/// # Example
///
/// ```ignore
/// let backend = OllamaBackend::new(config)?;
/// let llm: Arc<dyn LanguageModel> = Arc::new(LanguageModelAdapter::new(backend));
/// ```
pub struct LanguageModelAdapter {
    backend: Arc<dyn LlmBackend>,
    model_name: String,
}

impl LanguageModelAdapter {
    pub fn new<B: LlmBackend + 'static>(backend: B) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    pub fn from_arc(backend: Arc<dyn LlmBackend>) -> Self {
        let model_name = backend.model_name().to_string();
        Self {
            backend,
            model_name,
        }
    }
}

#[async_trait]
impl LanguageModel for LanguageModelAdapter {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let messages: &[Message] = &request.messages;
        tracing::debug!(
            model = %self.model_name,
            messages = messages.len(),
            "LLM call"
        );

        let result = self.backend.generate(messages).await?;

        tracing::debug!(
            model = %self.model_name,
            tokens = result.tokens,
            elapsed_ms = result.total_time_ms,
            "LLM call finished"
        );

        Ok(GenerateResponse {
            text: result.text,
            finish_reason: result.finish_reason,
            usage: Some(TokenUsage::new(result.prompt_tokens, result.tokens)),
        })
    }

    async fn is_available(&self) -> bool {
        self.backend.is_available().await
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
