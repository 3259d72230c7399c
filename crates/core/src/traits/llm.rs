//! Language Model traits

use async_trait::async_trait;
use unicode_segmentation::UnicodeSegmentation;

use crate::{GenerateRequest, GenerateResponse, Message, Result};

/// Language Model interface
///
/// Implementations:
/// - `LanguageModelAdapter` over the Ollama and OpenAI-compatible backends
/// - scripted mocks in tests
///
/// # Example
///
/// ```ignore
/// let llm: Arc<dyn LanguageModel> = Arc::new(LanguageModelAdapter::new(backend));
/// let verdict = llm.complete("Is this query specific enough?").await?;
/// ```
#[async_trait]
pub trait LanguageModel: Send + Sync + 'static {
    /// Generate completion
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse>;

    /// Check if model is available
    async fn is_available(&self) -> bool;

    /// Get model name for logging
    fn model_name(&self) -> &str;

    /// Single-prompt completion, trimmed
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest::default().with_user_message(prompt);
        let response = self.generate(request).await?;
        Ok(response.text.trim().to_string())
    }

    /// Chat completion over a message history, trimmed
    async fn chat(&self, messages: &[Message]) -> Result<String> {
        let request = GenerateRequest::from_messages(messages.to_vec());
        let response = self.generate(request).await?;
        Ok(response.text.trim().to_string())
    }

    /// Get context window size in tokens
    fn context_size(&self) -> usize {
        4096
    }

    /// Estimate token count for text
    ///
    /// Word-boundary heuristic; implementations may use a real tokenizer.
    fn estimate_tokens(&self, text: &str) -> usize {
        let words = text.unicode_words().count();
        (words * 4).div_ceil(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;
    use std::sync::Mutex;

    struct MockLlm {
        last_request: Mutex<Option<GenerateRequest>>,
    }

    #[async_trait]
    impl LanguageModel for MockLlm {
        async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
            *self.last_request.lock().unwrap() = Some(request);
            Ok(GenerateResponse::text("  Mock response \n"))
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn model_name(&self) -> &str {
            "mock-llm"
        }
    }

    fn mock() -> MockLlm {
        MockLlm {
            last_request: Mutex::new(None),
        }
    }

    #[tokio::test]
    async fn test_complete_trims_and_sends_user_message() {
        let llm = mock();
        assert!(llm.is_available().await);

        let text = llm.complete("Hello").await.unwrap();
        assert_eq!(text, "Mock response");

        let request = llm.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_chat_forwards_history() {
        let llm = mock();
        let history = vec![Message::user("a"), Message::assistant("b"), Message::user("c")];
        llm.chat(&history).await.unwrap();

        let request = llm.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.messages, history);
    }

    #[test]
    fn test_token_estimation() {
        let llm = mock();
        let estimate = llm.estimate_tokens("Hello world");
        assert!(estimate > 0 && estimate < 10);
        assert_eq!(llm.context_size(), 4096);
    }
}
