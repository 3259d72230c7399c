//! Builds a `LanguageModel` from settings

use std::sync::Arc;

use askdoc_config::{LlmConfig, LlmProvider};
use askdoc_core::LanguageModel;

use crate::{BackendConfig, LanguageModelAdapter, LlmError, OllamaBackend, OpenAIBackend};

/// Create the configured provider wrapped as a `LanguageModel`
pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>, LlmError> {
    let backend_config = BackendConfig::from(config);
    tracing::info!(
        provider = ?config.provider,
        model = %backend_config.model,
        endpoint = %backend_config.endpoint,
        "Creating language model"
    );

    let model: Arc<dyn LanguageModel> = match config.provider {
        LlmProvider::Ollama => {
            Arc::new(LanguageModelAdapter::new(OllamaBackend::new(backend_config)?))
        }
        LlmProvider::OpenAi => {
            Arc::new(LanguageModelAdapter::new(OpenAIBackend::new(backend_config)?))
        }
    };
    Ok(model)
}
