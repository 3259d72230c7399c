//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{endpoints, llm, rag};
use crate::{ConfigError, MemoryConfig, WorkflowConfig};

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Language model backend
    #[serde(default)]
    pub llm: LlmConfig,

    /// Retrieval, fusion and reranking
    #[serde(default)]
    pub rag: RagConfig,

    /// Refinement workflow limits
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Conversation memory bounds
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Logging
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_llm()?;
        self.validate_rag()?;
        self.validate_workflow()?;
        self.validate_memory()?;
        Ok(())
    }

    fn validate_llm(&self) -> Result<(), ConfigError> {
        let llm = &self.llm;

        if llm.model.trim().is_empty() {
            return Err(ConfigError::invalid("llm.model", "Must not be empty"));
        }

        if !(0.0..=2.0).contains(&llm.temperature) {
            return Err(ConfigError::invalid(
                "llm.temperature",
                format!("Must be between 0.0 and 2.0, got {}", llm.temperature),
            ));
        }

        if llm.timeout_secs == 0 {
            return Err(ConfigError::invalid("llm.timeout_secs", "Must be at least 1"));
        }

        if llm.provider == LlmProvider::OpenAi && llm.api_key.is_none() {
            tracing::warn!("llm.provider is openai but no llm.api_key is set");
        }

        Ok(())
    }

    fn validate_rag(&self) -> Result<(), ConfigError> {
        let rag = &self.rag;

        if rag.top_k == 0 {
            return Err(ConfigError::invalid("rag.top_k", "Must be at least 1"));
        }

        if rag.num_queries == 0 {
            return Err(ConfigError::invalid(
                "rag.num_queries",
                "Must be at least 1 (1 disables query expansion)",
            ));
        }

        if rag.rrf_k <= 0.0 {
            return Err(ConfigError::invalid(
                "rag.rrf_k",
                format!("Must be positive, got {}", rag.rrf_k),
            ));
        }

        if rag.rerank_top_n == 0 {
            return Err(ConfigError::invalid("rag.rerank_top_n", "Must be at least 1"));
        }

        if rag.rerank_top_n > rag.top_k {
            tracing::warn!(
                "rag.rerank_top_n ({}) is larger than rag.top_k ({}), reranking will not filter",
                rag.rerank_top_n,
                rag.top_k
            );
        }

        if rag.embedding_dim == 0 {
            return Err(ConfigError::invalid("rag.embedding_dim", "Must be at least 1"));
        }

        if let Some(weights) = &rag.retriever_weights {
            if weights.iter().any(|w| *w < 0.0) {
                return Err(ConfigError::invalid(
                    "rag.retriever_weights",
                    "Weights must be non-negative",
                ));
            }
        }

        Ok(())
    }

    fn validate_workflow(&self) -> Result<(), ConfigError> {
        if self.workflow.timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "workflow.timeout_secs",
                "Must be at least 1",
            ));
        }
        Ok(())
    }

    fn validate_memory(&self) -> Result<(), ConfigError> {
        if self.memory.max_turns == 0 {
            return Err(ConfigError::invalid("memory.max_turns", "Must be at least 1"));
        }
        Ok(())
    }
}

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Ollama,
    #[serde(alias = "openai_compatible")]
    OpenAi,
}

/// LLM backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Base URL; provider default when unset
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,

    /// Per-request timeout
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries on network errors and timeouts
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_llm_model() -> String {
    llm::DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f32 {
    llm::DEFAULT_TEMPERATURE
}

fn default_llm_max_tokens() -> u32 {
    llm::DEFAULT_MAX_TOKENS
}

fn default_llm_timeout_secs() -> u64 {
    llm::DEFAULT_TIMEOUT_SECS
}

fn default_llm_max_retries() -> u32 {
    llm::DEFAULT_MAX_RETRIES
}

fn default_initial_backoff_ms() -> u64 {
    llm::DEFAULT_INITIAL_BACKOFF_MS
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: default_llm_model(),
            endpoint: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_llm_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

impl LlmConfig {
    /// Endpoint to use, falling back to the provider default
    pub fn resolved_endpoint(&self) -> &str {
        match (&self.endpoint, self.provider) {
            (Some(endpoint), _) => endpoint,
            (None, LlmProvider::Ollama) => endpoints::OLLAMA_DEFAULT,
            (None, LlmProvider::OpenAi) => endpoints::OPENAI_DEFAULT,
        }
    }
}

/// How ranked lists from several retrievers are merged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    /// Sum of `1 / (rank + k)` across lists
    #[default]
    ReciprocalRank,
    /// Min-max normalise each list, then weighted sum
    RelativeScore,
    /// Normalise each list against mean ± 3 standard deviations, then weighted sum
    DistBased,
    /// Deduplicate keeping the highest raw score
    Simple,
}

/// Reranking policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RerankerKind {
    /// LLM scores each candidate
    #[default]
    Llm,
    /// Query term overlap, no model call
    Keyword,
    /// Keep fused order, truncate only
    None,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Results per retriever and after fusion
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Query variants including the original; 1 disables expansion
    #[serde(default = "default_num_queries")]
    pub num_queries: usize,

    #[serde(default)]
    pub fusion_mode: FusionMode,

    /// Reciprocal Rank Fusion parameter
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,

    /// Per-retriever weights for score-based fusion, in retriever order
    #[serde(default)]
    pub retriever_weights: Option<Vec<f32>>,

    #[serde(default)]
    pub reranker: RerankerKind,

    /// Candidates kept after reranking
    #[serde(default = "default_rerank_top_n")]
    pub rerank_top_n: usize,

    /// Candidates per LLM reranking prompt
    #[serde(default = "default_rerank_batch_size")]
    pub rerank_batch_size: usize,

    /// Dimension of the built-in embedder
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
}

fn default_top_k() -> usize {
    rag::DEFAULT_TOP_K
}

fn default_num_queries() -> usize {
    rag::DEFAULT_NUM_QUERIES
}

fn default_rrf_k() -> f32 {
    rag::DEFAULT_RRF_K
}

fn default_rerank_top_n() -> usize {
    rag::DEFAULT_RERANK_TOP_N
}

fn default_rerank_batch_size() -> usize {
    rag::DEFAULT_RERANK_BATCH_SIZE
}

fn default_embedding_dim() -> usize {
    rag::DEFAULT_EMBEDDING_DIM
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            num_queries: default_num_queries(),
            fusion_mode: FusionMode::default(),
            rrf_k: default_rrf_k(),
            retriever_weights: None,
            reranker: RerankerKind::default(),
            rerank_top_n: default_rerank_top_n(),
            rerank_batch_size: default_rerank_batch_size(),
            embedding_dim: default_embedding_dim(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level for the `askdoc` targets when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Load settings from `config/default`, `config/<env>` and `ASKDOC__*` variables
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Load settings rooted at `dir` instead of `./config`
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::from(dir.join("default")).required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::from(dir.join(env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("ASKDOC")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
