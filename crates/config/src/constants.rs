//! Centralized defaults
//!
//! Single source of truth for default values used across the crates.

/// Retrieval and fusion defaults
pub mod rag {
    /// Fused results kept per query
    pub const DEFAULT_TOP_K: usize = 10;

    /// Total query variants including the original
    pub const DEFAULT_NUM_QUERIES: usize = 4;

    /// Reciprocal Rank Fusion smoothing constant
    pub const DEFAULT_RRF_K: f32 = 60.0;

    /// Candidates kept by the reranker
    pub const DEFAULT_RERANK_TOP_N: usize = 3;

    /// Candidates per prompt for the LLM reranker
    pub const DEFAULT_RERANK_BATCH_SIZE: usize = 10;

    /// Dimension of the built-in hash embedder
    pub const DEFAULT_EMBEDDING_DIM: usize = 384;
}

/// Refinement workflow defaults
pub mod workflow {
    /// Whole-turn deadline
    pub const DEFAULT_TIMEOUT_SECS: u64 = 180;

    /// Query rewrites allowed per turn
    pub const DEFAULT_MAX_QUERY_IMPROVEMENTS: u32 = 1;

    /// Re-queries allowed after a `retry` verdict
    pub const DEFAULT_MAX_RETRIES: u32 = 2;
}

/// Conversation memory defaults
pub mod memory {
    pub const DEFAULT_MAX_TURNS: usize = 20;

    /// Approximate token budget for the rendered history
    pub const DEFAULT_MAX_TOKENS: usize = 3000;

    /// Exchanges remembered by each role chat session
    pub const DEFAULT_CHAT_HISTORY: usize = 16;
}

/// Service endpoints
pub mod endpoints {
    pub const OLLAMA_DEFAULT: &str = "http://localhost:11434";
    pub const OPENAI_DEFAULT: &str = "https://api.openai.com/v1";
}

/// LLM defaults
pub mod llm {
    pub const DEFAULT_MODEL: &str = "qwen2.5:7b";
    pub const DEFAULT_TEMPERATURE: f32 = 0.1;
    pub const DEFAULT_MAX_TOKENS: u32 = 1024;
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;
}
