//! Workflow and memory configuration

use serde::{Deserialize, Serialize};

use crate::constants::{memory, workflow};

/// Refinement workflow limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Wall-clock deadline for one turn, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Query rewrites allowed before the judge is skipped
    #[serde(default = "default_max_query_improvements")]
    pub max_query_improvements: u32,

    /// Re-queries allowed after the response judge asks for a retry
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout_secs() -> u64 {
    workflow::DEFAULT_TIMEOUT_SECS
}

fn default_max_query_improvements() -> u32 {
    workflow::DEFAULT_MAX_QUERY_IMPROVEMENTS
}

fn default_max_retries() -> u32 {
    workflow::DEFAULT_MAX_RETRIES
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_query_improvements: default_max_query_improvements(),
            max_retries: default_max_retries(),
        }
    }
}

/// Conversation memory bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Oldest turns are evicted beyond this count
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Oldest turns are evicted while the history exceeds this estimate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Messages each role chat session keeps
    #[serde(default = "default_chat_history")]
    pub chat_history: usize,
}

fn default_max_turns() -> usize {
    memory::DEFAULT_MAX_TURNS
}

fn default_max_tokens() -> usize {
    memory::DEFAULT_MAX_TOKENS
}

fn default_chat_history() -> usize {
    memory::DEFAULT_CHAT_HISTORY
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_tokens: default_max_tokens(),
            chat_history: default_chat_history(),
        }
    }
}
