//! Workflow role capabilities
//!
//! Each step of the refinement workflow calls one of these traits, so the
//! state machine can be driven by LLM-backed roles in production and by
//! scripted stubs in tests.

use async_trait::async_trait;
use std::sync::Arc;

use askdoc_config::MemoryConfig;
use askdoc_core::{LanguageModel, Result};
use askdoc_llm::ChatSession;
use askdoc_rag::{RagError, RouterQueryEngine};

use crate::memory::ConversationMemory;
use crate::prompts;

/// Query judge verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryVerdict {
    Good,
    Bad,
    /// Already judged this turn with no improvements left; not sent to the judge
    Repeated,
}

impl QueryVerdict {
    /// `bad` (case-insensitive, quotes and fences ignored) is bad, anything else good
    pub fn parse(reply: &str) -> Self {
        match first_line(reply).as_str() {
            "bad" => QueryVerdict::Bad,
            _ => QueryVerdict::Good,
        }
    }
}

/// Response judge verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseVerdict {
    Correct,
    Retry,
    Failure,
}

/// Verdict plus the judge's reasoning lines
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseJudgement {
    pub verdict: ResponseVerdict,
    pub reasoning: String,
}

impl ResponseJudgement {
    /// Verdict from the first line, reasoning from the rest
    ///
    /// Unrecognised verdicts count as `Failure`.
    pub fn parse(reply: &str) -> Self {
        let body = reply.trim();
        let verdict = match first_line(body).as_str() {
            "correct" => ResponseVerdict::Correct,
            "retry" => ResponseVerdict::Retry,
            "failure" => ResponseVerdict::Failure,
            other => {
                tracing::warn!(verdict = other, "Unrecognised response verdict, treating as failure");
                ResponseVerdict::Failure
            }
        };
        let reasoning = body
            .lines()
            .skip_while(|l| l.trim_matches(|c: char| c == '`' || c.is_whitespace()).is_empty())
            .skip(1)
            .filter(|l| !l.trim_start().starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();
        Self { verdict, reasoning }
    }
}

/// First non-blank line, lowercased, without fences, quotes or trailing dot
fn first_line(reply: &str) -> String {
    let strip = |c: char| c == '`' || c == '\'' || c == '"' || c == '.' || c.is_whitespace();
    reply
        .lines()
        .map(|l| l.trim_matches(strip))
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .to_lowercase()
}

/// Judges queries before search and answers after it
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge_query(&self, query: &str) -> Result<QueryVerdict>;

    /// `intermediate` holds every answer produced this turn, oldest first
    async fn judge_response(
        &self,
        original_query: &str,
        intermediate: &[String],
        latest: &str,
    ) -> Result<ResponseJudgement>;
}

/// Rewrites queries
#[async_trait]
pub trait Improver: Send + Sync {
    /// Add specificity without adding meaning
    async fn improve(&self, query: &str) -> Result<String>;

    /// Build a follow-up query for what `answer` left unanswered
    async fn requery(&self, original_query: &str, query: &str, answer: &str) -> Result<String>;
}

/// Builds cross-turn context and writes the final answer
#[async_trait]
pub trait Answerer: Send + Sync {
    async fn build_context(&self, memory: &ConversationMemory, query: &str) -> Result<String>;

    /// Answer `original_query` strictly from the `query`/`answer` context
    async fn answer(
        &self,
        original_query: &str,
        query: &str,
        answer: &str,
        memory: &ConversationMemory,
    ) -> Result<String>;
}

/// Search capability backing the workflow's Search step
///
/// # Example
///
/// ```ignore
/// struct Canned;
///
/// #[async_trait]
/// impl SearchEngine for Canned {
///     async fn search(&self, _query: &str) -> Result<String, RagError> {
///         Ok("Seals are inspected quarterly.".to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait SearchEngine: Send + Sync {
    async fn search(&self, query: &str) -> std::result::Result<String, RagError>;
}

#[async_trait]
impl SearchEngine for RouterQueryEngine {
    async fn search(&self, query: &str) -> std::result::Result<String, RagError> {
        let response = self.route(query).await?;
        if !response.failures.is_empty() {
            tracing::debug!(failures = response.failures.len(), "Search succeeded with engine failures");
        }
        Ok(response.text.trim().to_string())
    }
}

/// Role handles owned by one conversation
#[derive(Clone)]
pub struct Roles {
    pub judge: Arc<dyn Judge>,
    pub improver: Arc<dyn Improver>,
    pub answerer: Arc<dyn Answerer>,
}

impl Roles {
    /// Fresh LLM-backed roles; judge and improver keep their own chat history
    pub fn from_llm(llm: Arc<dyn LanguageModel>, memory: &MemoryConfig) -> Self {
        Self {
            judge: Arc::new(LlmJudge::new(Arc::clone(&llm), memory.chat_history)),
            improver: Arc::new(LlmImprover::new(Arc::clone(&llm), memory.chat_history)),
            answerer: Arc::new(LlmAnswerer::new(llm)),
        }
    }
}

pub struct LlmJudge {
    chat: ChatSession,
}

impl LlmJudge {
    pub fn new(llm: Arc<dyn LanguageModel>, history: usize) -> Self {
        Self {
            chat: ChatSession::new(llm, history),
        }
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn judge_query(&self, query: &str) -> Result<QueryVerdict> {
        let reply = self.chat.chat(&prompts::judge_query(query)).await?;
        let verdict = QueryVerdict::parse(&reply);
        tracing::debug!(query, reply = %reply, ?verdict, "Judged query");
        Ok(verdict)
    }

    async fn judge_response(
        &self,
        original_query: &str,
        intermediate: &[String],
        latest: &str,
    ) -> Result<ResponseJudgement> {
        let prompt = prompts::judge_response(original_query, intermediate, latest);
        let reply = self.chat.chat(&prompt).await?;
        let judgement = ResponseJudgement::parse(&reply);
        tracing::debug!(verdict = ?judgement.verdict, reasoning = %judgement.reasoning, "Judged response");
        Ok(judgement)
    }
}

pub struct LlmImprover {
    chat: ChatSession,
}

impl LlmImprover {
    pub fn new(llm: Arc<dyn LanguageModel>, history: usize) -> Self {
        Self {
            chat: ChatSession::new(llm, history),
        }
    }
}

#[async_trait]
impl Improver for LlmImprover {
    async fn improve(&self, query: &str) -> Result<String> {
        self.chat.chat(&prompts::improve_query(query)).await
    }

    async fn requery(&self, original_query: &str, query: &str, answer: &str) -> Result<String> {
        let new_query = self
            .chat
            .chat(&prompts::requery_new(original_query, query, answer))
            .await?;
        self.chat
            .chat(&prompts::requery_rewrite(original_query, query, answer, &new_query))
            .await
    }
}

/// Talks to the model with the conversation memory as chat history
///
/// The session keeps no history of its own; memory already holds every
/// exchange of the conversation.
pub struct LlmAnswerer {
    chat: ChatSession,
}

impl LlmAnswerer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            chat: ChatSession::new(llm, 0),
        }
    }

    async fn chat_with_memory(&self, memory: &ConversationMemory, prompt: String) -> Result<String> {
        self.chat.chat_with_context(&memory.as_messages(), &prompt).await
    }
}

#[async_trait]
impl Answerer for LlmAnswerer {
    async fn build_context(&self, memory: &ConversationMemory, query: &str) -> Result<String> {
        let prompt = prompts::build_context(&memory.history_str(), query);
        self.chat_with_memory(memory, prompt).await
    }

    async fn answer(
        &self,
        original_query: &str,
        query: &str,
        answer: &str,
        memory: &ConversationMemory,
    ) -> Result<String> {
        self.chat_with_memory(memory, prompts::answer(query, answer, original_query))
            .await
    }
}
