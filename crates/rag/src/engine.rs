//! Answering engines
//!
//! A `QueryEngine` turns a question into an answer grounded in retrieved
//! documents. Two strategies exist:
//! - direct: retrieve, rerank, synthesize
//! - sub-question: decompose, answer each part directly, synthesize

use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use askdoc_core::{Document, LanguageModel};

use crate::reranker::Reranker;
use crate::retriever::HybridRetriever;
use crate::RagError;

static SUB_QUESTION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:\d+[.)]|[-*•]|sub[- ]?question\s*\d*\s*:)\s*")
        .expect("valid sub-question regex")
});

const QA_PROMPT: &str = "Context information is below.\n\
---------------------\n\
{context}\n\
---------------------\n\
Given the context information and not prior knowledge, answer the query.\n\
Query: {query}\n\
Answer: ";

const SUB_QUESTION_PROMPT: &str = "Given a user question, break it down into the smallest set of \
self-contained sub-questions that together answer it. A simple question is its own single \
sub-question. Write at most {max} sub-questions, one on each line, with no other text.\n\
Question: {query}\n\
Sub-questions:\n";

const SUB_ANSWER_PROMPT: &str = "The following sub-questions were answered from the documents:\n\
---------------------\n\
{context}\n\
---------------------\n\
Using only these answers and not prior knowledge, answer the original query.\n\
Query: {query}\n\
Answer: ";

/// Answer produced by an engine
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineResponse {
    pub text: String,
    /// Documents the answer was synthesized from
    pub sources: Vec<Document>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EngineResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_sources(mut self, sources: Vec<Document>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

impl std::fmt::Display for EngineResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn query(&self, query: &str) -> Result<EngineResponse, RagError>;
}

/// Retrieve, rerank and synthesize an answer
pub struct RetrieverQueryEngine {
    retriever: Arc<HybridRetriever>,
    reranker: Arc<dyn Reranker>,
    llm: Arc<dyn LanguageModel>,
}

impl RetrieverQueryEngine {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        reranker: Arc<dyn Reranker>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            retriever,
            reranker,
            llm,
        }
    }

    fn build_prompt(query: &str, documents: &[Document]) -> String {
        let context = documents
            .iter()
            .map(|d| d.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        QA_PROMPT
            .replace("{context}", &context)
            .replace("{query}", query)
    }
}

#[async_trait]
impl QueryEngine for RetrieverQueryEngine {
    async fn query(&self, query: &str) -> Result<EngineResponse, RagError> {
        let candidates = self.retriever.retrieve(query).await?;
        let documents = self.reranker.rerank(query, candidates).await?;

        tracing::debug!(
            query,
            reranker = self.reranker.name(),
            sources = documents.len(),
            "Synthesizing answer"
        );

        let prompt = Self::build_prompt(query, &documents);
        let text = self
            .llm
            .complete(&prompt)
            .await
            .map_err(|e| RagError::Llm(format!("Answer synthesis failed: {}", e)))?;

        Ok(EngineResponse::new(text).with_sources(documents))
    }
}

/// Decomposes a question and answers each part with an inner engine
pub struct SubQuestionQueryEngine {
    inner: Arc<dyn QueryEngine>,
    llm: Arc<dyn LanguageModel>,
    max_sub_questions: usize,
}

impl SubQuestionQueryEngine {
    pub fn new(inner: Arc<dyn QueryEngine>, llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            inner,
            llm,
            max_sub_questions: 4,
        }
    }

    pub fn with_max_sub_questions(mut self, max: usize) -> Self {
        self.max_sub_questions = max.max(1);
        self
    }

    async fn generate_sub_questions(&self, query: &str) -> Result<Vec<String>, RagError> {
        let prompt = SUB_QUESTION_PROMPT
            .replace("{max}", &self.max_sub_questions.to_string())
            .replace("{query}", query);
        let reply = self
            .llm
            .complete(&prompt)
            .await
            .map_err(|e| RagError::Llm(format!("Sub-question generation failed: {}", e)))?;

        let mut questions: Vec<String> = reply
            .lines()
            .map(|line| SUB_QUESTION_MARKER.replace(line.trim(), "").trim().to_string())
            .filter(|line| !line.is_empty() && !line.starts_with("```"))
            .collect();
        questions.dedup();
        questions.truncate(self.max_sub_questions);

        if questions.is_empty() {
            tracing::debug!(query, "No sub-questions generated, answering directly");
            questions.push(query.to_string());
        }
        Ok(questions)
    }
}

#[async_trait]
impl QueryEngine for SubQuestionQueryEngine {
    async fn query(&self, query: &str) -> Result<EngineResponse, RagError> {
        let questions = self.generate_sub_questions(query).await?;
        tracing::debug!(query, ?questions, "Generated sub-questions");

        let results = join_all(questions.iter().map(|q| self.inner.query(q))).await;

        let mut answered = Vec::new();
        let mut first_error = None;
        for (question, result) in questions.iter().zip(results) {
            match result {
                Ok(response) => answered.push((question.as_str(), response)),
                Err(e) => {
                    tracing::warn!(sub_question = %question, error = %e, "Sub-question failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if answered.is_empty() {
            return Err(first_error.unwrap_or_else(|| {
                RagError::RetrievalFailure("no sub-question produced an answer".to_string())
            }));
        }

        let context = answered
            .iter()
            .map(|(q, r)| format!("Sub question: {}\nResponse: {}", q, r.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = SUB_ANSWER_PROMPT
            .replace("{context}", &context)
            .replace("{query}", query);
        let text = self
            .llm
            .complete(&prompt)
            .await
            .map_err(|e| RagError::Llm(format!("Sub-answer synthesis failed: {}", e)))?;

        let sub_questions: Vec<&str> = answered.iter().map(|(q, _)| *q).collect();
        let sources = answered
            .iter()
            .flat_map(|(_, r)| r.sources.iter().cloned())
            .collect();

        Ok(EngineResponse::new(text)
            .with_sources(sources)
            .with_metadata("sub_questions", serde_json::json!(sub_questions)))
    }
}

/// The closed set of answering strategies a router can dispatch to
pub enum AnsweringStrategy {
    Direct(RetrieverQueryEngine),
    SubQuestion(SubQuestionQueryEngine),
}

#[async_trait]
impl QueryEngine for AnsweringStrategy {
    async fn query(&self, query: &str) -> Result<EngineResponse, RagError> {
        match self {
            AnsweringStrategy::Direct(engine) => engine.query(query).await,
            AnsweringStrategy::SubQuestion(engine) => engine.query(query).await,
        }
    }
}
