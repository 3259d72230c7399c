//! Rerankers
//!
//! Reorder fused candidates and keep the best `top_n`:
//! - `LlmReranker`: asks the model to pick and score documents per batch
//! - `KeywordReranker`: TF-IDF-like keyword overlap, no model calls
//! - `NoopReranker`: keeps fused order

use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

use askdoc_config::{RagConfig, RerankerKind};
use askdoc_core::{Document, LanguageModel};

use crate::RagError;

static CHOICE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)doc(?:ument)?\s*:?\s*(\d+)\s*,\s*relevance\s*:?\s*(\d+(?:\.\d+)?)")
        .expect("valid choice regex")
});

const CHOICE_SELECT_PROMPT: &str = "A list of documents is shown below. Each document has a number next to it \
along with a summary of the document. A question is also provided.\n\
Respond with the numbers of the documents you should consult to answer the question, in order of relevance, \
as well as the relevance score. The relevance score is a number from 1-10 based on how relevant you think \
the document is to the question.\n\
Do not include any documents that are not relevant to the question.\n\
Example format:\n\
Document 1:\n<summary of document 1>\n\n\
Document 2:\n<summary of document 2>\n\n\
...\n\n\
Document 10:\n<summary of document 10>\n\n\
Question: <question>\n\
Answer:\n\
Doc: 9, Relevance: 7\n\
Doc: 3, Relevance: 4\n\
Doc: 7, Relevance: 3\n\n\
Let's try this now:\n\n\
{context}\n\
Question: {query}\n\
Answer:\n";

/// Reorders candidates by relevance to a query
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// Best first, at most the reranker's `top_n`
    async fn rerank(&self, query: &str, documents: Vec<Document>) -> Result<Vec<Document>, RagError>;
}

/// Build the reranker selected in config
pub fn build_reranker(
    kind: RerankerKind,
    llm: Arc<dyn LanguageModel>,
    config: &RagConfig,
) -> Arc<dyn Reranker> {
    match kind {
        RerankerKind::Llm => Arc::new(
            LlmReranker::new(llm, config.rerank_top_n).with_batch_size(config.rerank_batch_size),
        ),
        RerankerKind::Keyword => Arc::new(KeywordReranker::new(config.rerank_top_n)),
        RerankerKind::None => Arc::new(NoopReranker::new(config.rerank_top_n)),
    }
}

/// Keeps fused order, truncates
pub struct NoopReranker {
    top_n: usize,
}

impl NoopReranker {
    pub fn new(top_n: usize) -> Self {
        Self { top_n }
    }
}

#[async_trait]
impl Reranker for NoopReranker {
    fn name(&self) -> &str {
        "none"
    }

    async fn rerank(&self, _query: &str, mut documents: Vec<Document>) -> Result<Vec<Document>, RagError> {
        documents.truncate(self.top_n);
        Ok(documents)
    }
}

/// LLM choice-select reranker
///
/// Candidates are sent in numbered batches; the model answers with lines of
/// `Doc: <n>, Relevance: <score>`. Documents it leaves out are dropped. A
/// reply with no parseable line keeps that batch in fused order.
pub struct LlmReranker {
    llm: Arc<dyn LanguageModel>,
    top_n: usize,
    batch_size: usize,
}

impl LlmReranker {
    pub fn new(llm: Arc<dyn LanguageModel>, top_n: usize) -> Self {
        Self {
            llm,
            top_n,
            batch_size: askdoc_config::constants::rag::DEFAULT_RERANK_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn build_prompt(query: &str, batch: &[Document]) -> String {
        let context = batch
            .iter()
            .enumerate()
            .map(|(i, doc)| format!("Document {}:\n{}", i + 1, doc.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        CHOICE_SELECT_PROMPT
            .replace("{context}", &context)
            .replace("{query}", query)
    }

    /// Score one batch; returns `(index in batch, relevance)`
    async fn score_batch(&self, query: &str, batch: &[Document]) -> Result<Vec<(usize, f32)>, RagError> {
        let prompt = Self::build_prompt(query, batch);
        let reply = self
            .llm
            .complete(&prompt)
            .await
            .map_err(|e| RagError::Llm(format!("Rerank failed: {}", e)))?;

        let choices = parse_choices(&reply, batch.len());
        if choices.is_empty() {
            tracing::warn!(
                batch = batch.len(),
                "Reranker reply had no usable choices, keeping fused order"
            );
            // descending pseudo-scores preserve input order
            return Ok((0..batch.len()).map(|i| (i, -(i as f32))).collect());
        }
        Ok(choices)
    }
}

/// Parse `Doc: n, Relevance: s` lines, 1-indexed `n` within `batch_len`
///
/// Out-of-range and repeated document numbers are ignored.
pub fn parse_choices(reply: &str, batch_len: usize) -> Vec<(usize, f32)> {
    let mut seen = HashSet::new();
    let mut choices = Vec::new();
    for caps in CHOICE_LINE.captures_iter(reply) {
        let Ok(number) = caps[1].parse::<usize>() else {
            continue;
        };
        let Ok(relevance) = caps[2].parse::<f32>() else {
            continue;
        };
        if number == 0 || number > batch_len || !seen.insert(number) {
            continue;
        }
        choices.push((number - 1, relevance));
    }
    choices
}

#[async_trait]
impl Reranker for LlmReranker {
    fn name(&self) -> &str {
        "llm"
    }

    async fn rerank(&self, query: &str, documents: Vec<Document>) -> Result<Vec<Document>, RagError> {
        if documents.is_empty() {
            return Ok(documents);
        }

        let batches: Vec<&[Document]> = documents.chunks(self.batch_size).collect();
        let scored = join_all(batches.iter().map(|batch| self.score_batch(query, batch))).await;

        let mut ranked = Vec::with_capacity(documents.len());
        for (batch, result) in batches.iter().zip(scored) {
            for (idx, relevance) in result? {
                ranked.push(batch[idx].clone().with_score(relevance));
            }
        }

        // stable: equal relevance keeps fused order
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(self.top_n);

        tracing::debug!(
            query,
            kept = ranked.len(),
            candidates = documents.len(),
            "LLM rerank complete"
        );
        Ok(ranked)
    }
}

/// Keyword-overlap reranker
pub struct KeywordReranker {
    top_n: usize,
}

impl KeywordReranker {
    pub fn new(top_n: usize) -> Self {
        Self { top_n }
    }
}

#[async_trait]
impl Reranker for KeywordReranker {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn rerank(&self, query: &str, documents: Vec<Document>) -> Result<Vec<Document>, RagError> {
        let mut scored: Vec<Document> = documents
            .into_iter()
            .map(|doc| {
                let score = KeywordScorer::score(query, &doc.content);
                doc.with_score(score)
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(self.top_n);
        Ok(scored)
    }
}

/// TF-IDF-like keyword scorer in `[0, 1)`
pub struct KeywordScorer;

impl KeywordScorer {
    const STOPWORDS: &'static [&'static str] = &[
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
        "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "can",
        "to", "of", "in", "for", "on", "with", "at", "by", "from", "as", "into", "about", "and",
        "but", "if", "or", "so", "than", "too", "very", "just", "not", "no", "i", "me", "my",
        "we", "our", "you", "your", "he", "she", "it", "its", "they", "them", "their", "what",
        "which", "who", "whom", "this", "that", "these", "those", "how", "when", "where", "why",
    ];

    /// Per matched term: `sqrt(tf) * ln(1 + len) * position weight * length norm`,
    /// plus a bonus for query coverage, squashed to `[0, 1)`.
    pub fn score(query: &str, document: &str) -> f32 {
        let query_lower = query.to_lowercase();
        let doc_lower = document.to_lowercase();

        let query_terms: Vec<&str> = query_lower
            .unicode_words()
            .filter(|w| w.chars().count() > 1 && !Self::STOPWORDS.contains(w))
            .collect();
        if query_terms.is_empty() {
            return 0.0;
        }

        let doc_words: Vec<&str> = doc_lower.unicode_words().collect();
        let length_norm = 1.0 / (1.0 + (doc_words.len().max(1) as f32 / 50.0).sqrt());

        let mut total = 0.0f32;
        let mut matched = 0usize;
        for (pos, term) in query_terms.iter().enumerate() {
            let tf = doc_words.iter().filter(|w| *w == term).count() as f32;
            if tf == 0.0 {
                continue;
            }
            matched += 1;
            let idf_approx = (1.0 + term.chars().count() as f32).ln();
            let position_weight = 1.0 / (1.0 + pos as f32 * 0.1);
            total += tf.sqrt() * idf_approx * position_weight * length_norm;
        }

        let coverage_bonus = 0.3 * matched as f32 / query_terms.len() as f32;
        let raw = total + coverage_bonus;
        raw / (raw + 1.0)
    }
}
