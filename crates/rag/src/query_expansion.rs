//! LLM query expansion
//!
//! Asks the model for alternative phrasings of a query so that retrieval
//! can run once per phrasing and fuse the results.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use askdoc_core::LanguageModel;

use crate::RagError;

/// Leading list markers such as `1.`, `2)`, `-`, `*`
static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+").expect("valid list marker regex"));

const QUERY_GEN_PROMPT: &str = "You are a helpful assistant that generates multiple search queries based on a \
single input query. Generate {num_queries} search queries, one on each line, \
related to the following input query:\n\
Query: {query}\n\
Queries:\n";

/// Generates alternative phrasings of a query
pub struct QueryGenerator {
    llm: Arc<dyn LanguageModel>,
}

impl QueryGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    fn build_prompt(&self, query: &str, count: usize) -> String {
        QUERY_GEN_PROMPT
            .replace("{num_queries}", &count.to_string())
            .replace("{query}", query)
    }

    /// Produce exactly `num_queries - 1` variants of `query`
    ///
    /// Returns an empty list when `num_queries <= 1`.
    pub async fn generate(&self, query: &str, num_queries: usize) -> Result<Vec<String>, RagError> {
        let wanted = num_queries.saturating_sub(1);
        if wanted == 0 {
            return Ok(Vec::new());
        }

        let prompt = self.build_prompt(query, wanted);
        let response = self
            .llm
            .complete(&prompt)
            .await
            .map_err(|e| RagError::Llm(format!("Query expansion failed: {}", e)))?;

        let variants = parse_generated_queries(&response, query, wanted);
        tracing::debug!(query, ?variants, "Generated query variants");
        Ok(variants)
    }
}

/// Parse one query per line, then truncate or pad to exactly `wanted`
///
/// Code fences and list markers are stripped and blank lines dropped.
/// Padding repeats the original query, so a short reply yields copies of it;
/// retrieving each copy would weight the original query once per copy in
/// rank fusion. `HybridRetriever` skips variants equal to the original.
pub fn parse_generated_queries(text: &str, original: &str, wanted: usize) -> Vec<String> {
    let mut queries: Vec<String> = text
        .trim_matches('`')
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("```"))
        .map(|line| LIST_MARKER.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .take(wanted)
        .collect();

    if queries.len() < wanted {
        tracing::debug!(
            parsed = queries.len(),
            wanted,
            "Padding query variants with the original query"
        );
        queries.resize(wanted, original.to_string());
    }

    queries
}
