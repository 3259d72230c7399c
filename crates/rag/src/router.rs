//! Router query engine
//!
//! Selects one or more answering engines for a query, runs the selection
//! concurrently and combines the answers. A failing engine is recorded and
//! excluded; its siblings still run to completion.

use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use askdoc_core::LanguageModel;

use crate::engine::{EngineResponse, QueryEngine};
use crate::RagError;

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid number regex"));

const MULTI_SELECT_PROMPT: &str = "Some choices are given below. It is provided in a numbered list \
(1 to {num_choices}), where each item in the list corresponds to a summary.\n\
---------------------\n\
{choices}\n\
---------------------\n\
Using only the choices above and not prior knowledge, return the top choices \
(no more than {max_outputs}, but only select what is needed) that are most relevant \
to the question: '{query}'\n\n\
The output should be ONLY a JSON array of objects with the keys \"choice\" (the choice number) \
and \"reason\" (why it was chosen), for example:\n\
[{\"choice\": 1, \"reason\": \"<reason>\"}]\n";

const SUMMARIZE_PROMPT: &str = "Context information from multiple sources is below.\n\
---------------------\n\
{context}\n\
---------------------\n\
Given the information from multiple sources and not prior knowledge, answer the query. \
Account for every source in the answer.\n\
Query: {query}\n\
Answer: ";

const PICK_BEST_PROMPT: &str = "A user has provided a query and {count} different strategies have been \
used to try to answer the query. Your job is to decide which strategy best answered the query. \
The query was: {query}\n\n\
{responses}\n\n\
Please provide the number of the best response.\n\
Just provide the number, with no other text or preamble.";

/// Routing metadata for one engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// An answering engine plus the metadata a selector sees
#[derive(Clone)]
pub struct ToolDescriptor {
    pub metadata: ToolMetadata,
    pub engine: Arc<dyn QueryEngine>,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        engine: Arc<dyn QueryEngine>,
    ) -> Self {
        Self {
            metadata: ToolMetadata::new(name, description),
            engine,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleSelection {
    pub index: usize,
    pub reason: String,
}

/// Engines chosen for a query, in selection order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub selections: Vec<SingleSelection>,
}

impl SelectionResult {
    pub fn indices(&self) -> Vec<usize> {
        self.selections.iter().map(|s| s.index).collect()
    }

    pub fn reasons(&self) -> Vec<&str> {
        self.selections.iter().map(|s| s.reason.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }
}

/// Picks engines for a query
#[async_trait]
pub trait Selector: Send + Sync {
    async fn select(&self, choices: &[ToolMetadata], query: &str) -> Result<SelectionResult, RagError>;
}

/// Selects every engine
pub struct SelectAllSelector;

#[async_trait]
impl Selector for SelectAllSelector {
    async fn select(&self, choices: &[ToolMetadata], _query: &str) -> Result<SelectionResult, RagError> {
        Ok(SelectionResult {
            selections: (0..choices.len())
                .map(|index| SingleSelection {
                    index,
                    reason: "All".to_string(),
                })
                .collect(),
        })
    }
}

/// Lets the LLM choose a ranked subset of engines
pub struct LlmMultiSelector {
    llm: Arc<dyn LanguageModel>,
}

#[derive(Deserialize)]
struct Choice {
    choice: usize,
    #[serde(default)]
    reason: String,
}

impl LlmMultiSelector {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    fn build_prompt(&self, choices: &[ToolMetadata], query: &str) -> String {
        let listing = choices
            .iter()
            .enumerate()
            .map(|(i, c)| format!("({}) {}", i + 1, c.description))
            .collect::<Vec<_>>()
            .join("\n\n");
        MULTI_SELECT_PROMPT
            .replace("{num_choices}", &choices.len().to_string())
            .replace("{max_outputs}", &choices.len().to_string())
            .replace("{choices}", &listing)
            .replace("{query}", query)
    }
}

/// Parse the selector reply into 0-indexed selections
///
/// Expects a JSON array of `{choice, reason}` with 1-indexed choices; falls
/// back to any bare numbers in the text. Range checking is left to the router.
pub fn parse_selection(reply: &str) -> SelectionResult {
    let json = match (reply.find('['), reply.rfind(']')) {
        (Some(start), Some(end)) if start < end => {
            serde_json::from_str::<Vec<Choice>>(&reply[start..=end]).ok()
        }
        _ => None,
    };

    let selections = match json {
        Some(choices) => choices
            .into_iter()
            .filter(|c| c.choice > 0)
            .map(|c| SingleSelection {
                index: c.choice - 1,
                reason: c.reason,
            })
            .collect(),
        None => NUMBER
            .find_iter(reply)
            .filter_map(|m| m.as_str().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .map(|n| SingleSelection {
                index: n - 1,
                reason: String::new(),
            })
            .collect(),
    };
    SelectionResult { selections }
}

#[async_trait]
impl Selector for LlmMultiSelector {
    async fn select(&self, choices: &[ToolMetadata], query: &str) -> Result<SelectionResult, RagError> {
        let reply = self
            .llm
            .complete(&self.build_prompt(choices, query))
            .await
            .map_err(|e| RagError::Llm(format!("Engine selection failed: {}", e)))?;

        Ok(parse_selection(&reply))
    }
}

/// How multiple engine answers become one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineStrategy {
    /// Tree summarization over all answers, `fan_in` answers per prompt
    Summarize { fan_in: usize },
    /// The LLM names the best answer; unparseable replies pick the first
    PickBest,
}

impl Default for CombineStrategy {
    fn default() -> Self {
        CombineStrategy::Summarize { fan_in: 4 }
    }
}

/// A selected engine that failed
#[derive(Debug, Clone, Serialize)]
pub struct EngineFailure {
    pub index: usize,
    pub name: String,
    pub error: String,
}

/// Combined router output
#[derive(Debug, Clone, Serialize)]
pub struct RouterResponse {
    pub text: String,
    pub selection: SelectionResult,
    /// Successful engine responses with their tool index
    pub responses: Vec<(usize, EngineResponse)>,
    pub failures: Vec<EngineFailure>,
}

impl RouterResponse {
    /// Flatten into an engine response carrying the selection as metadata
    pub fn into_engine_response(self) -> EngineResponse {
        let sources = self
            .responses
            .iter()
            .flat_map(|(_, r)| r.sources.iter().cloned())
            .collect();
        let mut response = EngineResponse::new(self.text).with_sources(sources);
        if let Ok(selection) = serde_json::to_value(&self.selection) {
            response = response.with_metadata("selector_result", selection);
        }
        if !self.failures.is_empty() {
            if let Ok(failures) = serde_json::to_value(&self.failures) {
                response = response.with_metadata("engine_failures", failures);
            }
        }
        response
    }
}

/// Routes a query across a fixed set of engines
pub struct RouterQueryEngine {
    tools: Vec<ToolDescriptor>,
    metadata: Vec<ToolMetadata>,
    selector: Arc<dyn Selector>,
    llm: Arc<dyn LanguageModel>,
    combine: CombineStrategy,
}

impl RouterQueryEngine {
    pub fn new(
        tools: Vec<ToolDescriptor>,
        selector: Arc<dyn Selector>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        let metadata = tools.iter().map(|t| t.metadata.clone()).collect();
        Self {
            tools,
            metadata,
            selector,
            llm,
            combine: CombineStrategy::default(),
        }
    }

    pub fn with_combine_strategy(mut self, combine: CombineStrategy) -> Self {
        self.combine = combine;
        self
    }

    pub fn tools(&self) -> &[ToolMetadata] {
        &self.metadata
    }

    /// Keep in-range indices, first occurrence only
    fn validate_selection(&self, selection: SelectionResult) -> Result<SelectionResult, RagError> {
        let mut seen = HashSet::new();
        let raw = selection.selections.len();
        let selections: Vec<SingleSelection> = selection
            .selections
            .into_iter()
            .filter(|s| s.index < self.tools.len() && seen.insert(s.index))
            .collect();

        if selections.is_empty() {
            return Err(RagError::Selection(format!(
                "no valid engine among {} selections for {} tools",
                raw,
                self.tools.len()
            )));
        }
        Ok(SelectionResult { selections })
    }

    pub async fn route(&self, query: &str) -> Result<RouterResponse, RagError> {
        let selection = self.selector.select(&self.metadata, query).await?;
        let selection = self.validate_selection(selection)?;

        for s in &selection.selections {
            tracing::info!("Selecting query engine {}: {}", s.index, s.reason);
        }

        let futures = selection.selections.iter().map(|s| {
            let engine = Arc::clone(&self.tools[s.index].engine);
            async move { (s.index, engine.query(query).await) }
        });
        let results = join_all(futures).await;

        let mut responses = Vec::new();
        let mut failures = Vec::new();
        let mut first_error = None;
        for (index, result) in results {
            match result {
                Ok(response) => responses.push((index, response)),
                Err(e) => {
                    let name = self.tools[index].metadata.name.clone();
                    tracing::warn!(engine = %name, error = %e, "Query engine failed");
                    failures.push(EngineFailure {
                        index,
                        name,
                        error: e.to_string(),
                    });
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if responses.is_empty() {
            return Err(first_error.unwrap_or_else(|| {
                RagError::Selection("no engine produced a response".to_string())
            }));
        }

        let text = if responses.len() == 1 {
            responses[0].1.text.clone()
        } else {
            let texts: Vec<&str> = responses.iter().map(|(_, r)| r.text.as_str()).collect();
            self.combine_texts(query, &texts).await?
        };

        Ok(RouterResponse {
            text,
            selection,
            responses,
            failures,
        })
    }

    async fn combine_texts(&self, query: &str, texts: &[&str]) -> Result<String, RagError> {
        match self.combine {
            CombineStrategy::Summarize { fan_in } => self.tree_summarize(query, texts, fan_in).await,
            CombineStrategy::PickBest => self.pick_best(query, texts).await,
        }
    }

    async fn summarize_group(&self, query: &str, group: &[String]) -> Result<String, RagError> {
        let context = group
            .iter()
            .enumerate()
            .map(|(i, text)| format!("Source {}:\n{}", i + 1, text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = SUMMARIZE_PROMPT
            .replace("{context}", &context)
            .replace("{query}", query);
        self.llm
            .complete(&prompt)
            .await
            .map_err(|e| RagError::Llm(format!("Response combination failed: {}", e)))
    }

    /// Summarize groups concurrently until one answer remains
    async fn tree_summarize(&self, query: &str, texts: &[&str], fan_in: usize) -> Result<String, RagError> {
        let fan_in = fan_in.max(2);
        let mut level: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        loop {
            let summaries = join_all(
                level
                    .chunks(fan_in)
                    .map(|group| self.summarize_group(query, group)),
            )
            .await;
            level = summaries.into_iter().collect::<Result<Vec<_>, _>>()?;
            if level.len() <= 1 {
                return Ok(level.pop().unwrap_or_default());
            }
        }
    }

    async fn pick_best(&self, query: &str, texts: &[&str]) -> Result<String, RagError> {
        let listing = texts
            .iter()
            .enumerate()
            .map(|(i, t)| format!("Response {}: {}", i, t))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = PICK_BEST_PROMPT
            .replace("{count}", &texts.len().to_string())
            .replace("{query}", query)
            .replace("{responses}", &listing);
        let reply = self
            .llm
            .complete(&prompt)
            .await
            .map_err(|e| RagError::Llm(format!("Best response selection failed: {}", e)))?;

        let choice = reply.trim().parse::<usize>().ok().filter(|i| *i < texts.len());
        if choice.is_none() {
            tracing::debug!(reply = %reply, "Unparseable best response choice, using the first");
        }
        Ok(texts[choice.unwrap_or(0)].to_string())
    }
}

#[async_trait]
impl QueryEngine for RouterQueryEngine {
    async fn query(&self, query: &str) -> Result<EngineResponse, RagError> {
        Ok(self.route(query).await?.into_engine_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use askdoc_core::{GenerateRequest, GenerateResponse};
    use parking_lot::Mutex;

    struct StaticEngine(Result<&'static str, &'static str>);

    #[async_trait]
    impl QueryEngine for StaticEngine {
        async fn query(&self, _query: &str) -> Result<EngineResponse, RagError> {
            match self.0 {
                Ok(text) => Ok(EngineResponse::new(text)),
                Err(msg) => Err(RagError::Search(msg.to_string())),
            }
        }
    }

    struct EchoLlm {
        reply: Option<&'static str>,
        prompts: Mutex<Vec<String>>,
    }

    impl EchoLlm {
        fn new(reply: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for EchoLlm {
        async fn generate(&self, request: GenerateRequest) -> askdoc_core::Result<GenerateResponse> {
            let prompt = request.messages[0].content.clone();
            self.prompts.lock().push(prompt.clone());
            Ok(GenerateResponse::text(
                self.reply.map(str::to_string).unwrap_or(prompt),
            ))
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    fn tool(name: &str, result: Result<&'static str, &'static str>) -> ToolDescriptor {
        ToolDescriptor::new(name, format!("{} engine", name), Arc::new(StaticEngine(result)))
    }

    #[tokio::test]
    async fn test_failing_engine_is_isolated() {
        let llm = EchoLlm::new(None);
        let router = RouterQueryEngine::new(
            vec![
                tool("one", Ok("answer one")),
                tool("two", Err("engine two exploded")),
                tool("three", Ok("answer three")),
            ],
            Arc::new(SelectAllSelector),
            llm.clone(),
        );

        let response = router.route("pump").await.unwrap();
        assert_eq!(response.responses.len(), 2);
        assert_eq!(response.failures.len(), 1);
        assert_eq!(response.failures[0].index, 1);
        assert!(response.text.contains("answer one"));
        assert!(response.text.contains("answer three"));
        assert!(!response.text.contains("exploded"));
        assert_eq!(response.selection.indices(), vec![0, 1, 2]);
        assert_eq!(response.selection.reasons(), vec!["All", "All", "All"]);
    }

    #[tokio::test]
    async fn test_single_response_is_verbatim() {
        let llm = EchoLlm::new(Some("should not be called"));
        let router = RouterQueryEngine::new(
            vec![tool("one", Ok("only answer")), tool("two", Err("down"))],
            Arc::new(SelectAllSelector),
            llm.clone(),
        );

        let response = router.route("pump").await.unwrap();
        assert_eq!(response.text, "only answer");
        assert!(llm.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_all_failed_returns_first_error() {
        let router = RouterQueryEngine::new(
            vec![tool("one", Err("first")), tool("two", Err("second"))],
            Arc::new(SelectAllSelector),
            EchoLlm::new(None),
        );

        let err = router.route("pump").await.unwrap_err();
        assert!(matches!(err, RagError::Search(ref msg) if msg == "first"));
    }

    #[tokio::test]
    async fn test_invalid_selection_is_error() {
        let selector = LlmMultiSelector::new(EchoLlm::new(Some(r#"[{"choice": 7, "reason": "x"}]"#)));
        let router = RouterQueryEngine::new(
            vec![tool("one", Ok("a"))],
            Arc::new(selector),
            EchoLlm::new(None),
        );
        assert!(matches!(router.route("pump").await, Err(RagError::Selection(_))));

        let empty = RouterQueryEngine::new(Vec::new(), Arc::new(SelectAllSelector), EchoLlm::new(None));
        assert!(matches!(empty.route("pump").await, Err(RagError::Selection(_))));
    }

    #[tokio::test]
    async fn test_llm_selector_subset() {
        let selector = LlmMultiSelector::new(EchoLlm::new(Some(
            r#"Sure: [{"choice": 2, "reason": "complex question"}]"#,
        )));
        let router = RouterQueryEngine::new(
            vec![tool("simple", Ok("simple")), tool("sub", Ok("decomposed"))],
            Arc::new(selector),
            EchoLlm::new(None),
        );

        let response = router.route("compare pumps").await.unwrap();
        assert_eq!(response.text, "decomposed");
        assert_eq!(response.selection.indices(), vec![1]);
        assert_eq!(response.selection.reasons(), vec!["complex question"]);
    }

    #[test]
    fn test_parse_selection_fallback() {
        let result = parse_selection("I would pick 2 and 1");
        assert_eq!(result.indices(), vec![1, 0]);
        assert!(parse_selection("none of them").is_empty());
    }

    #[tokio::test]
    async fn test_pick_best() {
        let router = RouterQueryEngine::new(
            vec![tool("one", Ok("first")), tool("two", Ok("second"))],
            Arc::new(SelectAllSelector),
            EchoLlm::new(Some("1")),
        )
        .with_combine_strategy(CombineStrategy::PickBest);
        assert_eq!(router.route("q").await.unwrap().text, "second");

        let fallback = RouterQueryEngine::new(
            vec![tool("one", Ok("first")), tool("two", Ok("second"))],
            Arc::new(SelectAllSelector),
            EchoLlm::new(Some("the second one")),
        )
        .with_combine_strategy(CombineStrategy::PickBest);
        assert_eq!(fallback.route("q").await.unwrap().text, "first");
    }

    #[tokio::test]
    async fn test_tree_summarize_levels() {
        let llm = EchoLlm::new(Some("merged"));
        let tools = (0..5).map(|i| tool(&format!("t{}", i), Ok("part"))).collect();
        let router = RouterQueryEngine::new(tools, Arc::new(SelectAllSelector), llm.clone())
            .with_combine_strategy(CombineStrategy::Summarize { fan_in: 2 });

        let response = router.route("q").await.unwrap();
        assert_eq!(response.text, "merged");
        // 5 -> 3 -> 2 -> 1
        assert_eq!(llm.prompts.lock().len(), 6);
    }

    #[tokio::test]
    async fn test_selection_metadata_attached() {
        let router = RouterQueryEngine::new(
            vec![tool("one", Ok("a")), tool("two", Ok("b"))],
            Arc::new(SelectAllSelector),
            EchoLlm::new(Some("ab")),
        );
        let response = router.query("q").await.unwrap();
        assert_eq!(
            response.metadata["selector_result"]["selections"][1]["index"],
            serde_json::json!(1)
        );
    }

    struct SlowEngine {
        answer: &'static str,
        delay: std::time::Duration,
    }

    #[async_trait]
    impl QueryEngine for SlowEngine {
        async fn query(&self, _query: &str) -> Result<EngineResponse, RagError> {
            tokio::time::sleep(self.delay).await;
            Ok(EngineResponse::new(self.answer))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_selected_engines_run_concurrently() {
        let delay = std::time::Duration::from_secs(10);
        let tools = ["one", "two", "three"]
            .into_iter()
            .map(|name| {
                ToolDescriptor::new(
                    name,
                    format!("{} engine", name),
                    Arc::new(SlowEngine { answer: name, delay }),
                )
            })
            .collect();
        let router = RouterQueryEngine::new(tools, Arc::new(SelectAllSelector), EchoLlm::new(Some("combined")));

        let started = tokio::time::Instant::now();
        let response = router.route("pump").await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(response.responses.len(), 3);
        assert_eq!(response.text, "combined");
        assert!(elapsed < std::time::Duration::from_secs(15), "took {:?}", elapsed);
    }
}
