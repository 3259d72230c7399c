//! Router assembly from configuration

use std::sync::Arc;

use askdoc_config::RagConfig;
use askdoc_core::LanguageModel;

use crate::engine::{AnsweringStrategy, QueryEngine, RetrieverQueryEngine, SubQuestionQueryEngine};
use crate::index::DocumentIndex;
use crate::query_expansion::QueryGenerator;
use crate::reranker::build_reranker;
use crate::retriever::{HybridRetriever, HybridRetrieverConfig};
use crate::router::{RouterQueryEngine, SelectAllSelector, Selector, ToolDescriptor};

pub const SIMPLE_QUERY_TOOL: &str = "simple_query_tool";
pub const SUBQUESTION_QUERY_TOOL: &str = "subquestion_query_tool";

const SIMPLE_QUERY_DESCRIPTION: &str =
    "Tool for answering simple, single-concept factual questions using direct vector search.";
const SUBQUESTION_QUERY_DESCRIPTION: &str =
    "Tool for answering complex, multi-part questions by breaking them into sub-queries.";

/// Hybrid retriever over the index's dense and sparse sides
pub fn build_retriever(
    config: &RagConfig,
    llm: Arc<dyn LanguageModel>,
    index: &DocumentIndex,
) -> HybridRetriever {
    HybridRetriever::new(HybridRetrieverConfig::from(config))
        .with_retriever(Arc::new(index.dense_retriever()))
        .with_retriever(Arc::new(index.sparse_retriever()))
        .with_query_generator(QueryGenerator::new(llm))
}

/// Default router: a direct engine and a sub-question engine, both selected
pub fn build_router(
    config: &RagConfig,
    llm: Arc<dyn LanguageModel>,
    index: &DocumentIndex,
) -> RouterQueryEngine {
    build_router_with_selector(config, llm, index, Arc::new(SelectAllSelector))
}

pub fn build_router_with_selector(
    config: &RagConfig,
    llm: Arc<dyn LanguageModel>,
    index: &DocumentIndex,
    selector: Arc<dyn Selector>,
) -> RouterQueryEngine {
    let retriever = Arc::new(build_retriever(config, Arc::clone(&llm), index));
    let reranker = build_reranker(config.reranker, Arc::clone(&llm), config);

    let direct = || {
        RetrieverQueryEngine::new(
            Arc::clone(&retriever),
            Arc::clone(&reranker),
            Arc::clone(&llm),
        )
    };

    let simple: Arc<dyn QueryEngine> = Arc::new(AnsweringStrategy::Direct(direct()));
    let sub_question: Arc<dyn QueryEngine> = Arc::new(AnsweringStrategy::SubQuestion(
        SubQuestionQueryEngine::new(Arc::new(direct()), Arc::clone(&llm)),
    ));

    tracing::debug!(
        fusion = ?config.fusion_mode,
        reranker = ?config.reranker,
        num_queries = config.num_queries,
        "Built router query engine"
    );

    RouterQueryEngine::new(
        vec![
            ToolDescriptor::new(SIMPLE_QUERY_TOOL, SIMPLE_QUERY_DESCRIPTION, simple),
            ToolDescriptor::new(SUBQUESTION_QUERY_TOOL, SUBQUESTION_QUERY_DESCRIPTION, sub_question),
        ],
        selector,
        llm,
    )
}
