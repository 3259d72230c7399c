//! Conversational query refinement
//!
//! Features:
//! - Explicit state machine judging, improving and re-issuing queries
//! - Bounded improvement and re-query loops
//! - Per-turn deadline and external cancellation
//! - Bounded conversation memory feeding cross-turn context
//! - Session registry serializing turns per conversation

pub mod memory;
pub mod prompts;
pub mod registry;
pub mod session;
pub mod traits;
pub mod workflow;

pub use memory::{ConversationMemory, MemoryConfig};
pub use registry::SessionManager;
pub use session::{Query, SessionState, TurnState};
pub use traits::{
    Answerer, Improver, Judge, LlmAnswerer, LlmImprover, LlmJudge, QueryVerdict,
    ResponseJudgement, ResponseVerdict, Roles, SearchEngine,
};
pub use workflow::{
    transition, Budget, Effect, RefinementWorkflow, Step, StepOutcome, Transition, TurnOutcome,
    WorkflowState,
};

pub use askdoc_config::WorkflowConfig;
pub use tokio_util::sync::CancellationToken;

use askdoc_rag::RagError;
use std::time::Duration;
use thiserror::Error;

/// Turn-ending workflow errors
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// A judge, improver, answerer or search capability failed
    #[error("{step} step failed: {source}")]
    Capability {
        step: Step,
        #[source]
        source: askdoc_core::Error,
    },

    /// The router resolved no engine
    #[error("Selection error: {0}")]
    Selection(String),

    /// Every retriever for every query variant failed or came back empty
    #[error("Retrieval failed: {0}")]
    RetrievalFailure(String),

    #[error("Workflow timed out after {0:?}")]
    Timeout(Duration),

    #[error("Turn cancelled")]
    Cancelled,

    /// The response judge kept asking for retries
    #[error("Gave up after {retries} re-queries")]
    MaxRetriesExceeded { retries: u32, last_answer: String },

    #[error("Query is empty")]
    EmptyQuery,

    #[error("No transition from {from} on {outcome}")]
    InvalidTransition { from: Step, outcome: String },
}

impl WorkflowError {
    pub fn capability(step: Step, source: impl Into<askdoc_core::Error>) -> Self {
        WorkflowError::Capability {
            step,
            source: source.into(),
        }
    }

    /// Map a search failure onto the workflow taxonomy
    pub fn from_search(err: RagError) -> Self {
        match err {
            RagError::Selection(msg) => WorkflowError::Selection(msg),
            RagError::RetrievalFailure(msg) => WorkflowError::RetrievalFailure(msg),
            other => WorkflowError::capability(Step::Search, other),
        }
    }

    /// The step a capability failure happened in
    pub fn step(&self) -> Option<Step> {
        match self {
            WorkflowError::Capability { step, .. } => Some(*step),
            WorkflowError::Selection(_) | WorkflowError::RetrievalFailure(_) => Some(Step::Search),
            WorkflowError::InvalidTransition { from, .. } => Some(*from),
            _ => None,
        }
    }
}

impl From<WorkflowError> for askdoc_core::Error {
    fn from(err: WorkflowError) -> Self {
        askdoc_core::Error::Workflow(err.to_string())
    }
}
