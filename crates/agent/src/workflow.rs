//! Query refinement workflow
//!
//! One user turn runs as an explicit state machine:
//!
//! ```text
//! Init -> JudgeQuery -> ImproveQuery -> JudgeQuery            (at most max_query_improvements)
//!                    -> AttachContext -> Search -> JudgeResponse -> Answer -> Terminal
//!                                                              -> ReQuery -> JudgeQuery  (at most max_retries)
//! ```
//!
//! `transition` is pure: it maps a state and the outcome of running that
//! state's step to the next state plus the effects to apply to the session.
//! `RefinementWorkflow` is the driver that performs steps against the role
//! capabilities, applies effects and enforces the turn deadline.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use askdoc_config::WorkflowConfig;
use askdoc_core::ConversationTurn;

use crate::session::SessionState;
use crate::traits::{QueryVerdict, ResponseVerdict, Roles, SearchEngine};
use crate::WorkflowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Step {
    Init,
    JudgeQuery,
    ImproveQuery,
    AttachContext,
    Search,
    JudgeResponse,
    ReQuery,
    Answer,
    Terminal,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Step::Init => "init",
            Step::JudgeQuery => "judge_query",
            Step::ImproveQuery => "improve_query",
            Step::AttachContext => "attach_context",
            Step::Search => "search",
            Step::JudgeResponse => "judge_response",
            Step::ReQuery => "re_query",
            Step::Answer => "answer",
            Step::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// Workflow state with the data the next step needs
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowState {
    Init { query: String },
    JudgeQuery { query: String },
    ImproveQuery { query: String },
    AttachContext { query: String },
    Search { query: String },
    JudgeResponse { query: String, answer: String },
    ReQuery { query: String, answer: String },
    Answer { query: String, answer: String },
    Terminal { answer: String },
}

impl WorkflowState {
    pub fn step(&self) -> Step {
        match self {
            WorkflowState::Init { .. } => Step::Init,
            WorkflowState::JudgeQuery { .. } => Step::JudgeQuery,
            WorkflowState::ImproveQuery { .. } => Step::ImproveQuery,
            WorkflowState::AttachContext { .. } => Step::AttachContext,
            WorkflowState::Search { .. } => Step::Search,
            WorkflowState::JudgeResponse { .. } => Step::JudgeResponse,
            WorkflowState::ReQuery { .. } => Step::ReQuery,
            WorkflowState::Answer { .. } => Step::Answer,
            WorkflowState::Terminal { .. } => Step::Terminal,
        }
    }
}

/// Result of performing one step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Started,
    QueryJudged(QueryVerdict),
    QueryImproved(String),
    /// Search string, context prepended when memory is non-empty
    ContextAttached(String),
    Searched(String),
    ResponseJudged(ResponseVerdict),
    Requeried(String),
    Answered(String),
}

/// Session mutation requested by a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Working query replaced by an improvement
    Improved(String),
    /// Append to the turn's answers and to conversation memory
    Searched { query: String, answer: String },
    /// Working query replaced by a re-query
    Requeried(String),
}

/// Loop counters for the turn in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub improvements: u32,
    pub max_improvements: u32,
    pub retries: u32,
    pub max_retries: u32,
}

impl Budget {
    pub fn can_improve(&self) -> bool {
        self.improvements < self.max_improvements
    }

    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }
}

/// Next state for `state` given the outcome of its step
///
/// A `bad` query with no improvements left proceeds to context attachment.
/// A `retry` verdict with no retries left ends the turn with
/// `MaxRetriesExceeded`.
pub fn transition(
    state: WorkflowState,
    outcome: StepOutcome,
    budget: Budget,
) -> Result<(WorkflowState, Vec<Effect>), WorkflowError> {
    use StepOutcome as O;
    use WorkflowState as S;

    let next = match (state, outcome) {
        (S::Init { query }, O::Started) => (S::JudgeQuery { query }, Vec::new()),

        (S::JudgeQuery { query }, O::QueryJudged(QueryVerdict::Bad)) if budget.can_improve() => {
            (S::ImproveQuery { query }, Vec::new())
        }
        (S::JudgeQuery { query }, O::QueryJudged(_)) => (S::AttachContext { query }, Vec::new()),

        (S::ImproveQuery { .. }, O::QueryImproved(improved)) => (
            S::JudgeQuery {
                query: improved.clone(),
            },
            vec![Effect::Improved(improved)],
        ),

        (S::AttachContext { .. }, O::ContextAttached(search)) => {
            (S::Search { query: search }, Vec::new())
        }

        (S::Search { query }, O::Searched(answer)) => (
            S::JudgeResponse {
                query: query.clone(),
                answer: answer.clone(),
            },
            vec![Effect::Searched { query, answer }],
        ),

        (S::JudgeResponse { query, answer }, O::ResponseJudged(ResponseVerdict::Retry)) => {
            if !budget.can_retry() {
                return Err(WorkflowError::MaxRetriesExceeded {
                    retries: budget.retries,
                    last_answer: answer,
                });
            }
            (S::ReQuery { query, answer }, Vec::new())
        }
        (S::JudgeResponse { query, answer }, O::ResponseJudged(_)) => {
            (S::Answer { query, answer }, Vec::new())
        }

        (S::ReQuery { .. }, O::Requeried(next)) => (
            S::JudgeQuery {
                query: next.clone(),
            },
            vec![Effect::Requeried(next)],
        ),

        (S::Answer { .. }, O::Answered(answer)) => (S::Terminal { answer }, Vec::new()),

        (state, outcome) => {
            return Err(WorkflowError::InvalidTransition {
                from: state.step(),
                outcome: format!("{:?}", outcome),
            })
        }
    };
    Ok(next)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: Step,
    pub to: Step,
}

/// Final answer plus the path the turn took
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub answer: String,
    pub transitions: Vec<Transition>,
    pub searches: u32,
    pub retries: u32,
    pub improvements: u32,
}

impl TurnOutcome {
    /// Steps visited in order, starting with `Init`
    pub fn steps(&self) -> Vec<Step> {
        let mut steps: Vec<Step> = self.transitions.first().map(|t| t.from).into_iter().collect();
        steps.extend(self.transitions.iter().map(|t| t.to));
        steps
    }
}

/// Drives turns through the state machine
pub struct RefinementWorkflow {
    engine: Arc<dyn SearchEngine>,
    config: WorkflowConfig,
}

impl RefinementWorkflow {
    pub fn new(engine: Arc<dyn SearchEngine>, config: WorkflowConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Run one user turn to its final answer
    ///
    /// The whole turn is bounded by the configured timeout; cancelling
    /// `cancel` or hitting the deadline drops every in-flight call.
    pub async fn run_turn(
        &self,
        session: &mut SessionState,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, WorkflowError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(WorkflowError::EmptyQuery);
        }

        let deadline = Duration::from_secs(self.config.timeout_secs);
        let span = tracing::info_span!(
            "turn",
            session_id = %session.id,
            turn = session.turns_completed + 1
        );

        let result = async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(WorkflowError::Cancelled),
                result = tokio::time::timeout(deadline, self.drive(session, query)) => {
                    result.unwrap_or(Err(WorkflowError::Timeout(deadline)))
                }
            }
        }
        .instrument(span.clone())
        .await;

        let _entered = span.enter();
        match &result {
            Ok(outcome) => tracing::info!(
                searches = outcome.searches,
                retries = outcome.retries,
                improvements = outcome.improvements,
                "Turn answered"
            ),
            Err(e) => tracing::warn!(error = %e, "Turn failed"),
        }
        result
    }

    async fn drive(&self, session: &mut SessionState, text: &str) -> Result<TurnOutcome, WorkflowError> {
        session.begin_turn(text);
        let roles = session.roles.clone();

        let mut state = WorkflowState::Init {
            query: text.to_string(),
        };
        let mut transitions = Vec::new();

        loop {
            if let WorkflowState::Terminal { answer } = state {
                session.turns_completed += 1;
                return Ok(TurnOutcome {
                    answer,
                    transitions,
                    searches: session.turn.searches,
                    retries: session.turn.retries,
                    improvements: session.turn.improvements,
                });
            }

            let from = state.step();
            let outcome = self.perform(&state, session, &roles).await?;
            let (next, effects) = transition(state, outcome, self.budget(session))?;
            for effect in effects {
                apply_effect(session, effect);
            }

            tracing::debug!(from = %from, to = %next.step(), "Transition");
            transitions.push(Transition {
                from,
                to: next.step(),
            });
            state = next;
        }
    }

    fn budget(&self, session: &SessionState) -> Budget {
        Budget {
            improvements: session.turn.improvements,
            max_improvements: self.config.max_query_improvements,
            retries: session.turn.retries,
            max_retries: self.config.max_retries,
        }
    }

    async fn perform(
        &self,
        state: &WorkflowState,
        session: &mut SessionState,
        roles: &Roles,
    ) -> Result<StepOutcome, WorkflowError> {
        let outcome = match state {
            WorkflowState::Init { .. } => StepOutcome::Started,

            WorkflowState::JudgeQuery { query } => {
                if session.turn.was_judged(query) && !self.budget(session).can_improve() {
                    tracing::debug!(query = %query, "Query already judged, skipping judge");
                    StepOutcome::QueryJudged(QueryVerdict::Repeated)
                } else {
                    session.turn.mark_judged(query);
                    let verdict = roles
                        .judge
                        .judge_query(query)
                        .await
                        .map_err(|e| WorkflowError::capability(Step::JudgeQuery, e))?;
                    tracing::info!(?verdict, "Judge query");
                    StepOutcome::QueryJudged(verdict)
                }
            }

            WorkflowState::ImproveQuery { query } => {
                let improved = roles
                    .improver
                    .improve(query)
                    .await
                    .map_err(|e| WorkflowError::capability(Step::ImproveQuery, e))?;
                let improved = improved.trim();
                if improved.is_empty() {
                    tracing::warn!("Improver returned nothing, keeping the query");
                    StepOutcome::QueryImproved(query.clone())
                } else {
                    tracing::info!(query = %improved, "Improve query");
                    StepOutcome::QueryImproved(improved.to_string())
                }
            }

            WorkflowState::AttachContext { query } => {
                if session.memory.is_empty() {
                    StepOutcome::ContextAttached(query.clone())
                } else {
                    let context = roles
                        .answerer
                        .build_context(&session.memory, query)
                        .await
                        .map_err(|e| WorkflowError::capability(Step::AttachContext, e))?;
                    tracing::debug!(context = %context, "Attach context");
                    StepOutcome::ContextAttached(format!("{}\n\n{}", context.trim(), query))
                }
            }

            WorkflowState::Search { query } => {
                let answer = self
                    .engine
                    .search(query)
                    .await
                    .map_err(WorkflowError::from_search)?;
                tracing::info!(answer = %answer, "Search");
                StepOutcome::Searched(answer)
            }

            WorkflowState::JudgeResponse { answer, .. } => {
                let judgement = roles
                    .judge
                    .judge_response(session.original_query(), &session.turn.answers(), answer)
                    .await
                    .map_err(|e| WorkflowError::capability(Step::JudgeResponse, e))?;
                tracing::info!(verdict = ?judgement.verdict, "Judge response");
                StepOutcome::ResponseJudged(judgement.verdict)
            }

            WorkflowState::ReQuery { query, answer } => {
                let next = roles
                    .improver
                    .requery(session.original_query(), query, answer)
                    .await
                    .map_err(|e| WorkflowError::capability(Step::ReQuery, e))?;
                let next = next.trim();
                tracing::info!(query = %next, "New query");
                StepOutcome::Requeried(if next.is_empty() { query.clone() } else { next.to_string() })
            }

            WorkflowState::Answer { query, answer } => {
                let text = roles
                    .answerer
                    .answer(session.original_query(), query, answer, &session.memory)
                    .await
                    .map_err(|e| WorkflowError::capability(Step::Answer, e))?;
                StepOutcome::Answered(text)
            }

            WorkflowState::Terminal { .. } => {
                return Err(WorkflowError::InvalidTransition {
                    from: Step::Terminal,
                    outcome: "perform".to_string(),
                })
            }
        };
        Ok(outcome)
    }
}

fn apply_effect(session: &mut SessionState, effect: Effect) {
    match effect {
        Effect::Improved(text) => {
            session.turn.improvements += 1;
            if let Some(query) = session.query.as_mut() {
                query.revise(text);
            }
        }
        Effect::Searched { query, answer } => {
            session.turn.record_response(&query, &answer);
            session.memory.push(ConversationTurn::new(query, answer));
        }
        Effect::Requeried(text) => {
            session.turn.retries += 1;
            if let Some(query) = session.query.as_mut() {
                query.replace(text);
            }
        }
    }
}
