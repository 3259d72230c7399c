//! Integration tests for the refinement workflow
//!
//! Roles and search are scripted stubs so every path through the state
//! machine can be driven deterministically.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use askdoc_agent::{
    Answerer, CancellationToken, ConversationMemory, Improver, Judge, MemoryConfig, QueryVerdict,
    RefinementWorkflow, ResponseJudgement, ResponseVerdict, Roles, SearchEngine, SessionManager,
    SessionState, Step, WorkflowConfig, WorkflowError,
};
use askdoc_core::{Error, Result};
use askdoc_rag::RagError;

#[derive(Default)]
struct ScriptedJudge {
    query_verdicts: Mutex<VecDeque<QueryVerdict>>,
    always_bad: bool,
    response_verdicts: Mutex<VecDeque<ResponseVerdict>>,
    always_retry: bool,
    fail: bool,
    judged_queries: Mutex<Vec<String>>,
    judged_answers: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn judge_query(&self, query: &str) -> Result<QueryVerdict> {
        if self.fail {
            return Err(Error::Llm("judge unavailable".to_string()));
        }
        self.judged_queries.lock().push(query.to_string());
        if self.always_bad {
            return Ok(QueryVerdict::Bad);
        }
        Ok(self.query_verdicts.lock().pop_front().unwrap_or(QueryVerdict::Good))
    }

    async fn judge_response(
        &self,
        _original_query: &str,
        intermediate: &[String],
        _latest: &str,
    ) -> Result<ResponseJudgement> {
        self.judged_answers.lock().push(intermediate.to_vec());
        let verdict = if self.always_retry {
            ResponseVerdict::Retry
        } else {
            self.response_verdicts
                .lock()
                .pop_front()
                .unwrap_or(ResponseVerdict::Correct)
        };
        Ok(ResponseJudgement {
            verdict,
            reasoning: String::new(),
        })
    }
}

struct ScriptedImprover {
    improved: &'static str,
    requeries: Mutex<Vec<(String, String, String)>>,
}

impl ScriptedImprover {
    fn new(improved: &'static str) -> Self {
        Self {
            improved,
            requeries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Improver for ScriptedImprover {
    async fn improve(&self, _query: &str) -> Result<String> {
        Ok(self.improved.to_string())
    }

    async fn requery(&self, original_query: &str, query: &str, answer: &str) -> Result<String> {
        let mut requeries = self.requeries.lock();
        requeries.push((original_query.to_string(), query.to_string(), answer.to_string()));
        Ok(format!("follow-up {}", requeries.len()))
    }
}

#[derive(Default)]
struct ScriptedAnswerer {
    answers: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl Answerer for ScriptedAnswerer {
    async fn build_context(&self, memory: &ConversationMemory, _query: &str) -> Result<String> {
        Ok(format!("context from {} turns", memory.len()))
    }

    async fn answer(
        &self,
        original_query: &str,
        query: &str,
        answer: &str,
        _memory: &ConversationMemory,
    ) -> Result<String> {
        self.answers
            .lock()
            .push((original_query.to_string(), query.to_string(), answer.to_string()));
        Ok(format!("Final: {} (asked: {})", answer, original_query))
    }
}

#[derive(Default)]
struct ScriptedSearch {
    queries: Mutex<Vec<String>>,
    delay: Option<Duration>,
    fail_retrieval: bool,
}

#[async_trait]
impl SearchEngine for ScriptedSearch {
    async fn search(&self, query: &str) -> std::result::Result<String, RagError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_retrieval {
            return Err(RagError::RetrievalFailure("no results".to_string()));
        }
        let mut queries = self.queries.lock();
        queries.push(query.to_string());
        Ok(format!("answer {}", queries.len()))
    }
}

struct Harness {
    judge: Arc<ScriptedJudge>,
    improver: Arc<ScriptedImprover>,
    answerer: Arc<ScriptedAnswerer>,
    search: Arc<ScriptedSearch>,
    workflow: RefinementWorkflow,
}

impl Harness {
    fn new(judge: ScriptedJudge, search: ScriptedSearch) -> Self {
        Self::with_config(judge, search, WorkflowConfig::default())
    }

    fn with_config(judge: ScriptedJudge, search: ScriptedSearch, config: WorkflowConfig) -> Self {
        let search = Arc::new(search);
        Self {
            judge: Arc::new(judge),
            improver: Arc::new(ScriptedImprover::new(
                "pump maintenance schedule and part specifications",
            )),
            answerer: Arc::new(ScriptedAnswerer::default()),
            workflow: RefinementWorkflow::new(search.clone(), config),
            search,
        }
    }

    fn session(&self) -> SessionState {
        let roles = Roles {
            judge: self.judge.clone(),
            improver: self.improver.clone(),
            answerer: self.answerer.clone(),
        };
        SessionState::new("test-session", roles, MemoryConfig::default())
    }
}

#[tokio::test]
async fn test_vague_query_is_improved_then_answered() {
    let judge = ScriptedJudge {
        query_verdicts: Mutex::new(VecDeque::from([QueryVerdict::Bad, QueryVerdict::Good])),
        ..Default::default()
    };
    let harness = Harness::new(judge, ScriptedSearch::default());
    let mut session = harness.session();

    let outcome = harness
        .workflow
        .run_turn(&mut session, "pump", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome.steps(),
        vec![
            Step::Init,
            Step::JudgeQuery,
            Step::ImproveQuery,
            Step::JudgeQuery,
            Step::AttachContext,
            Step::Search,
            Step::JudgeResponse,
            Step::Answer,
            Step::Terminal,
        ]
    );
    assert_eq!(outcome.improvements, 1);
    assert_eq!(outcome.searches, 1);
    assert_eq!(outcome.answer, "Final: answer 1 (asked: pump)");

    // empty memory: the improved query is searched unchanged
    assert_eq!(
        harness.search.queries.lock().as_slice(),
        ["pump maintenance schedule and part specifications".to_string()]
    );

    let answers = harness.answerer.answers.lock();
    assert_eq!(answers[0].0, "pump");
    assert_eq!(answers[0].2, "answer 1");

    let query = session.query.as_ref().unwrap();
    assert_eq!(query.original, "pump");
    assert_eq!(query.revision_count, 1);
    assert_eq!(session.memory.len(), 1);
    assert_eq!(session.turns_completed, 1);
}

#[tokio::test]
async fn test_always_bad_judge_terminates() {
    let judge = ScriptedJudge {
        always_bad: true,
        ..Default::default()
    };
    let harness = Harness::new(judge, ScriptedSearch::default());
    let mut session = harness.session();

    let outcome = harness
        .workflow
        .run_turn(&mut session, "pump", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.improvements, 1);
    assert_eq!(harness.judge.judged_queries.lock().len(), 2);
    assert_eq!(
        outcome.steps().iter().filter(|s| **s == Step::ImproveQuery).count(),
        1
    );
}

#[tokio::test]
async fn test_repeated_query_skips_judge() {
    let judge = ScriptedJudge {
        always_bad: true,
        ..Default::default()
    };
    let mut harness = Harness::new(judge, ScriptedSearch::default());
    harness.improver = Arc::new(ScriptedImprover::new("pump"));
    let mut session = harness.session();

    let outcome = harness
        .workflow
        .run_turn(&mut session, "pump", &CancellationToken::new())
        .await
        .unwrap();

    // the improved text was judged already and no improvements remain
    assert_eq!(harness.judge.judged_queries.lock().as_slice(), ["pump".to_string()]);
    assert_eq!(outcome.improvements, 1);
    assert_eq!(outcome.searches, 1);
}

#[tokio::test]
async fn test_retry_then_correct() {
    let judge = ScriptedJudge {
        response_verdicts: Mutex::new(VecDeque::from([ResponseVerdict::Retry, ResponseVerdict::Correct])),
        ..Default::default()
    };
    let harness = Harness::new(judge, ScriptedSearch::default());
    let mut session = harness.session();

    let outcome = harness
        .workflow
        .run_turn(&mut session, "pump seal and bearing intervals", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.retries, 1);
    assert_eq!(outcome.searches, 2);
    assert!(outcome.steps().contains(&Step::ReQuery));

    let requeries = harness.improver.requeries.lock();
    assert_eq!(requeries[0].0, "pump seal and bearing intervals");
    assert_eq!(requeries[0].2, "answer 1");

    // the second judgement sees both intermediate answers in order
    let judged = harness.judge.judged_answers.lock();
    assert_eq!(judged[1], vec!["answer 1".to_string(), "answer 2".to_string()]);

    // memory is non-empty by the second search, so context is attached
    let queries = harness.search.queries.lock();
    assert_eq!(queries[1], "context from 1 turns\n\nfollow-up 1");

    assert_eq!(outcome.answer, "Final: answer 2 (asked: pump seal and bearing intervals)");
}

#[tokio::test]
async fn test_failure_verdict_answers() {
    let judge = ScriptedJudge {
        response_verdicts: Mutex::new(VecDeque::from([ResponseVerdict::Failure])),
        ..Default::default()
    };
    let harness = Harness::new(judge, ScriptedSearch::default());
    let mut session = harness.session();

    let outcome = harness
        .workflow
        .run_turn(&mut session, "pump", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.retries, 0);
    assert_eq!(outcome.steps().last(), Some(&Step::Terminal));
}

#[tokio::test]
async fn test_max_retries_exceeded() {
    let judge = ScriptedJudge {
        always_retry: true,
        ..Default::default()
    };
    let harness = Harness::new(judge, ScriptedSearch::default());
    let mut session = harness.session();

    let err = harness
        .workflow
        .run_turn(&mut session, "pump", &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        WorkflowError::MaxRetriesExceeded {
            retries,
            last_answer,
        } => {
            assert_eq!(retries, 2);
            assert_eq!(last_answer, "answer 3");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(harness.search.queries.lock().len(), 3);
}

#[tokio::test]
async fn test_capability_failure_names_step() {
    let judge = ScriptedJudge {
        fail: true,
        ..Default::default()
    };
    let harness = Harness::new(judge, ScriptedSearch::default());
    let mut session = harness.session();

    let err = harness
        .workflow
        .run_turn(&mut session, "pump", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.step(), Some(Step::JudgeQuery));
    assert!(matches!(err, WorkflowError::Capability { .. }));
    assert!(harness.search.queries.lock().is_empty());
}

#[tokio::test]
async fn test_retrieval_failure_surfaces() {
    let search = ScriptedSearch {
        fail_retrieval: true,
        ..Default::default()
    };
    let harness = Harness::new(ScriptedJudge::default(), search);
    let mut session = harness.session();

    let err = harness
        .workflow
        .run_turn(&mut session, "pump", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::RetrievalFailure(_)));
    assert!(session.memory.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_turn_timeout() {
    let search = ScriptedSearch {
        delay: Some(Duration::from_secs(600)),
        ..Default::default()
    };
    let config = WorkflowConfig {
        timeout_secs: 5,
        ..Default::default()
    };
    let harness = Harness::with_config(ScriptedJudge::default(), search, config);
    let mut session = harness.session();

    let err = harness
        .workflow
        .run_turn(&mut session, "pump", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Timeout(d) if d == Duration::from_secs(5)));
    assert_eq!(session.turns_completed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_external_cancellation() {
    let search = ScriptedSearch {
        delay: Some(Duration::from_secs(60)),
        ..Default::default()
    };
    let harness = Harness::new(ScriptedJudge::default(), search);
    let mut session = harness.session();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let err = harness
        .workflow
        .run_turn(&mut session, "pump", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Cancelled));
    assert!(harness.search.queries.lock().is_empty());
}

#[tokio::test]
async fn test_empty_query_rejected() {
    let harness = Harness::new(ScriptedJudge::default(), ScriptedSearch::default());
    let mut session = harness.session();
    let err = harness
        .workflow
        .run_turn(&mut session, "   ", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::EmptyQuery));
}

#[tokio::test]
async fn test_second_turn_attaches_context() {
    let harness = Harness::new(ScriptedJudge::default(), ScriptedSearch::default());
    let mut session = harness.session();
    let cancel = CancellationToken::new();

    harness.workflow.run_turn(&mut session, "pump seals", &cancel).await.unwrap();
    harness.workflow.run_turn(&mut session, "and bearings?", &cancel).await.unwrap();

    let queries = harness.search.queries.lock();
    assert_eq!(queries[0], "pump seals");
    assert_eq!(queries[1], "context from 1 turns\n\nand bearings?");
    assert_eq!(session.memory.len(), 2);
    assert_eq!(session.turns_completed, 2);
    assert_eq!(session.query.as_ref().unwrap().original, "and bearings?");
}

#[tokio::test]
async fn test_session_manager_isolates_sessions() {
    let search = Arc::new(ScriptedSearch::default());
    let workflow = Arc::new(RefinementWorkflow::new(search.clone(), WorkflowConfig::default()));
    let manager = SessionManager::new(workflow, MemoryConfig::default(), || Roles {
        judge: Arc::new(ScriptedJudge::default()),
        improver: Arc::new(ScriptedImprover::new("unused")),
        answerer: Arc::new(ScriptedAnswerer::default()),
    });
    let cancel = CancellationToken::new();

    let first = manager.create_session();
    let (a, b) = tokio::join!(
        manager.run_turn(&first, "pump seals", &cancel),
        manager.run_turn("second", "expense reports", &cancel),
    );
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(manager.len(), 2);

    assert_eq!(manager.history(&first).await.unwrap().len(), 1);
    assert_eq!(manager.history("second").await.unwrap()[0].query, "expense reports");
    assert!(manager.history("missing").await.is_none());

    assert!(manager.remove("second"));
    assert!(!manager.contains("second"));
    assert_eq!(manager.len(), 1);
}

#[tokio::test]
async fn test_session_manager_serializes_turns() {
    let search = Arc::new(ScriptedSearch {
        delay: Some(Duration::from_millis(20)),
        ..Default::default()
    });
    let workflow = Arc::new(RefinementWorkflow::new(search.clone(), WorkflowConfig::default()));
    let manager = SessionManager::new(workflow, MemoryConfig::default(), || Roles {
        judge: Arc::new(ScriptedJudge::default()),
        improver: Arc::new(ScriptedImprover::new("unused")),
        answerer: Arc::new(ScriptedAnswerer::default()),
    });
    let cancel = CancellationToken::new();

    let (a, b) = tokio::join!(
        manager.run_turn("shared", "first question", &cancel),
        manager.run_turn("shared", "second question", &cancel),
    );
    a.unwrap();
    b.unwrap();

    // the later turn saw the earlier one in memory
    let queries = search.queries.lock();
    assert_eq!(queries.len(), 2);
    assert!(queries[1].starts_with("context from 1 turns\n\n"));
    assert_eq!(manager.history("shared").await.unwrap().len(), 2);
}
