//! Session registry
//!
//! Maps session ids to their state. Turns of one session are serialized by
//! a per-session async mutex; distinct sessions run independently.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use askdoc_core::{ConversationTurn, LanguageModel};

use crate::memory::MemoryConfig;
use crate::session::SessionState;
use crate::traits::Roles;
use crate::workflow::{RefinementWorkflow, TurnOutcome};
use crate::WorkflowError;

type RoleFactory = dyn Fn() -> Roles + Send + Sync;

pub struct SessionManager {
    workflow: Arc<RefinementWorkflow>,
    roles: Arc<RoleFactory>,
    memory: MemoryConfig,
    sessions: DashMap<String, Arc<Mutex<SessionState>>>,
}

impl SessionManager {
    /// `roles` is called once per new session
    pub fn new(
        workflow: Arc<RefinementWorkflow>,
        memory: MemoryConfig,
        roles: impl Fn() -> Roles + Send + Sync + 'static,
    ) -> Self {
        Self {
            workflow,
            roles: Arc::new(roles),
            memory,
            sessions: DashMap::new(),
        }
    }

    /// Sessions with LLM-backed roles
    pub fn with_llm(
        workflow: Arc<RefinementWorkflow>,
        llm: Arc<dyn LanguageModel>,
        memory: MemoryConfig,
    ) -> Self {
        let role_memory = memory.clone();
        Self::new(workflow, memory, move || {
            Roles::from_llm(Arc::clone(&llm), &role_memory)
        })
    }

    /// Register a new session and return its id
    pub fn create_session(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.session(&id);
        id
    }

    fn session(&self, id: &str) -> Arc<Mutex<SessionState>> {
        let entry = self.sessions.entry(id.to_string()).or_insert_with(|| {
            tracing::debug!(session_id = id, "Creating session");
            Arc::new(Mutex::new(SessionState::new(id, (self.roles)(), self.memory.clone())))
        });
        Arc::clone(entry.value())
    }

    /// Run a turn on `session_id`, creating the session on first use
    ///
    /// A second turn for the same session waits for the first to finish.
    pub async fn run_turn(
        &self,
        session_id: &str,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, WorkflowError> {
        let session = self.session(session_id);
        let mut state = session.lock().await;
        self.workflow.run_turn(&mut state, query, cancel).await
    }

    /// Conversation memory of a session, oldest first
    pub async fn history(&self, session_id: &str) -> Option<Vec<ConversationTurn>> {
        let session = self.sessions.get(session_id).map(|s| Arc::clone(s.value()))?;
        let state = session.lock().await;
        Some(state.memory.turns().cloned().collect())
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
