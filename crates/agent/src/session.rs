//! Per-conversation state
//!
//! A `SessionState` is owned by exactly one conversation and mutated only by
//! that conversation's workflow run; it is never shared across sessions.

use std::collections::HashSet;

use crate::memory::{ConversationMemory, MemoryConfig};
use crate::traits::Roles;

/// The query being refined within one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// The user's text; fixed for the whole turn
    pub original: String,
    /// What the next step operates on
    pub current: String,
    /// Improvements applied this turn
    pub revision_count: u32,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            original: text.clone(),
            current: text,
            revision_count: 0,
        }
    }

    /// Replace the working query with an improved one
    pub fn revise(&mut self, text: impl Into<String>) {
        self.current = text.into();
        self.revision_count += 1;
    }

    /// Replace the working query after a re-query; not counted as a revision
    pub fn replace(&mut self, text: impl Into<String>) {
        self.current = text.into();
    }
}

/// Bookkeeping for the turn in flight
#[derive(Debug, Clone, Default)]
pub struct TurnState {
    /// Search query to answer, in first-seen order; a repeated query updates in place
    responses: Vec<(String, String)>,
    /// Query texts already sent to the judge
    judged: HashSet<String>,
    pub improvements: u32,
    pub retries: u32,
    pub searches: u32,
}

impl TurnState {
    pub fn record_response(&mut self, query: &str, answer: &str) {
        match self.responses.iter_mut().find(|(q, _)| q == query) {
            Some(entry) => entry.1 = answer.to_string(),
            None => self.responses.push((query.to_string(), answer.to_string())),
        }
        self.searches += 1;
    }

    pub fn answers(&self) -> Vec<String> {
        self.responses.iter().map(|(_, a)| a.clone()).collect()
    }

    pub fn was_judged(&self, query: &str) -> bool {
        self.judged.contains(query)
    }

    pub fn mark_judged(&mut self, query: &str) {
        self.judged.insert(query.to_string());
    }
}

/// Everything one conversation owns
pub struct SessionState {
    pub id: String,
    pub roles: Roles,
    pub memory: ConversationMemory,
    /// Query of the current or most recent turn
    pub query: Option<Query>,
    pub turn: TurnState,
    pub turns_completed: u64,
}

impl SessionState {
    pub fn new(id: impl Into<String>, roles: Roles, memory: MemoryConfig) -> Self {
        Self {
            id: id.into(),
            roles,
            memory: ConversationMemory::new(memory),
            query: None,
            turn: TurnState::default(),
            turns_completed: 0,
        }
    }

    /// Reset per-turn state for a new user query
    pub fn begin_turn(&mut self, text: &str) {
        self.query = Some(Query::new(text));
        self.turn = TurnState::default();
    }

    pub fn original_query(&self) -> &str {
        self.query.as_ref().map(|q| q.original.as_str()).unwrap_or("")
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("id", &self.id)
            .field("memory_turns", &self.memory.len())
            .field("query", &self.query)
            .field("turns_completed", &self.turns_completed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_revisions() {
        let mut query = Query::new("pump");
        query.revise("pump maintenance schedule");
        query.replace("pump bearing interval");
        assert_eq!(query.original, "pump");
        assert_eq!(query.current, "pump bearing interval");
        assert_eq!(query.revision_count, 1);
    }

    #[test]
    fn test_responses_keep_first_seen_order() {
        let mut turn = TurnState::default();
        turn.record_response("a", "1");
        turn.record_response("b", "2");
        turn.record_response("a", "3");

        assert_eq!(turn.answers(), vec!["3", "2"]);
        assert_eq!(turn.searches, 3);
    }
}
