//! Conversation turn type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One search exchange: the query sent to the engines and the answer they produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub query: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(query: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            answer: answer.into(),
            timestamp: Utc::now(),
        }
    }

    /// Render as a `user:`/`assistant:` transcript fragment
    pub fn to_history_str(&self) -> String {
        format!("user: {}\nassistant: {}", self.query, self.answer)
    }
}
