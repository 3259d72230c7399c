//! Conversation memory
//!
//! Ordered log of search exchanges for one conversation. Bounded by turn
//! count and by an estimated token budget; the oldest turns are evicted
//! first and the newest turn is always kept.

use std::collections::VecDeque;
use unicode_segmentation::UnicodeSegmentation;

use askdoc_core::{ConversationTurn, Message};

pub use askdoc_config::MemoryConfig;

#[derive(Debug, Clone)]
pub struct ConversationMemory {
    config: MemoryConfig,
    turns: VecDeque<ConversationTurn>,
    estimated_tokens: usize,
}

/// Same word-boundary heuristic the language model trait uses
fn estimate_tokens(turn: &ConversationTurn) -> usize {
    let words = turn.query.unicode_words().count() + turn.answer.unicode_words().count();
    (words * 4).div_ceil(3)
}

impl ConversationMemory {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            turns: VecDeque::new(),
            estimated_tokens: 0,
        }
    }

    /// Append a turn, evicting the oldest while over either bound
    pub fn push(&mut self, turn: ConversationTurn) {
        self.estimated_tokens += estimate_tokens(&turn);
        self.turns.push_back(turn);

        while self.turns.len() > 1
            && (self.turns.len() > self.config.max_turns
                || self.estimated_tokens > self.config.max_tokens)
        {
            if let Some(evicted) = self.turns.pop_front() {
                self.estimated_tokens -= estimate_tokens(&evicted);
                tracing::trace!(query = %evicted.query, "Evicted memory turn");
            }
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.back()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn estimated_tokens(&self) -> usize {
        self.estimated_tokens
    }

    /// `user:`/`assistant:` transcript of every turn, oldest first
    pub fn history_str(&self) -> String {
        self.turns
            .iter()
            .map(ConversationTurn::to_history_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Chat messages for use as model history
    pub fn as_messages(&self) -> Vec<Message> {
        self.turns
            .iter()
            .flat_map(|t| [Message::user(t.query.clone()), Message::assistant(t.answer.clone())])
            .collect()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.estimated_tokens = 0;
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}
