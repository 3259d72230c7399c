//! Role-scoped chat sessions
//!
//! Each workflow role (judge, improver, answerer) talks to the model through
//! its own `ChatSession`, so the model sees that role's earlier exchanges in
//! the same conversation.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use askdoc_core::{LanguageModel, Message, Result};

/// Chat engine with bounded per-role history
pub struct ChatSession {
    llm: Arc<dyn LanguageModel>,
    history: Mutex<VecDeque<Message>>,
    max_messages: usize,
}

impl ChatSession {
    pub fn new(llm: Arc<dyn LanguageModel>, max_messages: usize) -> Self {
        Self {
            llm,
            history: Mutex::new(VecDeque::new()),
            max_messages,
        }
    }

    /// Send `prompt` after this session's history
    pub async fn chat(&self, prompt: &str) -> Result<String> {
        self.chat_with_context(&[], prompt).await
    }

    /// Send `prompt` after `context` and this session's history
    ///
    /// `context` is not recorded; only the prompt and reply are.
    pub async fn chat_with_context(&self, context: &[Message], prompt: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(context.len() + self.max_messages + 1);
        messages.extend_from_slice(context);
        messages.extend(self.history.lock().iter().cloned());
        messages.push(Message::user(prompt));

        let reply = self.llm.chat(&messages).await?;
        self.record(prompt, &reply);
        Ok(reply)
    }

    fn record(&self, prompt: &str, reply: &str) {
        let mut history = self.history.lock();
        history.push_back(Message::user(prompt));
        history.push_back(Message::assistant(reply));
        // whole exchanges only, so history never opens on a reply
        while history.len() > self.max_messages {
            history.pop_front();
            history.pop_front();
        }
    }

    pub fn history(&self) -> Vec<Message> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.history.lock().clear();
    }

}
