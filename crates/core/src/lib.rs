//! Core traits and types for askdoc
//!
//! This crate provides foundational types used across all other crates:
//! - Capability traits for pluggable backends (LLM, embedding, indexes)
//! - LLM request/response types
//! - Retrieval document type
//! - Conversation turn type
//! - Error types

pub mod conversation;
pub mod error;
pub mod llm_types;
pub mod traits;

pub use conversation::ConversationTurn;
pub use error::{Error, Result};
pub use llm_types::{FinishReason, GenerateRequest, GenerateResponse, Message, Role, TokenUsage};

pub use traits::{Document, Embedder, LanguageModel, LexicalIndex, VectorIndex};
