//! Capability traits
//!
//! External collaborators (language models, embedders, indexes) are consumed
//! through these traits so that the retrieval and workflow crates stay
//! independent of any particular provider.

mod llm;
mod retriever;

pub use llm::LanguageModel;
pub use retriever::{Document, Embedder, LexicalIndex, VectorIndex};
