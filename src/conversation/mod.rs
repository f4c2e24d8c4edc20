//! Conversation history: core types, durable storage, and the send flow.
//!
//! Layout:
//! - `core`: identifiers, messages, generation parameters, configuration, errors
//! - `store`: the [`ConversationStore`] trait and its `SQLite` implementation
//! - `orchestrator`: [`ChatOrchestrator`], which turns a user message into a stored exchange

pub mod core;
pub mod orchestrator;
pub mod store;

pub use self::core::{
    ChatConfig, Conversation, ConversationError, ConversationId, ConversationResult,
    GenerationParams, Message, MessageId, ModelCatalog, ModelId, ParameterPatch, Role,
};
pub use orchestrator::{ChatOrchestrator, SendState, build_payload};
pub use store::{ConversationStore, SqliteConversationStore};
