//! Core conversation types and identifiers.

pub mod config;
pub mod conversation;
pub mod errors;
pub mod ids;
pub mod message;
pub mod params;

pub use config::{ApiConfig, ChatConfig, ServerConfig, StorageConfig};
pub use conversation::Conversation;
pub use errors::{ConversationError, ConversationResult};
pub use ids::{ConversationId, IdError, MessageId, ModelId};
pub use message::{Message, Role};
pub use params::{GenerationParams, ModelCatalog, ParameterPatch};
