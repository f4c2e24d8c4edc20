//! Error types for the conversation subsystem.

use thiserror::Error;

use crate::completion::CompletionError;
use crate::conversation::core::ids::{ConversationId, MessageId};

/// Conversation subsystem error type.
#[derive(Debug, Error)]
pub enum ConversationError {
    /// Unknown conversation reference.
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),
    /// A message with this identifier already exists in the conversation.
    #[error("duplicate message {message_id} in conversation {conversation_id}")]
    DuplicateMessage {
        /// Conversation that rejected the append.
        conversation_id: ConversationId,
        /// Colliding message identifier.
        message_id: MessageId,
    },
    /// Generation parameter out of range or unknown model.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name as exposed to callers.
        name: &'static str,
        /// Human-readable reason.
        reason: String,
    },
    /// A message is missing a required field.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    /// The external completion call failed; no assistant message was recorded.
    #[error("completion failed: {0}")]
    CompletionFailed(#[from] CompletionError),
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// `SQLite` storage error.
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// A stored row could not be decoded.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl ConversationError {
    /// Shorthand for an `InvalidParameter` error.
    #[must_use]
    pub fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Convenience result alias for conversation operations.
pub type ConversationResult<T> = Result<T, ConversationError>;
