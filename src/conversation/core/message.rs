//! Message model for conversation history.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::conversation::core::errors::{ConversationError, ConversationResult};
use crate::conversation::core::ids::MessageId;

/// Current time truncated to the millisecond precision used in storage.
#[must_use]
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Author of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// User input.
    User,
    /// Assistant response.
    Assistant,
    /// System instruction.
    System,
}

impl Role {
    /// Stable string form for storage and the completion wire format.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            _ => Err(value.to_string()),
        }
    }
}

/// A single immutable turn in a conversation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Identifier, unique within the conversation.
    pub id: MessageId,
    /// Author role.
    pub role: Role,
    /// Text content.
    pub text: String,
    /// Send timestamp; defines the ordering of the history.
    pub sent_at: DateTime<Utc>,
}

impl Message {
    /// Build a message from raw parts, validating required fields.
    ///
    /// # Errors
    /// Returns `InvalidMessage` if the identifier is empty or too long.
    pub fn new(
        id: &str,
        role: Role,
        text: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> ConversationResult<Self> {
        let id = MessageId::new(id)
            .map_err(|err| ConversationError::InvalidMessage(format!("message id: {err}")))?;
        Ok(Self {
            id,
            role,
            text: text.into(),
            sent_at: sent_at.trunc_subsecs(3),
        })
    }

    /// Build a locally-identified user message stamped now.
    ///
    /// # Errors
    /// Returns `InvalidMessage` if the text is blank.
    pub fn user(text: impl Into<String>) -> ConversationResult<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ConversationError::InvalidMessage(
                "user message text must not be empty".to_string(),
            ));
        }
        Ok(Self {
            id: MessageId::generate(),
            role: Role::User,
            text,
            sent_at: now_millis(),
        })
    }

    /// Build an assistant message stamped now, keeping the provider id when present.
    #[must_use]
    pub fn assistant(id: Option<MessageId>, text: impl Into<String>) -> Self {
        Self {
            id: id.unwrap_or_else(MessageId::generate),
            role: Role::Assistant,
            text: text.into(),
            sent_at: now_millis(),
        }
    }
}
