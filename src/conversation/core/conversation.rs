//! Conversation metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::core::ids::ConversationId;
use crate::conversation::core::message::now_millis;
use crate::conversation::core::params::GenerationParams;

/// A titled, parameterized thread of messages.
///
/// The messages themselves are loaded separately through the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique identifier.
    pub id: ConversationId,
    /// Display title; equals the identifier until renamed.
    pub title: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the latest append (or creation).
    pub updated_at: DateTime<Utc>,
    /// Generation parameter snapshot.
    pub params: GenerationParams,
    /// Number of stored messages.
    pub message_count: u32,
}

impl Conversation {
    /// Fresh conversation with a new id and a copy of `defaults`.
    #[must_use]
    pub fn new(defaults: &GenerationParams) -> Self {
        let id = ConversationId::new();
        let now = now_millis();
        Self {
            id,
            title: id.to_string(),
            created_at: now,
            updated_at: now,
            params: defaults.clone(),
            message_count: 0,
        }
    }
}

/// Title to store for a rename request; blank titles fall back to the id.
#[must_use]
pub fn normalize_title(id: ConversationId, title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        id.to_string()
    } else {
        trimmed.to_string()
    }
}
