//! Durable conversation storage.

pub mod sqlite;

use std::future::Future;
use std::pin::Pin;

use crate::conversation::core::conversation::Conversation;
use crate::conversation::core::errors::ConversationResult;
use crate::conversation::core::ids::ConversationId;
use crate::conversation::core::message::Message;
use crate::conversation::core::params::{GenerationParams, ParameterPatch};

pub use sqlite::SqliteConversationStore;

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Owner of conversations and their ordered, append-only message history.
///
/// Every operation on an unknown conversation fails with `NotFound`.
pub trait ConversationStore: Send + Sync {
    /// Create a conversation whose parameters are a copy of `defaults`.
    ///
    /// The title defaults to the identifier; a given `title` is normalized as
    /// in [`rename`](Self::rename) and stored in the same insert.
    ///
    /// # Errors
    /// Returns `InvalidParameter` if `defaults` fails validation, or a storage error.
    fn create_conversation(
        &self,
        defaults: &GenerationParams,
        title: Option<&str>,
    ) -> StoreFuture<'_, ConversationResult<Conversation>>;

    /// Fetch one conversation.
    ///
    /// # Errors
    /// Returns `NotFound` or a storage error.
    fn get(&self, id: ConversationId) -> StoreFuture<'_, ConversationResult<Conversation>>;

    /// All conversations, most recently active first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list(&self) -> StoreFuture<'_, ConversationResult<Vec<Conversation>>>;

    /// Messages of a conversation in send order.
    ///
    /// # Errors
    /// Returns `NotFound` or a storage error.
    fn messages(&self, id: ConversationId) -> StoreFuture<'_, ConversationResult<Vec<Message>>>;

    /// Append `message` at the end of the history and bump `updated_at`.
    ///
    /// The stored timestamp is raised to the previous message's timestamp if
    /// it would otherwise go backwards; the returned message is what was stored.
    ///
    /// # Errors
    /// Returns `NotFound`, `DuplicateMessage`, or a storage error.
    fn append(
        &self,
        id: ConversationId,
        message: Message,
    ) -> StoreFuture<'_, ConversationResult<Message>>;

    /// Remove a conversation and all of its messages.
    ///
    /// # Errors
    /// Returns `NotFound` or a storage error.
    fn delete_conversation(&self, id: ConversationId) -> StoreFuture<'_, ConversationResult<()>>;

    /// Remove every message but keep the conversation and its parameters.
    ///
    /// # Errors
    /// Returns `NotFound` or a storage error.
    fn reset_history(&self, id: ConversationId) -> StoreFuture<'_, ConversationResult<()>>;

    /// Apply a partial parameter update after validating the merged result.
    ///
    /// # Errors
    /// Returns `NotFound`, `InvalidParameter`, or a storage error.
    fn update_parameters(
        &self,
        id: ConversationId,
        patch: ParameterPatch,
    ) -> StoreFuture<'_, ConversationResult<Conversation>>;

    /// Replace the parameter snapshot with `defaults`.
    ///
    /// # Errors
    /// Returns `NotFound`, `InvalidParameter`, or a storage error.
    fn reset_parameters(
        &self,
        id: ConversationId,
        defaults: &GenerationParams,
    ) -> StoreFuture<'_, ConversationResult<Conversation>>;

    /// Set the display title; a blank title reverts to the identifier.
    ///
    /// # Errors
    /// Returns `NotFound` or a storage error.
    fn rename(
        &self,
        id: ConversationId,
        title: &str,
    ) -> StoreFuture<'_, ConversationResult<Conversation>>;
}
