//! Send flow: persist the user turn, call the completion backend, record the reply.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::completion::{ChatTurn, CompletionBackend, CompletionError, CompletionRequest};
use crate::conversation::core::conversation::Conversation;
use crate::conversation::core::errors::{ConversationError, ConversationResult};
use crate::conversation::core::ids::{ConversationId, MessageId};
use crate::conversation::core::message::{Message, Role};
use crate::conversation::store::ConversationStore;

/// Progress of the latest send on a conversation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendState {
    /// No send has been started.
    Idle,
    /// The user message is stored and the completion is in flight.
    Sending,
    /// The assistant reply was appended.
    Completed,
    /// The completion or the reply append failed.
    Failed,
}

/// Build the outbound request from a conversation snapshot and its history.
///
/// A non-empty system prompt becomes the first turn; stored messages follow
/// oldest first. Parameters are copied verbatim.
#[must_use]
pub fn build_payload(conversation: &Conversation, messages: &[Message]) -> CompletionRequest {
    let params = &conversation.params;
    let system = (!params.system_prompt.is_empty())
        .then(|| ChatTurn::new(Role::System, params.system_prompt.as_str()));

    let messages = system
        .into_iter()
        .chain(
            messages
                .iter()
                .map(|message| ChatTurn::new(message.role, message.text.as_str())),
        )
        .collect();

    CompletionRequest {
        model: params.model.clone(),
        messages,
        temperature: params.temperature,
        top_p: params.top_p,
        frequency_penalty: params.frequency_penalty,
        presence_penalty: params.presence_penalty,
    }
}

/// Coordinates one user turn with the store and the completion backend.
#[derive(Clone)]
pub struct ChatOrchestrator {
    store: Arc<dyn ConversationStore>,
    backend: Arc<dyn CompletionBackend>,
    states: Arc<DashMap<ConversationId, SendState>>,
}

impl ChatOrchestrator {
    /// Create an orchestrator over a shared store and backend.
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>, backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            store,
            backend,
            states: Arc::new(DashMap::new()),
        }
    }

    /// State of the latest send on `id`.
    #[must_use]
    pub fn send_state(&self, id: ConversationId) -> SendState {
        self.states.get(&id).map_or(SendState::Idle, |state| *state)
    }

    /// Drop the tracked send state of `id`, e.g. after the conversation is deleted.
    pub fn forget(&self, id: ConversationId) {
        self.states.remove(&id);
    }

    /// Send `text` as a user turn and return the stored assistant reply.
    ///
    /// The user message is appended before any network activity and stays on
    /// failure. The exchange runs on its own task: dropping the returned future
    /// does not cancel it, and a late reply is still appended.
    ///
    /// # Errors
    /// Returns `NotFound` or `InvalidMessage` before anything is sent,
    /// `CompletionFailed` if the backend fails, or a storage error.
    pub async fn send_message(
        &self,
        id: ConversationId,
        text: &str,
    ) -> ConversationResult<Message> {
        let user = self.store.append(id, Message::user(text)?).await?;
        debug!("Stored user message {} in conversation {}", user.id, id);
        self.states.insert(id, SendState::Sending);

        let store = Arc::clone(&self.store);
        let backend = Arc::clone(&self.backend);
        let states = Arc::clone(&self.states);
        let task = tokio::spawn(async move {
            let result = exchange(store.as_ref(), backend.as_ref(), id).await;
            match &result {
                Ok(_) => {
                    states.insert(id, SendState::Completed);
                }
                Err(ConversationError::NotFound(_)) => {
                    warn!("Conversation {} disappeared during send", id);
                    states.remove(&id);
                }
                Err(err) => {
                    warn!("Send on conversation {} failed: {}", id, err);
                    states.insert(id, SendState::Failed);
                }
            }
            result
        });

        match task.await {
            Ok(result) => result,
            Err(err) => {
                self.states.insert(id, SendState::Failed);
                Err(CompletionError::Aborted(err.to_string()).into())
            }
        }
    }
}

async fn exchange(
    store: &dyn ConversationStore,
    backend: &dyn CompletionBackend,
    id: ConversationId,
) -> ConversationResult<Message> {
    let conversation = store.get(id).await?;
    let history = store.messages(id).await?;
    let request = build_payload(&conversation, &history);

    let reply = backend.complete(request).await?;

    let provider_id = reply.id.as_deref().and_then(|raw| MessageId::new(raw).ok());
    let has_provider_id = provider_id.is_some();
    let stored = match store
        .append(id, Message::assistant(provider_id, reply.text.as_str()))
        .await
    {
        Err(ConversationError::DuplicateMessage { message_id, .. }) if has_provider_id => {
            debug!(
                "Provider id {} already used in conversation {}, generating one",
                message_id, id
            );
            store.append(id, Message::assistant(None, reply.text)).await?
        }
        other => other?,
    };

    info!(
        "Recorded assistant message {} in conversation {}",
        stored.id, id
    );
    Ok(stored)
}
