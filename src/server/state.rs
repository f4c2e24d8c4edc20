//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::completion::CredentialCheck;
use crate::conversation::{
    ChatConfig, ChatOrchestrator, ConversationStore, GenerationParams, ModelCatalog,
};

/// Shared application state.
pub struct AppState {
    /// Conversation storage.
    pub store: Arc<dyn ConversationStore>,
    /// Send flow over `store` and the completion backend.
    pub orchestrator: ChatOrchestrator,
    /// Models callers may select.
    pub catalog: ModelCatalog,
    /// Parameters for new conversations and parameter resets.
    pub defaults: GenerationParams,
    /// Gate applied to the configured API key before chatting.
    pub credentials: Arc<dyn CredentialCheck>,
    /// Configured API key.
    api_key: String,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        orchestrator: ChatOrchestrator,
        catalog: ModelCatalog,
        config: &ChatConfig,
        credentials: Arc<dyn CredentialCheck>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            orchestrator,
            catalog,
            defaults: config.defaults.clone(),
            credentials,
            api_key: config.api.api_key.clone(),
        })
    }

    /// True when the configured key passes the credential check.
    #[must_use]
    pub fn can_chat(&self) -> bool {
        self.credentials.is_valid(&self.api_key)
    }
}
