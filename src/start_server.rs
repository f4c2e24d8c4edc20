//! Startup helpers for the chatkeeper server.

use std::process::ExitCode;
use std::sync::Arc;

use crate::completion::{CredentialCheck, OpenAiClient, OpenAiKeyPattern};
use crate::conversation::{
    ChatConfig, ChatOrchestrator, ConversationStore, ModelCatalog, SqliteConversationStore,
};
use crate::server::{self, AppState};

type StartupError = Box<dyn std::error::Error + Send + Sync>;

/// Run the server (used by the `chatkeeper-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting chatkeeper v{}", env!("CARGO_PKG_VERSION"));

    let config = match ChatConfig::from_env().and_then(|config| {
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };
    tracing::info!("Completion endpoint: {}", config.api.base_url);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let result = rt.block_on(async move {
        let state = initialize(&config).await?;
        server::serve(state, &config.server, shutdown_signal()).await
    });

    if let Err(e) = result {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Build application state from a validated configuration.
///
/// # Errors
/// Returns an error if the store cannot be opened or the HTTP client cannot be built.
pub async fn initialize(config: &ChatConfig) -> Result<Arc<AppState>, StartupError> {
    let client = OpenAiClient::new(&config.api)?;
    let catalog = refresh_catalog(&client, config).await;

    let store: Arc<dyn ConversationStore> =
        Arc::new(SqliteConversationStore::open(&config.storage, catalog.clone()).await?);
    let orchestrator = ChatOrchestrator::new(Arc::clone(&store), Arc::new(client));

    let credentials: Arc<dyn CredentialCheck> = if config.api.check_key_shape {
        Arc::new(OpenAiKeyPattern::new()?)
    } else {
        Arc::new(|key: &str| !key.trim().is_empty())
    };

    let state = AppState::new(store, orchestrator, catalog, config, credentials);
    if !state.can_chat() {
        tracing::warn!("API key rejected by the credential check; sending is disabled");
    }
    Ok(state)
}

/// Narrow the configured allow-list to the models the account serves.
///
/// Falls back to the configured list when the provider cannot be reached or
/// the narrowed list would drop the default model.
async fn refresh_catalog(client: &OpenAiClient, config: &ChatConfig) -> ModelCatalog {
    if config.api.api_key.is_empty() {
        return config.models.clone();
    }

    match client.list_models().await {
        Ok(available) => {
            let narrowed = config.models.retain_available(&available);
            if narrowed.contains(&config.defaults.model) {
                tracing::info!(
                    "{} of {} configured models available",
                    narrowed.len(),
                    config.models.len()
                );
                narrowed
            } else {
                tracing::warn!(
                    "Default model {} not served by the provider; keeping configured models",
                    config.defaults.model
                );
                config.models.clone()
            }
        }
        Err(e) => {
            tracing::warn!("Could not fetch model list: {e}");
            config.models.clone()
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
