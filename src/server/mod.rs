//! HTTP surface of chatkeeper.
//!
//! [`create_router`] maps store and orchestrator operations onto JSON routes;
//! [`serve`] wraps it with CORS and request tracing and binds the configured
//! address.

pub mod routes;
pub mod state;

pub use routes::{ApiError, create_router};
pub use state::AppState;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::conversation::core::config::ServerConfig;

/// Router with the cross-origin and tracing layers applied.
#[must_use]
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve the API on `config.socket_addr()` until `shutdown_signal` completes.
///
/// # Errors
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve<F>(
    state: Arc<AppState>,
    config: &ServerConfig,
    shutdown_signal: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("chatkeeper listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    tracing::info!("chatkeeper stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::net::{IpAddr, Ipv4Addr};
    use tower::ServiceExt;

    use crate::completion::{CredentialCheck, OpenAiClient};
    use crate::conversation::core::config::{ApiConfig, ChatConfig};
    use crate::conversation::{
        ChatOrchestrator, ConversationStore, ModelCatalog, SqliteConversationStore,
    };

    async fn state() -> Arc<AppState> {
        let Ok(store) = SqliteConversationStore::open_in_memory(ModelCatalog::default()).await
        else {
            panic!("in-memory store should open");
        };
        let Ok(client) = OpenAiClient::new(&ApiConfig::default()) else {
            panic!("client should build");
        };
        let store: Arc<dyn ConversationStore> = Arc::new(store);
        let orchestrator = ChatOrchestrator::new(Arc::clone(&store), Arc::new(client));
        let credentials: Arc<dyn CredentialCheck> = Arc::new(|_: &str| false);
        AppState::new(
            store,
            orchestrator,
            ModelCatalog::default(),
            &ChatConfig::default(),
            credentials,
        )
    }

    #[tokio::test]
    async fn test_app_allows_cross_origin_requests() {
        let Ok(request) = Request::builder()
            .uri("/health")
            .header("origin", "http://localhost:5173")
            .body(Body::empty())
        else {
            panic!("request should build");
        };
        let response = match app(state().await).oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .and_then(|value| value.to_str().ok()),
            Some("*")
        );
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown_signal() {
        let config = ServerConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        };
        let result = serve(state().await, &config, async {}).await;
        assert!(result.is_ok());
    }
}
