//! HTTP route handlers for the conversation API.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::conversation::orchestrator::SendState;
use crate::conversation::{
    Conversation, ConversationError, ConversationId, Message, ModelId, ParameterPatch,
};

use super::state::AppState;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/models", get(list_models))
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/api/conversations/{id}",
            get(get_conversation).delete(delete_conversation),
        )
        .route("/api/conversations/{id}/title", put(rename_conversation))
        .route(
            "/api/conversations/{id}/parameters",
            patch(update_parameters),
        )
        .route(
            "/api/conversations/{id}/parameters/reset",
            post(reset_parameters),
        )
        .route(
            "/api/conversations/{id}/messages",
            get(list_messages).post(send_message).delete(reset_history),
        )
        .with_state(state)
}

/// Errors returned by the API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Store or orchestrator failure.
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    /// The configured API key failed the credential check.
    #[error("the configured API key is not accepted")]
    CredentialsRejected,
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::CredentialsRejected => StatusCode::UNAUTHORIZED,
            Self::Conversation(err) => match err {
                ConversationError::NotFound(_) => StatusCode::NOT_FOUND,
                ConversationError::DuplicateMessage { .. } => StatusCode::CONFLICT,
                ConversationError::InvalidParameter { .. }
                | ConversationError::InvalidMessage(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ConversationError::CompletionFailed(_) => StatusCode::BAD_GATEWAY,
                ConversationError::InvalidConfig(_)
                | ConversationError::TokioSqlite(_)
                | ConversationError::CorruptRecord(_)
                | ConversationError::Url(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed with {}: {}", status, self);
        } else {
            tracing::debug!("Request rejected with {}: {}", status, self);
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chatkeeper",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Model list response.
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    /// Selectable models.
    pub models: Vec<ModelId>,
    /// Model used for new conversations.
    pub default: ModelId,
}

async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.catalog.iter().cloned().collect(),
        default: state.defaults.model.clone(),
    })
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<Conversation>>> {
    Ok(Json(state.store.list().await?))
}

/// New conversation request; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateConversationRequest {
    /// Display title.
    pub title: Option<String>,
    /// Overrides applied on top of the configured defaults.
    pub parameters: ParameterPatch,
}

async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateConversationRequest>,
) -> ApiResult<(StatusCode, Json<Conversation>)> {
    let params = state.defaults.merged(&request.parameters);
    let conversation = state
        .store
        .create_conversation(&params, request.title.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Conversation>> {
    Ok(Json(state.store.get(ConversationId::from(id)).await?))
}

async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let id = ConversationId::from(id);
    state.store.delete_conversation(id).await?;
    state.orchestrator.forget(id);
    Ok(StatusCode::NO_CONTENT)
}

/// Rename request.
#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    /// New title; blank reverts to the conversation id.
    pub title: String,
}

async fn rename_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<RenameRequest>,
) -> ApiResult<Json<Conversation>> {
    let conversation = state
        .store
        .rename(ConversationId::from(id), &request.title)
        .await?;
    Ok(Json(conversation))
}

async fn update_parameters(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<ParameterPatch>,
) -> ApiResult<Json<Conversation>> {
    let conversation = state
        .store
        .update_parameters(ConversationId::from(id), patch)
        .await?;
    Ok(Json(conversation))
}

async fn reset_parameters(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Conversation>> {
    let conversation = state
        .store
        .reset_parameters(ConversationId::from(id), &state.defaults)
        .await?;
    Ok(Json(conversation))
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Message>>> {
    Ok(Json(state.store.messages(ConversationId::from(id)).await?))
}

async fn reset_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.store.reset_history(ConversationId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Send request.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// User message text.
    pub text: String,
}

/// Send response.
#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    /// Stored assistant reply.
    pub reply: Message,
    /// Send state after the exchange.
    pub state: SendState,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<Json<SendMessageResponse>> {
    if !state.can_chat() {
        return Err(ApiError::CredentialsRejected);
    }
    let id = ConversationId::from(id);
    let reply = state.orchestrator.send_message(id, &request.text).await?;
    Ok(Json(SendMessageResponse {
        reply,
        state: state.orchestrator.send_state(id),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::completion::{
        CompletionBackend, CompletionError, CompletionFuture, CompletionReply, CompletionRequest,
        CredentialCheck,
    };
    use crate::conversation::core::config::ChatConfig;
    use crate::conversation::{
        ChatOrchestrator, ConversationStore, ModelCatalog, SqliteConversationStore,
    };

    /// Replies with the last user turn, or fails when `fail` is set.
    struct EchoBackend {
        fail: bool,
    }

    impl CompletionBackend for EchoBackend {
        fn complete(
            &self,
            request: CompletionRequest,
        ) -> CompletionFuture<'_, Result<CompletionReply, CompletionError>> {
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    return Err(CompletionError::Status {
                        status: 503,
                        body: "overloaded".to_string(),
                    });
                }
                let last = request
                    .messages
                    .last()
                    .map(|turn| turn.text.clone())
                    .unwrap_or_default();
                Ok(CompletionReply {
                    id: None,
                    text: format!("echo: {last}"),
                })
            })
        }
    }

    async fn test_state(fail: bool, key_ok: bool) -> Arc<AppState> {
        let Ok(store) = SqliteConversationStore::open_in_memory(ModelCatalog::default()).await
        else {
            panic!("in-memory store should open");
        };
        let store: Arc<dyn ConversationStore> = Arc::new(store);
        let orchestrator = ChatOrchestrator::new(store.clone(), Arc::new(EchoBackend { fail }));
        let credentials: Arc<dyn CredentialCheck> = Arc::new(move |_: &str| key_ok);
        AppState::new(
            store,
            orchestrator,
            ModelCatalog::default(),
            &ChatConfig::default(),
            credentials,
        )
    }

    async fn test_app(fail: bool, key_ok: bool) -> Router {
        create_router(test_state(fail, key_ok).await)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        };
        let Ok(request) = request else {
            panic!("request should build");
        };
        let response = match app.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn create(app: &Router, body: Value) -> String {
        let (status, conversation) = call(app, "POST", "/api/conversations", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        conversation["id"].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app(false, true).await;
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_models_lists_catalog_and_default() {
        let app = test_app(false, true).await;
        let (status, body) = call(&app, "GET", "/api/models", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["default"], "gpt-3.5-turbo");
        assert_eq!(body["models"].as_array().map(Vec::len), Some(6));
    }

    #[tokio::test]
    async fn test_create_with_overrides_and_title() {
        let app = test_app(false, true).await;
        let id = create(
            &app,
            json!({"title": "Trip", "parameters": {"model": "gpt-4", "temperature": 0.2}}),
        )
        .await;

        let (status, body) = call(&app, "GET", &format!("/api/conversations/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Trip");
        assert_eq!(body["params"]["model"], "gpt-4");

        let (_, list) = call(&app, "GET", "/api/conversations", None).await;
        assert_eq!(list.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_invalid_parameters_are_unprocessable() {
        let app = test_app(false, true).await;
        let (status, _) = call(
            &app,
            "POST",
            "/api/conversations",
            Some(json!({"parameters": {"temperature": 1.5}})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let id = create(&app, json!({})).await;
        let uri = format!("/api/conversations/{id}/parameters");
        let (status, body) = call(&app, "PATCH", &uri, Some(json!({"model": "davinci"}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap_or_default().contains("model"));

        let (status, body) = call(&app, "PATCH", &uri, Some(json!({"top_p": 0.5}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["params"]["top_p"], 0.5);

        let reset = format!("/api/conversations/{id}/parameters/reset");
        let (status, body) = call(&app, "POST", &reset, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["params"]["top_p"], 1.0);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids() {
        let app = test_app(false, true).await;
        let missing = ConversationId::new();
        let (status, _) = call(&app, "GET", &format!("/api/conversations/{missing}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, "GET", "/api/conversations/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_send_and_reset_history() {
        let app = test_app(false, true).await;
        let id = create(&app, json!({})).await;
        let uri = format!("/api/conversations/{id}/messages");

        let (status, body) = call(&app, "POST", &uri, Some(json!({"text": "hi"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"]["text"], "echo: hi");
        assert_eq!(body["reply"]["role"], "assistant");
        assert_eq!(body["state"], "completed");

        let (_, history) = call(&app, "GET", &uri, None).await;
        assert_eq!(history.as_array().map(Vec::len), Some(2));

        let (status, _) = call(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, history) = call(&app, "GET", &uri, None).await;
        assert_eq!(history.as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn test_failed_completion_is_bad_gateway() {
        let app = test_app(true, true).await;
        let id = create(&app, json!({})).await;
        let uri = format!("/api/conversations/{id}/messages");

        let (status, _) = call(&app, "POST", &uri, Some(json!({"text": "hi"}))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (_, history) = call(&app, "GET", &uri, None).await;
        assert_eq!(history.as_array().map(Vec::len), Some(1));
        assert_eq!(history[0]["role"], "user");
    }

    #[tokio::test]
    async fn test_rejected_key_blocks_send() {
        let app = test_app(false, false).await;
        let id = create(&app, json!({})).await;
        let uri = format!("/api/conversations/{id}/messages");

        let (status, _) = call(&app, "POST", &uri, Some(json!({"text": "hi"}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, history) = call(&app, "GET", &uri, None).await;
        assert_eq!(history.as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn test_rename_and_delete() {
        let app = test_app(false, true).await;
        let id = create(&app, json!({})).await;
        let uri = format!("/api/conversations/{id}");

        let (status, body) = call(
            &app,
            "PUT",
            &format!("{uri}/title"),
            Some(json!({"title": "Groceries"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Groceries");

        let (status, _) = call(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_clears_send_state() {
        let state = test_state(false, true).await;
        let app = create_router(Arc::clone(&state));
        let id = create(&app, json!({})).await;
        let Ok(conversation_id) = id.parse::<ConversationId>() else {
            panic!("created id should parse");
        };

        let messages = format!("/api/conversations/{id}/messages");
        let (status, _) = call(&app, "POST", &messages, Some(json!({"text": "hi"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            state.orchestrator.send_state(conversation_id),
            SendState::Completed
        );

        let (status, _) = call(&app, "DELETE", &format!("/api/conversations/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(
            state.orchestrator.send_state(conversation_id),
            SendState::Idle
        );
    }
}
