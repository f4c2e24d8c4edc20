//! Client for OpenAI-compatible chat completion endpoints.

use reqwest::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    ChatTurn, CompletionBackend, CompletionError, CompletionFuture, CompletionReply,
    CompletionRequest,
};
use crate::conversation::core::config::ApiConfig;
use crate::conversation::core::ids::ModelId;

/// Longest error body kept in `CompletionError::Status`.
const MAX_ERROR_BODY: usize = 512;

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f64,
    top_p: f64,
    frequency_penalty: f64,
    presence_penalty: f64,
}

impl<'a> WireRequest<'a> {
    fn from_request(request: &'a CompletionRequest) -> Self {
        Self {
            model: request.model.as_str(),
            messages: request.messages.iter().map(wire_message).collect(),
            temperature: request.temperature,
            top_p: request.top_p,
            frequency_penalty: request.frequency_penalty,
            presence_penalty: request.presence_penalty,
        }
    }
}

fn wire_message(turn: &ChatTurn) -> WireMessage<'_> {
    WireMessage {
        role: turn.role.as_str(),
        content: &turn.text,
    }
}

#[derive(Deserialize)]
struct WireResponse {
    id: Option<String>,
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireReplyMessage,
}

#[derive(Deserialize)]
struct WireReplyMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireModelList {
    data: Vec<WireModel>,
}

#[derive(Deserialize)]
struct WireModel {
    id: String,
}

/// Async client for `POST {base_url}/chat/completions`.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    /// Build a client from API settings.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self, CompletionError> {
        let http = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Fetch the model ids the account can use (`GET {base_url}/models`).
    ///
    /// Entries that are not valid model ids are skipped.
    ///
    /// # Errors
    /// Returns an error if the call fails or the body cannot be decoded.
    pub async fn list_models(&self) -> Result<Vec<ModelId>, CompletionError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let body = read_success_body(response).await?;
        let list: WireModelList = serde_json::from_str(&body)
            .map_err(|err| CompletionError::Malformed(err.to_string()))?;

        let models = list
            .data
            .into_iter()
            .filter_map(|model| match ModelId::new(&model.id) {
                Ok(id) => Some(id),
                Err(err) => {
                    debug!("Skipping model {:?}: {}", model.id, err);
                    None
                }
            })
            .collect();
        Ok(models)
    }

    async fn chat(&self, request: CompletionRequest) -> Result<CompletionReply, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let wire = WireRequest::from_request(&request);
        debug!(
            "Sending {} messages to {} with model {}",
            wire.messages.len(),
            url,
            wire.model
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&wire)
            .send()
            .await?;
        let body = read_success_body(response).await?;
        parse_reply(&body)
    }
}

impl CompletionBackend for OpenAiClient {
    fn complete(
        &self,
        request: CompletionRequest,
    ) -> CompletionFuture<'_, Result<CompletionReply, CompletionError>> {
        Box::pin(self.chat(request))
    }
}

async fn read_success_body(response: reqwest::Response) -> Result<String, CompletionError> {
    let status = response.status();
    let body = response.text().await?;

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        warn!("Completion API rejected credentials with status {}", status);
        return Err(CompletionError::Unauthorized(status.as_u16()));
    }
    if !status.is_success() {
        let body: String = body.chars().take(MAX_ERROR_BODY).collect();
        return Err(CompletionError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

fn parse_reply(body: &str) -> Result<CompletionReply, CompletionError> {
    let response: WireResponse =
        serde_json::from_str(body).map_err(|err| CompletionError::Malformed(err.to_string()))?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CompletionError::Malformed("response has no choices".to_string()))?;
    let text = choice
        .message
        .content
        .ok_or_else(|| CompletionError::Malformed("first choice has no content".to_string()))?;
    Ok(CompletionReply {
        id: response.id,
        text,
    })
}
