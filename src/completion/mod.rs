//! Completion capability consumed by the chat orchestrator.
//!
//! The orchestrator only depends on [`CompletionBackend`]; [`OpenAiClient`]
//! is the bundled adapter for OpenAI-compatible endpoints.

pub mod credentials;
pub mod openai;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::core::ids::ModelId;
use crate::conversation::core::message::Role;

pub use credentials::{CredentialCheck, OpenAiKeyPattern};
pub use openai::OpenAiClient;

/// Boxed future type for completion calls.
pub type CompletionFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One `(role, text)` entry of the outbound history.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Author role.
    pub role: Role,
    /// Text content.
    pub text: String,
}

impl ChatTurn {
    /// Build a turn.
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Everything the provider needs for one completion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model to run.
    pub model: ModelId,
    /// Ordered history, system prompt first when present.
    pub messages: Vec<ChatTurn>,
    /// Sampling temperature.
    pub temperature: f64,
    /// Nucleus sampling mass.
    pub top_p: f64,
    /// Frequency penalty.
    pub frequency_penalty: f64,
    /// Presence penalty.
    pub presence_penalty: f64,
}

/// First choice of a completion response.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CompletionReply {
    /// Provider-issued response id, if any.
    pub id: Option<String>,
    /// Generated text.
    pub text: String,
}

/// Coarse failure classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    /// Network, authentication, or non-success status.
    Transport,
    /// The provider answered but the body could not be used.
    MalformedResponse,
}

/// Errors from the completion capability.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Request could not be sent or the connection failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// Provider rejected the credentials.
    #[error("authentication rejected with status {0}")]
    Unauthorized(u16),
    /// Non-success status other than an authentication failure.
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
    /// Response body could not be decoded or had no usable choice.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// The background exchange task ended without a result.
    #[error("completion task aborted: {0}")]
    Aborted(String),
}

impl CompletionError {
    /// Fold the error into transport vs malformed-response.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Malformed(_) => FailureKind::MalformedResponse,
            Self::Transport(_) | Self::Unauthorized(_) | Self::Status { .. } | Self::Aborted(_) => {
                FailureKind::Transport
            }
        }
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Trait abstraction over completion providers.
pub trait CompletionBackend: Send + Sync {
    /// Run one completion over `request`.
    ///
    /// # Errors
    /// Returns an error if the call fails or the response is unusable.
    fn complete(
        &self,
        request: CompletionRequest,
    ) -> CompletionFuture<'_, Result<CompletionReply, CompletionError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            CompletionError::Malformed("no choices".into()).kind(),
            FailureKind::MalformedResponse
        );
        assert_eq!(
            CompletionError::Unauthorized(401).kind(),
            FailureKind::Transport
        );
        assert_eq!(
            CompletionError::Status {
                status: 500,
                body: String::new()
            }
            .kind(),
            FailureKind::Transport
        );
    }
}
