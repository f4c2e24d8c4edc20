//! Configuration for the chat service.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::conversation::core::errors::{ConversationError, ConversationResult};
use crate::conversation::core::ids::ModelId;
use crate::conversation::core::params::{GenerationParams, ModelCatalog};

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "CHATKEEPER_";

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Storage settings.
    pub storage: StorageConfig,
    /// Completion API settings.
    pub api: ApiConfig,
    /// Parameters copied into every new conversation.
    pub defaults: GenerationParams,
    /// Models conversations may use.
    pub models: ModelCatalog,
    /// HTTP server settings.
    pub server: ServerConfig,
}

impl ChatConfig {
    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ConversationResult<()> {
        if self.models.is_empty() {
            return Err(ConversationError::InvalidConfig(
                "models must list at least one model".to_string(),
            ));
        }

        self.defaults.validate(&self.models).map_err(|err| {
            ConversationError::InvalidConfig(format!("defaults: {err}"))
        })?;

        if self.api.timeout_seconds == 0 {
            return Err(ConversationError::InvalidConfig(
                "api.timeout_seconds must be > 0".to_string(),
            ));
        }

        Url::parse(&self.api.base_url)?;

        Ok(())
    }

    /// Defaults overlaid with `CHATKEEPER_*` environment variables.
    ///
    /// # Errors
    /// Returns an error if a variable holds an unparseable value.
    pub fn from_env() -> ConversationResult<Self> {
        Self::from_lookup(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Defaults overlaid with values from `lookup`, keyed without the prefix.
    ///
    /// # Errors
    /// Returns an error if a value cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> ConversationResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("DB_PATH") {
            config.storage.sqlite_path = PathBuf::from(path);
        }
        if let Some(url) = lookup("API_URL") {
            config.api.base_url = url;
        }
        if let Some(key) = lookup("API_KEY") {
            config.api.api_key = key;
        }
        if let Some(timeout) = lookup("API_TIMEOUT_SECS") {
            config.api.timeout_seconds = parse_value("API_TIMEOUT_SECS", &timeout)?;
        }
        if let Some(flag) = lookup("CHECK_KEY_SHAPE") {
            config.api.check_key_shape = parse_value("CHECK_KEY_SHAPE", &flag)?;
        }
        if let Some(models) = lookup("MODELS") {
            config.models = ModelCatalog::parse_list(&models)?;
        }
        if let Some(model) = lookup("MODEL") {
            config.defaults.model = ModelId::new(&model).map_err(|err| {
                ConversationError::InvalidConfig(format!("MODEL {model:?}: {err}"))
            })?;
        }
        if let Some(prompt) = lookup("SYSTEM_PROMPT") {
            config.defaults.system_prompt = prompt;
        }
        if let Some(value) = lookup("TEMPERATURE") {
            config.defaults.temperature = parse_value("TEMPERATURE", &value)?;
        }
        if let Some(value) = lookup("TOP_P") {
            config.defaults.top_p = parse_value("TOP_P", &value)?;
        }
        if let Some(value) = lookup("FREQUENCY_PENALTY") {
            config.defaults.frequency_penalty = parse_value("FREQUENCY_PENALTY", &value)?;
        }
        if let Some(value) = lookup("PRESENCE_PENALTY") {
            config.defaults.presence_penalty = parse_value("PRESENCE_PENALTY", &value)?;
        }
        if let Some(host) = lookup("HOST") {
            config.server.host = parse_value("HOST", &host)?;
        }
        if let Some(port) = lookup("PORT") {
            config.server.port = parse_value("PORT", &port)?;
        }

        Ok(config)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> ConversationResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|err| {
        ConversationError::InvalidConfig(format!("{ENV_PREFIX}{key}={raw:?}: {err}"))
    })
}

/// Storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("chatkeeper.sqlite"),
        }
    }
}

/// Completion API settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of an OpenAI-compatible API, including the version segment.
    pub base_url: String,
    /// Bearer token.
    pub api_key: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Require the key to match the legacy OpenAI key shape before chatting.
    pub check_key_shape: bool,
}

impl ApiConfig {
    /// Request timeout as a `Duration`.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            timeout_seconds: 120,
            check_key_shape: false,
        }
    }
}

// The key is redacted.
impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("timeout_seconds", &self.timeout_seconds)
            .field("check_key_shape", &self.check_key_shape)
            .finish()
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    pub host: IpAddr,
    /// Listen port.
    pub port: u16,
}

impl ServerConfig {
    /// Socket address the server binds to.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3000,
        }
    }
}
