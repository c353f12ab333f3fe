//! Generation Provider Abstraction
//!
//! Every stage talks to the content-generation service through [`GenerationClient`]. A
//! request carries the stage purpose, the system instruction, the user prompt and a
//! response contract (free text or schema-constrained JSON); failures come back already
//! classified as rate-limited, transient or fatal.

use crate::error::GenerationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub mod openai;
pub mod retry;
pub mod scripted;

pub use openai::OpenAiCompatibleClient;
pub use retry::{RetryPolicy, RetryingClient};
pub use scripted::ScriptedClient;

/// Shape the caller expects back.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseContract {
    FreeText,
    JsonSchema { name: String, schema: Value },
}

/// One call to the generation service.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Stage or helper that issued the call (`decompose`, `draft`, `data_extraction`, ...).
    pub purpose: String,
    pub system: String,
    pub user: String,
    pub model: String,
    pub temperature: f32,
    pub contract: ResponseContract,
}

impl GenerationRequest {
    pub fn text(
        purpose: impl Into<String>,
        system: impl Into<String>,
        user: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            purpose: purpose.into(),
            system: system.into(),
            user: user.into(),
            model: model.into(),
            temperature,
            contract: ResponseContract::FreeText,
        }
    }

    pub fn with_schema(mut self, name: impl Into<String>, schema: Value) -> Self {
        self.contract = ResponseContract::JsonSchema {
            name: name.into(),
            schema,
        };
        self
    }

    pub fn expects_json(&self) -> bool {
        matches!(self.contract, ResponseContract::JsonSchema { .. })
    }
}

/// Successful generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub model: String,
    /// Parsed body when the request used a JSON contract and the body parsed.
    pub json: Option<Value>,
}

/// Content-generation service.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationError>;

    /// Short provider name for logs.
    fn provider_name(&self) -> &str;
}

#[async_trait]
impl<T: GenerationClient + ?Sized> GenerationClient for Arc<T> {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationError> {
        (**self).generate(request).await
    }

    fn provider_name(&self) -> &str {
        (**self).provider_name()
    }
}

/// Supported OpenAI-compatible endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    #[default]
    OpenRouter,
    OpenAI,
    Ollama,
    Custom,
}

impl ProviderType {
    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            ProviderType::OpenRouter => Some("https://openrouter.ai/api/v1"),
            ProviderType::OpenAI => Some("https://api.openai.com/v1"),
            ProviderType::Ollama => Some("http://localhost:11434/v1"),
            ProviderType::Custom => None,
        }
    }

    pub fn requires_api_key(self) -> bool {
        matches!(self, ProviderType::OpenRouter | ProviderType::OpenAI)
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderType::OpenRouter => "openrouter",
            ProviderType::OpenAI => "openai",
            ProviderType::Ollama => "ollama",
            ProviderType::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Provider connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub provider_type: ProviderType,

    /// Endpoint base URL; defaults per provider type
    #[serde(default)]
    pub base_url: Option<String>,

    /// Inline API key (prefer `api_key_env`)
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used when a stage has no override
    #[serde(default = "default_model")]
    pub default_model: String,
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_model() -> String {
    "openai/gpt-4o".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: ProviderType::default(),
            base_url: None,
            api_key: None,
            api_key_env: default_api_key_env(),
            default_model: default_model(),
        }
    }
}

impl ProviderConfig {
    pub fn resolved_base_url(&self) -> Option<String> {
        self.base_url
            .clone()
            .or_else(|| self.provider_type.default_base_url().map(str::to_string))
            .map(|url| url.trim_end_matches('/').to_string())
    }

    /// Inline key first, then the configured environment variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                std::env::var(&self.api_key_env)
                    .ok()
                    .filter(|k| !k.trim().is_empty())
            })
    }
}

/// Strip a surrounding Markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a JSON body produced under a JSON contract.
pub fn parse_json_body(text: &str) -> Result<Value, GenerationError> {
    serde_json::from_str(strip_code_fences(text))
        .map_err(|e| GenerationError::Fatal(format!("Response is not valid JSON: {}", e)))
}

/// Client for the configured provider behind the retry wrapper.
///
/// `offline` swaps the remote provider for [`ScriptedClient::offline`].
pub fn build_client(
    provider: &ProviderConfig,
    retry: &RetryPolicy,
    offline: bool,
) -> Result<Arc<dyn GenerationClient>, GenerationError> {
    if offline {
        return Ok(Arc::new(RetryingClient::new(
            ScriptedClient::offline(),
            retry.clone(),
        )));
    }
    let client = OpenAiCompatibleClient::new(provider, retry.attempt_timeout())?;
    Ok(Arc::new(RetryingClient::new(client, retry.clone())))
}
