//! OpenAI-compatible chat-completions client (OpenRouter, OpenAI, Ollama, custom servers).

use crate::error::GenerationError;
use crate::provider::{
    parse_json_body, Generation, GenerationClient, GenerationRequest, ProviderConfig,
    ProviderType, ResponseContract,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

const PROVIDER_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Classify a non-success HTTP status.
pub fn classify_status(status: StatusCode, body: &str) -> GenerationError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
    match status.as_u16() {
        429 => GenerationError::RateLimited(detail),
        408 | 409 | 425 => GenerationError::Transient(detail),
        s if (500..600).contains(&s) => GenerationError::Transient(detail),
        _ => GenerationError::Fatal(detail),
    }
}

fn map_http_error(error: reqwest::Error) -> GenerationError {
    if let Some(status) = error.status() {
        classify_status(status, &error.to_string())
    } else if error.is_timeout() {
        GenerationError::Transient(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        GenerationError::Transient(format!("Connection error: {}", error))
    } else if error.is_body() || error.is_decode() {
        GenerationError::Transient(format!("Response body interrupted: {}", error))
    } else {
        GenerationError::Transient(format!("HTTP error: {}", error))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

/// Client for any `/chat/completions` endpoint.
pub struct OpenAiCompatibleClient {
    client: Client,
    provider_type: ProviderType,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn new(config: &ProviderConfig, request_timeout: Duration) -> Result<Self, GenerationError> {
        let base_url = config.resolved_base_url().ok_or_else(|| {
            GenerationError::Fatal(format!(
                "Provider '{}' requires provider.base_url",
                config.provider_type
            ))
        })?;
        let client = Client::builder()
            .connect_timeout(PROVIDER_HTTP_CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| GenerationError::Fatal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            provider_type: config.provider_type,
            base_url,
            api_key: config.resolved_api_key(),
        })
    }

    fn response_format(contract: &ResponseContract) -> Option<Value> {
        match contract {
            ResponseContract::FreeText => None,
            ResponseContract::JsonSchema { name, schema } => Some(json!({
                "type": "json_schema",
                "json_schema": { "name": name, "strict": true, "schema": schema }
            })),
        }
    }
}

#[async_trait]
impl GenerationClient for OpenAiCompatibleClient {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationError> {
        if self.api_key.is_none() && self.provider_type.requires_api_key() {
            return Err(GenerationError::Fatal(format!(
                "No API key configured for provider '{}'",
                self.provider_type
            )));
        }

        let body = ChatCompletionRequest {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            response_format: Self::response_format(&request.contract),
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        tracing::debug!(purpose = %request.purpose, model = %request.model, "Sending generation request");
        let response = builder.send().await.map_err(map_http_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(classify_status(status, &error_text));
        }

        let payload = response.text().await.map_err(map_http_error)?;
        let completion: ChatCompletionResponse = serde_json::from_str(&payload)
            .map_err(|e| GenerationError::Fatal(format!("Failed to parse response: {}", e)))?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::Fatal("No content in response".to_string()))?;

        let json = if request.expects_json() {
            parse_json_body(&text).ok()
        } else {
            None
        };

        Ok(Generation {
            text,
            model: completion.model.unwrap_or(request.model),
            json,
        })
    }

    fn provider_name(&self) -> &str {
        match self.provider_type {
            ProviderType::OpenRouter => "openrouter",
            ProviderType::OpenAI => "openai",
            ProviderType::Ollama => "ollama",
            ProviderType::Custom => "custom",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            GenerationError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            GenerationError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::REQUEST_TIMEOUT, ""),
            GenerationError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            GenerationError::Fatal(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, ""),
            GenerationError::Fatal(_)
        ));
    }

    #[test]
    fn test_json_contract_sets_response_format() {
        let contract = ResponseContract::JsonSchema {
            name: "decomposition".into(),
            schema: json!({"type": "object"}),
        };
        let format = OpenAiCompatibleClient::response_format(&contract).unwrap();
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["name"], "decomposition");
        assert!(OpenAiCompatibleClient::response_format(&ResponseContract::FreeText).is_none());
    }

    #[test]
    fn test_custom_provider_needs_base_url() {
        let config = ProviderConfig {
            provider_type: ProviderType::Custom,
            ..ProviderConfig::default()
        };
        assert!(OpenAiCompatibleClient::new(&config, Duration::from_secs(5)).is_err());
    }

    /// Serve one request with a response whose body stops short of its Content-Length.
    fn truncated_body_server() -> String {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).unwrap_or(0);
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if n == 0 {
                    break;
                }
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }
            let _ = stream.write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 400\r\n\r\n{\"choices\": [",
            );
            let _ = stream.flush();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_interrupted_body_is_transient() {
        let config = ProviderConfig {
            provider_type: ProviderType::Custom,
            base_url: Some(truncated_body_server()),
            ..ProviderConfig::default()
        };
        let client = OpenAiCompatibleClient::new(&config, Duration::from_secs(5)).unwrap();
        let request = GenerationRequest::text("draft", "sys", "user", "m", 0.7);
        let result = client.generate(request).await;
        assert!(
            matches!(result, Err(GenerationError::Transient(_))),
            "{:?}",
            result
        );
    }

    #[tokio::test]
    async fn test_missing_key_is_fatal() {
        let config = ProviderConfig {
            api_key: None,
            api_key_env: "SOLVENT_TEST_NEVER_SET_KEY".into(),
            ..ProviderConfig::default()
        };
        let client = OpenAiCompatibleClient::new(&config, Duration::from_secs(5)).unwrap();
        let request = GenerationRequest::text("draft", "sys", "user", "m", 0.7);
        assert!(matches!(
            client.generate(request).await,
            Err(GenerationError::Fatal(_))
        ));
    }
}
