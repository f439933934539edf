//! Upstream chat-completion providers (innermost layer, §4.4). Grounded on
//! `mneme_reasoning::providers::{anthropic, openai, mock}` — same shape
//! (a thin `reqwest` wrapper behind a trait), collapsed to a single
//! non-streaming `complete` call since the gateway's callers (agent,
//! psychology, memory-saver) all want one JSON object back, not a token
//! stream.

use crate::types::{ChatMessage, CompletionResponse, GatewayError, Role};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
        timeout: Duration,
    ) -> Result<CompletionResponse, GatewayError>;
}

fn map_transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout(Duration::from_secs(0))
    } else {
        GatewayError::Connection(e.to_string())
    }
}

fn map_status_error(status: StatusCode, body: String) -> GatewayError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        GatewayError::UpstreamServerError(format!("{status}: {body}"))
    } else {
        GatewayError::UpstreamClientError(format!("{status}: {body}"))
    }
}

/// Anthropic Messages API (`/v1/messages`). Grounded on
/// `mneme_reasoning::providers::anthropic::AnthropicClient`.
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
        timeout: Duration,
    ) -> Result<CompletionResponse, GatewayError> {
        let system = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n\n");
        let turns: Vec<AnthropicMessage> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| AnthropicMessage {
                role: if m.role == Role::Assistant { "assistant" } else { "user" },
                content: m.content.clone(),
            })
            .collect();

        let body = AnthropicRequest {
            model,
            system: if system.is_empty() { None } else { Some(system) },
            messages: turns,
            max_tokens: 4096,
            temperature,
        };

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = resp.status();
        let text = resp.text().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, text));
        }
        let parsed: AnthropicResponse =
            serde_json::from_str(&text).map_err(|e| GatewayError::Provider(format!("malformed Anthropic response: {e}")))?;
        let joined = parsed.content.into_iter().map(|b| b.text).collect::<Vec<_>>().join("");
        Ok(CompletionResponse { text: joined })
    }
}

/// Any OpenAI-compatible `/v1/chat/completions` endpoint (siliconflow, mimo,
/// aizex, or OpenAI itself) — grounded on
/// `mneme_reasoning::providers::openai::OpenAiClient`.
pub struct OpenAiCompatProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiCompatProvider {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self { client: Client::new(), api_key: api_key.into(), base_url: base_url.into() }
    }
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
        timeout: Duration,
    ) -> Result<CompletionResponse, GatewayError> {
        let wire_messages: Vec<_> = messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                json!({ "role": role, "content": m.content })
            })
            .collect();

        let body = json!({
            "model": model,
            "messages": wire_messages,
            "temperature": temperature,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = resp.status();
        let text = resp.text().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, text));
        }
        let parsed: OpenAiResponse =
            serde_json::from_str(&text).map_err(|e| GatewayError::Provider(format!("malformed OpenAI-compatible response: {e}")))?;
        let first = parsed.choices.into_iter().next().map(|c| c.message.content).unwrap_or_default();
        Ok(CompletionResponse { text: first })
    }
}

/// Deterministic provider for tests: echoes the last user message, with
/// optional injected failures to exercise the retry layer.
pub struct MockProvider {
    pub fixed_response: Option<String>,
    pub fail_times: std::sync::atomic::AtomicU32,
    pub calls: std::sync::atomic::AtomicU32,
}

impl MockProvider {
    pub fn new(fixed_response: Option<String>) -> Self {
        Self { fixed_response, fail_times: std::sync::atomic::AtomicU32::new(0), calls: std::sync::atomic::AtomicU32::new(0) }
    }

    pub fn failing(times: u32) -> Self {
        Self { fixed_response: None, fail_times: std::sync::atomic::AtomicU32::new(times), calls: std::sync::atomic::AtomicU32::new(0) }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn complete(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _temperature: f32,
        _timeout: Duration,
    ) -> Result<CompletionResponse, GatewayError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let remaining = self.fail_times.load(std::sync::atomic::Ordering::SeqCst);
        if remaining > 0 {
            self.fail_times.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            return Err(GatewayError::Connection("mock transient failure".to_string()));
        }
        if let Some(fixed) = &self.fixed_response {
            return Ok(CompletionResponse { text: fixed.clone() });
        }
        let last_user = messages.iter().rev().find(|m| m.role == Role::User).map(|m| m.content.clone()).unwrap_or_default();
        Ok(CompletionResponse { text: format!("(mock) {last_user}") })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_echoes_last_user_message() {
        let provider = MockProvider::new(None);
        let resp = provider
            .complete("test-model", &[ChatMessage::system("sys"), ChatMessage::user("hello")], 0.5, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(resp.text, "(mock) hello");
    }

    #[tokio::test]
    async fn mock_provider_fails_n_times_then_succeeds() {
        let provider = MockProvider::failing(2);
        assert!(provider.complete("m", &[], 0.0, Duration::from_secs(1)).await.is_err());
        assert!(provider.complete("m", &[], 0.0, Duration::from_secs(1)).await.is_err());
        assert!(provider.complete("m", &[], 0.0, Duration::from_secs(1)).await.is_ok());
        assert_eq!(provider.call_count(), 3);
    }
}
