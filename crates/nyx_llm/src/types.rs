//! Wire-agnostic request/response shapes for the LLM Gateway (§4.4). These
//! are the types every layer (cache, coalescer, semaphore, retry, provider)
//! agrees on; provider-specific JSON shapes live in `provider.rs`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
}

/// Selects a cache TTL (§4.4 layer 1). Each variant corresponds to one of
/// the query classes the agent/psychology/memory-saver stages use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryClass {
    SimpleQuery,
    ComplexQuery,
    CreativeQuery,
    MemoryExtraction,
    PsychologyAnalysis,
    ContextFilter,
}

impl QueryClass {
    /// Default TTL per class, per §4.4's table. Capped separately when
    /// `temperature > 0.8` (see `gateway.rs`).
    pub fn default_ttl(self) -> Duration {
        match self {
            QueryClass::SimpleQuery => Duration::from_secs(3600),
            QueryClass::ComplexQuery => Duration::from_secs(1800),
            QueryClass::CreativeQuery => Duration::from_secs(600),
            QueryClass::MemoryExtraction => Duration::from_secs(3600),
            QueryClass::PsychologyAnalysis => Duration::from_secs(1200),
            QueryClass::ContextFilter => Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub query_class: QueryClass,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionResponse {
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("upstream returned server error: {0}")]
    UpstreamServerError(String),
    #[error("upstream returned client error: {0}")]
    UpstreamClientError(String),
    #[error("provider error: {0}")]
    Provider(String),
}

impl GatewayError {
    /// §4.4 retry layer retries on timeout and connection-class errors only.
    pub fn is_retriable(&self) -> bool {
        matches!(self, GatewayError::Timeout(_) | GatewayError::Connection(_) | GatewayError::UpstreamServerError(_))
    }
}

impl Clone for GatewayError {
    fn clone(&self) -> Self {
        match self {
            GatewayError::Timeout(d) => GatewayError::Timeout(*d),
            GatewayError::Connection(s) => GatewayError::Connection(s.clone()),
            GatewayError::UpstreamServerError(s) => GatewayError::UpstreamServerError(s.clone()),
            GatewayError::UpstreamClientError(s) => GatewayError::UpstreamClientError(s.clone()),
            GatewayError::Provider(s) => GatewayError::Provider(s.clone()),
        }
    }
}
