//! Tool Executor (C10, §4.10). Dispatch-by-name registry grounded almost
//! verbatim on the teacher's `tool_registry::ToolRegistry`, simplified to a
//! single string argument per tool (the agent stage only ever calls one
//! tool with one payload) and extended with `(name, arg_hash)` result
//! caching so identical calls within a session don't re-hit the network.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: false }
    }

    /// §4.10: "tool adapter exceptions are caught and rendered as
    /// `Tool Error: <message>` rather than propagated".
    pub fn error(message: impl Into<String>) -> Self {
        Self { content: format!("Tool Error: {}", message.into()), is_error: true }
    }
}

#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self, arg: &str) -> ToolOutput;
}

pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    cache: Mutex<HashMap<String, ToolOutput>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { handlers: HashMap::new(), cache: Mutex::new(HashMap::new()) }
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.name().to_string();
        tracing::debug!(tool = %name, "registered tool");
        self.handlers.insert(name, handler);
    }

    /// Dispatch by name, caching on `(name, arg)` so repeated identical
    /// calls in one session skip the adapter entirely.
    pub async fn dispatch(&self, name: &str, arg: &str) -> ToolOutput {
        let cache_key = Self::cache_key(name, arg);
        if let Some(cached) = self.cache.lock().await.get(&cache_key) {
            tracing::debug!(tool = name, "tool cache hit");
            return cached.clone();
        }

        let outcome = match self.handlers.get(name) {
            Some(handler) => handler.execute(arg).await,
            None => ToolOutput { content: format!("Unknown tool: {}", name), is_error: true },
        };

        if !outcome.is_error {
            self.cache.lock().await.insert(cache_key, outcome.clone());
        }
        outcome
    }

    fn cache_key(name: &str, arg: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(arg.as_bytes());
        format!("{name}:{:x}", hasher.finalize())
    }
}

/// §4.10: dispatch table entry backed by a web search API.
pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl WebSearchTool {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), endpoint: endpoint.into(), api_key }
    }
}

#[async_trait::async_trait]
impl ToolHandler for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    async fn execute(&self, arg: &str) -> ToolOutput {
        let mut request = self.client.get(&self.endpoint).query(&[("q", arg)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        match request.send().await {
            Ok(resp) => match resp.text().await {
                Ok(body) => ToolOutput::ok(body),
                Err(e) => ToolOutput::error(e.to_string()),
            },
            Err(e) => ToolOutput::error(e.to_string()),
        }
    }
}

/// §4.10: dispatch table entry backed by an image generation API,
/// returning the resulting image URL.
pub struct GenerateImageTool {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl GenerateImageTool {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), endpoint: endpoint.into(), api_key }
    }
}

#[async_trait::async_trait]
impl ToolHandler for GenerateImageTool {
    fn name(&self) -> &str {
        "generate_image"
    }

    async fn execute(&self, arg: &str) -> ToolOutput {
        let mut request = self.client.post(&self.endpoint).json(&serde_json::json!({ "prompt": arg }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return ToolOutput::error(e.to_string()),
        };
        match response.json::<serde_json::Value>().await {
            Ok(body) => match body.get("url").and_then(|v| v.as_str()) {
                Some(url) => ToolOutput::ok(url),
                None => ToolOutput::error("response missing `url` field"),
            },
            Err(e) => ToolOutput::error(e.to_string()),
        }
    }
}

/// §4.10: dispatch table entry for sandboxed Python analysis, proxied to an
/// external execution service rather than run in-process.
pub struct RunPythonAnalysisTool {
    client: reqwest::Client,
    endpoint: String,
}

impl RunPythonAnalysisTool {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), endpoint: endpoint.into() }
    }
}

#[async_trait::async_trait]
impl ToolHandler for RunPythonAnalysisTool {
    fn name(&self) -> &str {
        "run_python_analysis"
    }

    async fn execute(&self, arg: &str) -> ToolOutput {
        let request = self.client.post(&self.endpoint).json(&serde_json::json!({ "code": arg }));
        match request.send().await {
            Ok(resp) => match resp.text().await {
                Ok(body) => ToolOutput::ok(body),
                Err(e) => ToolOutput::error(e.to_string()),
            },
            Err(e) => ToolOutput::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait::async_trait]
    impl ToolHandler for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(&self, arg: &str) -> ToolOutput {
            ToolOutput::ok(arg.to_string())
        }
    }

    struct CountingTool {
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ToolHandler for CountingTool {
        fn name(&self) -> &str {
            "counting"
        }

        async fn execute(&self, arg: &str) -> ToolOutput {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            ToolOutput::ok(arg.to_string())
        }
    }

    #[tokio::test]
    async fn unknown_tool_reports_unknown() {
        let registry = ToolRegistry::new();
        let out = registry.dispatch("nonexistent", "x").await;
        assert!(out.is_error);
        assert_eq!(out.content, "Unknown tool: nonexistent");
    }

    #[tokio::test]
    async fn dispatch_routes_to_registered_handler() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let out = registry.dispatch("echo", "hello").await;
        assert!(!out.is_error);
        assert_eq!(out.content, "hello");
    }

    #[tokio::test]
    async fn repeated_identical_calls_are_cached() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CountingTool { calls: calls.clone() }));
        registry.dispatch("counting", "same-arg").await;
        registry.dispatch("counting", "same-arg").await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        let out = registry.dispatch("counting", "different-arg").await;
        assert_eq!(out.content, "different-arg");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
