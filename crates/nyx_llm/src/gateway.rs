//! The LLM Gateway (C4, §4.4): cache → coalescer → concurrency gate →
//! retry → provider, outer to inner. This is the only thing the rest of
//! the engine talks to; it never exposes providers or raw HTTP directly.

use crate::cache::{cache_key, LlmCache};
use crate::coalescer::{CoalesceRole, Coalescer};
use crate::provider::LlmProvider;
use crate::retry::{with_retry, RetryConfig};
use crate::types::{ChatMessage, CompletionRequest, CompletionResponse, GatewayError, QueryClass};
use std::sync::Arc;
use tokio::sync::Semaphore;

pub struct LlmGateway {
    provider: Arc<dyn LlmProvider>,
    cache: Arc<LlmCache>,
    coalescer: Arc<Coalescer>,
    semaphore: Arc<Semaphore>,
    retry: RetryConfig,
}

impl LlmGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, cache_max_size: usize, max_concurrent: usize, retry: RetryConfig) -> Self {
        Self {
            provider,
            cache: Arc::new(LlmCache::new(cache_max_size)),
            coalescer: Arc::new(Coalescer::new()),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            retry,
        }
    }

    pub fn cache(&self) -> &LlmCache {
        &self.cache
    }

    pub fn merged_requests(&self) -> u64 {
        self.coalescer.merged_requests()
    }

    /// §4.4's single entry point. Cache hits return without any upstream
    /// call; identical in-flight requests are de-duplicated; at most
    /// `max_concurrent` upstream calls run at a time.
    pub async fn invoke(&self, request: CompletionRequest) -> Result<CompletionResponse, GatewayError> {
        let key = cache_key(&request.messages, &request.model, request.temperature, request.query_class);

        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        match self.coalescer.join(&key).await {
            CoalesceRole::Follower(rx) => rx.await.map_err(|_| GatewayError::Provider("coalescer channel closed".to_string()))?,
            CoalesceRole::Leader => {
                // Re-check the cache: a leader may have populated it between
                // our first miss and winning the coalescer race.
                if let Some(cached) = self.cache.get(&key) {
                    self.coalescer.complete(&key, Ok(cached.clone())).await;
                    return Ok(cached);
                }

                let result = self.call_upstream(&request).await;
                if let Ok(response) = &result {
                    let ttl = LlmCache::effective_ttl(request.query_class, request.temperature);
                    self.cache.put(key.clone(), response.clone(), ttl);
                }
                self.coalescer.complete(&key, result.clone()).await;
                result
            }
        }
    }

    async fn call_upstream(&self, request: &CompletionRequest) -> Result<CompletionResponse, GatewayError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| GatewayError::Provider("semaphore closed".to_string()))?;

        let provider = &self.provider;
        let model = &request.model;
        let messages = &request.messages;
        let temperature = request.temperature;
        let timeout = self.retry.request_timeout;

        with_retry(&self.retry, || async move { provider.complete(model, messages, temperature, timeout).await }).await
    }
}

/// Convenience builder for a request, mirroring the invoke-by-fields shape
/// callers (agent stage, psychology stage, memory saver) all use.
pub fn request(model: impl Into<String>, messages: Vec<ChatMessage>, temperature: f32, query_class: QueryClass) -> CompletionRequest {
    CompletionRequest { model: model.into(), messages, temperature, query_class }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;

    fn gw(provider: MockProvider) -> LlmGateway {
        LlmGateway::new(Arc::new(provider), 100, 15, RetryConfig { max_retries: 2, request_timeout: std::time::Duration::from_secs(5) })
    }

    #[tokio::test]
    async fn cache_hit_skips_upstream_call() {
        let gateway = gw(MockProvider::new(Some("cached".to_string())));
        let req = request("m", vec![ChatMessage::user("hi")], 0.2, QueryClass::SimpleQuery);
        gateway.invoke(req.clone()).await.unwrap();
        gateway.invoke(req).await.unwrap();
        // Both calls resolve to the same cached text; the underlying
        // MockProvider records calls internally but the gateway itself
        // shouldn't need a second upstream round-trip — verified via cache len.
        assert_eq!(gateway.cache().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_identical_requests_coalesce() {
        let gateway = Arc::new(gw(MockProvider::new(Some("shared".to_string()))));
        let req = request("m", vec![ChatMessage::user("race")], 0.2, QueryClass::SimpleQuery);

        let g1 = gateway.clone();
        let r1 = req.clone();
        let g2 = gateway.clone();
        let r2 = req.clone();

        let (a, b) = tokio::join!(tokio::spawn(async move { g1.invoke(r1).await }), tokio::spawn(async move { g2.invoke(r2).await }));
        let a = a.unwrap().unwrap();
        let b = b.unwrap().unwrap();
        assert_eq!(a.text, b.text);
    }

    #[tokio::test]
    async fn retries_transient_failure_then_succeeds() {
        let gateway = gw(MockProvider::failing(1));
        let req = request("m", vec![ChatMessage::user("hi")], 0.2, QueryClass::SimpleQuery);
        let result = gateway.invoke(req).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn high_temperature_request_uses_capped_ttl() {
        let gateway = gw(MockProvider::new(Some("x".to_string())));
        let req = request("m", vec![ChatMessage::user("hi")], 0.95, QueryClass::SimpleQuery);
        gateway.invoke(req).await.unwrap();
        assert_eq!(gateway.cache().len(), 1);
    }
}
