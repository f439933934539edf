//! Exponential-backoff retry (§4.4 layer 4), generalized from
//! `mneme_reasoning::retry::with_retry` — that version is typed
//! around `reqwest::Response`; this one retries any fallible async
//! operation, since the gateway's "upstream call" is provider-agnostic.

use crate::types::GatewayError;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 2, request_timeout: Duration::from_secs(60) }
    }
}

/// Retries `operation` up to `max_retries` additional times (so
/// `max_retries + 1` total attempts) on retriable errors only, with
/// `2^n`-second backoff between attempts. Non-retriable errors propagate
/// immediately (§4.4: "Non-retriable exceptions propagate immediately").
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, GatewayError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retriable() && attempt < config.max_retries => {
                let backoff = Duration::from_secs(2u64.pow(attempt));
                tracing::warn!(attempt, ?backoff, error = %e, "retriable llm error, backing off");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_retriable_failures() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig { max_retries: 2, request_timeout: Duration::from_secs(1) };
        let result = with_retry(&config, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(GatewayError::Connection("transient".to_string()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retriable_error_propagates_immediately() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();
        let result: Result<i32, _> = with_retry(&config, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(GatewayError::UpstreamClientError("bad request".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_retries_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig { max_retries: 2, request_timeout: Duration::from_secs(1) };
        let result: Result<i32, _> = with_retry(&config, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(GatewayError::Connection("always fails".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
