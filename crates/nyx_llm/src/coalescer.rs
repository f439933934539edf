//! In-flight request coalescing (§4.4 layer 2, §9 design note): requests
//! sharing a cache key while one is already in flight attach to the same
//! completion instead of issuing a second upstream call. Grounded on the
//! design note's own recommendation — "a channel per in-flight entry that
//! is closed on completion" — implemented with a `HashMap<Key,
//! Vec<oneshot::Sender<...>>>` guarded by a `tokio::sync::Mutex`.

use crate::cache::CacheKey;
use crate::types::{CompletionResponse, GatewayError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

type Waiters = Vec<oneshot::Sender<Result<CompletionResponse, GatewayError>>>;

#[derive(Default)]
pub struct Coalescer {
    in_flight: Mutex<HashMap<CacheKey, Waiters>>,
    merged_requests: AtomicU64,
}

pub enum CoalesceRole {
    /// This caller is the first for `key`; it must perform the upstream
    /// call itself and then call [`Coalescer::complete`].
    Leader,
    /// Another caller is already in flight for `key`; await the receiver
    /// for the shared result instead of calling upstream.
    Follower(oneshot::Receiver<Result<CompletionResponse, GatewayError>>),
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the in-flight group for `key`. Returns `Leader` for the first
    /// caller (who must drive the upstream call), `Follower` for everyone
    /// after until `complete` is called.
    pub async fn join(self: &Arc<Self>, key: &CacheKey) -> CoalesceRole {
        let mut guard = self.in_flight.lock().await;
        match guard.get_mut(key) {
            Some(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                self.merged_requests.fetch_add(1, Ordering::Relaxed);
                CoalesceRole::Follower(rx)
            }
            None => {
                guard.insert(key.clone(), Vec::new());
                CoalesceRole::Leader
            }
        }
    }

    /// Drain and notify every follower waiting on `key` with the leader's
    /// result (identical result/exception semantics, §4.4).
    pub async fn complete(&self, key: &CacheKey, result: Result<CompletionResponse, GatewayError>) {
        let waiters = {
            let mut guard = self.in_flight.lock().await;
            guard.remove(key).unwrap_or_default()
        };
        for tx in waiters {
            let _ = tx.send(result.clone());
        }
    }

    pub fn merged_requests(&self) -> u64 {
        self.merged_requests.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_caller_is_leader_rest_are_followers() {
        let coalescer = Arc::new(Coalescer::new());
        let key = "k".to_string();

        match coalescer.join(&key).await {
            CoalesceRole::Leader => {}
            CoalesceRole::Follower(_) => panic!("first caller should be leader"),
        }

        let rx = match coalescer.join(&key).await {
            CoalesceRole::Leader => panic!("second caller should be follower"),
            CoalesceRole::Follower(rx) => rx,
        };

        coalescer.complete(&key, Ok(CompletionResponse { text: "shared".to_string() })).await;
        let result = rx.await.unwrap().unwrap();
        assert_eq!(result.text, "shared");
        assert_eq!(coalescer.merged_requests(), 1);
    }

    #[tokio::test]
    async fn all_followers_receive_identical_error() {
        let coalescer = Arc::new(Coalescer::new());
        let key = "k".to_string();
        let _leader = coalescer.join(&key).await;
        let rx1 = match coalescer.join(&key).await {
            CoalesceRole::Follower(rx) => rx,
            _ => unreachable!(),
        };
        let rx2 = match coalescer.join(&key).await {
            CoalesceRole::Follower(rx) => rx,
            _ => unreachable!(),
        };

        coalescer.complete(&key, Err(GatewayError::Connection("boom".to_string()))).await;
        assert!(rx1.await.unwrap().is_err());
        assert!(rx2.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn new_request_after_completion_becomes_leader_again() {
        let coalescer = Arc::new(Coalescer::new());
        let key = "k".to_string();
        let _ = coalescer.join(&key).await;
        coalescer.complete(&key, Ok(CompletionResponse { text: "done".to_string() })).await;

        match coalescer.join(&key).await {
            CoalesceRole::Leader => {}
            CoalesceRole::Follower(_) => panic!("should be a fresh leader after completion"),
        }
    }
}
