//! The Affect Store (C1): a single-writer, many-reader process-wide handle
//! onto [`Affect`], grounded on `LimbicSystem`'s
//! `Arc<RwLock<OrganismState>>` pattern — cheap reads via a snapshot clone,
//! a short critical section for writes.

use crate::affect::{Affect, AffectDelta};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct AffectStore {
    inner: Arc<RwLock<Affect>>,
}

impl Default for AffectStore {
    fn default() -> Self {
        Self::new(Affect::default())
    }
}

impl AffectStore {
    pub fn new(initial: Affect) -> Self {
        Self { inner: Arc::new(RwLock::new(initial)) }
    }

    /// Cheap lock-and-clone snapshot for readers (System 2 context
    /// injection, the proactive scheduler's gates, tests).
    pub async fn snapshot(&self) -> Affect {
        self.inner.read().await.clone()
    }

    /// Apply a bounded delta. Never fails (§4.1: "fail-closed: never
    /// reject, clamp silently").
    pub async fn update(&self, delta: AffectDelta) -> Affect {
        let mut guard = self.inner.write().await;
        guard.apply_update(&delta);
        guard.clone()
    }

    /// Directly credit stamina without touching the EMA-smoothed fields —
    /// used by the Dream Consolidator (§4.8) after a successful work cycle.
    pub async fn credit_stamina(&self, amount: f32) {
        let mut guard = self.inner.write().await;
        guard.stamina = (guard.stamina + amount).clamp(0.0, 100.0);
        guard.last_updated = chrono::Utc::now();
    }
}
