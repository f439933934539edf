//! Active-session registry (§4.7 input): "for each session recently seen by
//! the Ingress (within 12h)". The orchestrator records every session it
//! actually sees inbound traffic for here; the Proactive Scheduler scans the
//! registry each tick instead of re-deriving "recently active" from disk.

use chrono::{DateTime, Utc};
use nyx_core::{SessionId, UserId};
use nyx_onebot::MessageKind;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub session_kind: MessageKind,
    pub group_id: Option<i64>,
    pub sender_display_name: String,
    pub last_seen: DateTime<Utc>,
}

/// Keyed by the sanitized session id so it lines up with the history
/// store's and the session-lock table's keys.
#[derive(Default)]
pub struct ActiveSessionRegistry {
    sessions: Mutex<HashMap<String, SessionMeta>>,
}

impl ActiveSessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn record(&self, meta: SessionMeta) {
        self.sessions.lock().await.insert(meta.session_id.sanitized(), meta);
    }

    /// Sessions with a recorded sighting within `window` of now.
    pub async fn active_within(&self, window: chrono::Duration) -> Vec<SessionMeta> {
        let now = Utc::now();
        self.sessions.lock().await.values().filter(|m| now - m.last_seen <= window).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str, seconds_ago: i64) -> SessionMeta {
        SessionMeta {
            session_id: SessionId::from(id),
            user_id: UserId::from("u1"),
            session_kind: MessageKind::Private,
            group_id: None,
            sender_display_name: "alice".to_string(),
            last_seen: Utc::now() - chrono::Duration::seconds(seconds_ago),
        }
    }

    #[tokio::test]
    async fn active_within_excludes_stale_sessions() {
        let registry = ActiveSessionRegistry::new();
        registry.record(meta("fresh", 60)).await;
        registry.record(meta("stale", 3600 * 20)).await;

        let active = registry.active_within(chrono::Duration::hours(12)).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, SessionId::from("fresh"));
    }

    #[tokio::test]
    async fn recording_the_same_session_again_overwrites_last_seen() {
        let registry = ActiveSessionRegistry::new();
        registry.record(meta("s1", 3600 * 20)).await;
        registry.record(meta("s1", 10)).await;
        assert_eq!(registry.len().await, 1);
        let active = registry.active_within(chrono::Duration::hours(12)).await;
        assert_eq!(active.len(), 1);
    }
}
