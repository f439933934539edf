//! Short-Term History (C9, §4.9): a single JSON document per session,
//! keyed by a sanitized session id. Grounded
//! on `mneme_memory::narrative` for the "serialize a running
//! log to disk, keyed by id" shape, adapted from SQLite rows to flat
//! per-session JSON files (§6: `history/<session_id>.json`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

const PRUNE_TRIGGER_LEN: usize = 15;
const PRUNE_TAKE: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionHistory {
    pub messages: Vec<HistoryMessage>,
    pub summary: String,
}

/// Summarizes a block of pruned-away messages into an updated running
/// summary. Implemented by `nyx_llm`'s gateway so this crate never depends
/// on it directly.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn update_summary(&self, prior_summary: &str, pruned: &[HistoryMessage]) -> Result<String>;
}

/// Receives pruned message blocks for potential long-term capture. One call
/// per prune, with the full block as context — never per-message.
#[async_trait]
pub trait MemorySaver: Send + Sync {
    async fn save_block(&self, session_id: &str, pruned: &[HistoryMessage]) -> Result<()>;
}

pub struct HistoryStore {
    root: PathBuf,
    /// One lock per session file, guarding read-modify-write races; created
    /// lazily the same way the relationship store's per-user table is.
    locks: Arc<Mutex<std::collections::HashMap<String, Arc<Mutex<()>>>>>,
}

impl HistoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), locks: Arc::new(Mutex::new(std::collections::HashMap::new())) }
    }

    fn path_for(&self, sanitized_session_id: &str) -> PathBuf {
        self.root.join(format!("{sanitized_session_id}.json"))
    }

    async fn session_lock(&self, sanitized_session_id: &str) -> Arc<Mutex<()>> {
        let mut table = self.locks.lock().await;
        table.entry(sanitized_session_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    pub async fn load(&self, sanitized_session_id: &str) -> Result<SessionHistory> {
        let path = self.path_for(sanitized_session_id);
        if !path.exists() {
            return Ok(SessionHistory::default());
        }
        let data = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read history file {}", path.display()))?;
        Ok(serde_json::from_str(&data).unwrap_or_default())
    }

    async fn save(&self, sanitized_session_id: &str, history: &SessionHistory) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_for(sanitized_session_id);
        let data = serde_json::to_string_pretty(history)?;
        tokio::fs::write(&path, data).await.with_context(|| format!("failed to write history file {}", path.display()))?;
        Ok(())
    }

    /// Appends `message`, then prunes if the log exceeds 15 entries: the
    /// oldest 10 are summarized into the running summary and forwarded to
    /// the memory saver, leaving the remainder plus the updated summary.
    pub async fn append_and_prune(
        &self,
        sanitized_session_id: &str,
        message: HistoryMessage,
        summarizer: &dyn Summarizer,
        memory_saver: &dyn MemorySaver,
    ) -> Result<SessionHistory> {
        let lock = self.session_lock(sanitized_session_id).await;
        let _guard = lock.lock().await;

        let mut history = self.load(sanitized_session_id).await?;
        history.messages.push(message);

        if history.messages.len() > PRUNE_TRIGGER_LEN {
            let pruned: Vec<HistoryMessage> = history.messages.drain(..PRUNE_TAKE).collect();
            match summarizer.update_summary(&history.summary, &pruned).await {
                Ok(new_summary) => history.summary = new_summary,
                Err(e) => {
                    tracing::warn!(error = %e, "summary update failed, keeping prior summary");
                }
            }
            if let Err(e) = memory_saver.save_block(sanitized_session_id, &pruned).await {
                tracing::warn!(error = %e, "forwarding pruned history block to memory saver failed");
            }
        }

        self.save(sanitized_session_id, &history).await?;
        Ok(history)
    }
}

/// Replaces characters unsafe for a filesystem path component, matching
/// `nyx_core::ids::SessionId::sanitized`.
pub fn sanitize_session_id(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

#[allow(dead_code)]
fn _assert_path_is_file(p: &Path) -> bool {
    p.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoSummarizer;
    #[async_trait]
    impl Summarizer for EchoSummarizer {
        async fn update_summary(&self, prior: &str, pruned: &[HistoryMessage]) -> Result<String> {
            Ok(format!("{prior} + {} pruned", pruned.len()))
        }
    }

    struct NullSaver {
        calls: Arc<tokio::sync::Mutex<Vec<usize>>>,
    }
    #[async_trait]
    impl MemorySaver for NullSaver {
        async fn save_block(&self, _session_id: &str, pruned: &[HistoryMessage]) -> Result<()> {
            self.calls.lock().await.push(pruned.len());
            Ok(())
        }
    }

    fn msg(content: &str) -> HistoryMessage {
        HistoryMessage { role: "user".to_string(), content: content.to_string(), timestamp: chrono::Utc::now() }
    }

    #[tokio::test]
    async fn load_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let h = store.load("nope").await.unwrap();
        assert!(h.messages.is_empty());
    }

    #[tokio::test]
    async fn append_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let summarizer = EchoSummarizer;
        let saver = NullSaver { calls: Arc::new(tokio::sync::Mutex::new(Vec::new())) };
        store.append_and_prune("s1", msg("hi"), &summarizer, &saver).await.unwrap();
        let h = store.load("s1").await.unwrap();
        assert_eq!(h.messages.len(), 1);
    }

    #[tokio::test]
    async fn prunes_oldest_ten_once_over_fifteen() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let summarizer = EchoSummarizer;
        let calls = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let saver = NullSaver { calls: calls.clone() };

        let mut last = SessionHistory::default();
        for i in 0..16 {
            last = store.append_and_prune("s1", msg(&format!("m{i}")), &summarizer, &saver).await.unwrap();
        }
        assert_eq!(last.messages.len(), 6);
        assert!(last.summary.contains("10 pruned"));
        assert_eq!(*calls.lock().await, vec![10]);
    }

    #[test]
    fn sanitize_replaces_unsafe_chars() {
        assert_eq!(sanitize_session_id("group:123/45"), "group_123_45");
    }
}
