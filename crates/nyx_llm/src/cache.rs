//! LLM response cache (§4.4 layer 1): keyed by a hash of
//! `(serialized_messages, model, temperature, query_class)`, per-query-class
//! TTL, LRU eviction at `max_size`. Grounded on the `lru` crate — the
//! corpus's `aigent` workspace already depends on it for exactly this "cap a
//! map at N entries, evict least-recently-used" shape, so this port adopts
//! it rather than hand-rolling an intrusive list.

use crate::types::{ChatMessage, CompletionResponse, QueryClass};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub type CacheKey = String;

pub fn cache_key(messages: &[ChatMessage], model: &str, temperature: f32, query_class: QueryClass) -> CacheKey {
    let mut hasher = Sha256::new();
    for m in messages {
        hasher.update(format!("{:?}:{}", m.role, m.content));
    }
    hasher.update(model.as_bytes());
    hasher.update(temperature.to_bits().to_le_bytes());
    hasher.update(format!("{query_class:?}").as_bytes());
    format!("{:x}", hasher.finalize())
}

struct Entry {
    response: CompletionResponse,
    expires_at: Instant,
}

/// A snapshot-friendly representation of a single entry, using wall-clock
/// epoch seconds instead of `Instant` (which cannot cross a process
/// boundary) — the shape written to `cache/llm.bin`.
#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    key: String,
    response: CompletionResponse,
    expires_at_epoch_secs: u64,
}

pub struct LlmCache {
    inner: Mutex<LruCache<CacheKey, Entry>>,
}

impl LlmCache {
    pub fn new(max_size: usize) -> Self {
        Self { inner: Mutex::new(LruCache::new(NonZeroUsize::new(max_size.max(1)).unwrap())) }
    }

    /// §4.4: "results for `temperature > 0.8` are capped at <= 10 min TTL
    /// regardless of class."
    pub fn effective_ttl(query_class: QueryClass, temperature: f32) -> Duration {
        let base = query_class.default_ttl();
        if temperature > 0.8 {
            base.min(Duration::from_secs(600))
        } else {
            base
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<CompletionResponse> {
        let mut guard = self.inner.lock().unwrap();
        match guard.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.response.clone()),
            Some(_) => {
                guard.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: CacheKey, response: CompletionResponse, ttl: Duration) {
        let mut guard = self.inner.lock().unwrap();
        guard.put(key, Entry { response, expires_at: Instant::now() + ttl });
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Periodic snapshot to disk via `bincode` (§4.4). `Instant` doesn't
    /// survive a process restart, so entries are translated to epoch
    /// seconds; anything already expired is skipped.
    pub fn snapshot_to_disk(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let guard = self.inner.lock().unwrap();
        let now_instant = Instant::now();
        let now_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let mut entries = Vec::new();
        for (key, entry) in guard.iter() {
            if entry.expires_at <= now_instant {
                continue;
            }
            let remaining = entry.expires_at.duration_since(now_instant).as_secs();
            entries.push(SnapshotEntry {
                key: key.clone(),
                response: entry.response.clone(),
                expires_at_epoch_secs: now_epoch + remaining,
            });
        }
        drop(guard);
        let bytes = bincode::serialize(&entries)?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load_from_disk(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(());
        }
        let bytes = std::fs::read(path)?;
        let entries: Vec<SnapshotEntry> = bincode::deserialize(&bytes)?;
        let now_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let now_instant = Instant::now();
        let mut guard = self.inner.lock().unwrap();
        for entry in entries {
            if entry.expires_at_epoch_secs <= now_epoch {
                continue;
            }
            let remaining = Duration::from_secs(entry.expires_at_epoch_secs - now_epoch);
            guard.put(entry.key, Entry { response: entry.response, expires_at: now_instant + remaining });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs() -> Vec<ChatMessage> {
        vec![ChatMessage::user("hi")]
    }

    #[test]
    fn identical_inputs_produce_identical_keys() {
        let k1 = cache_key(&msgs(), "m", 0.5, QueryClass::SimpleQuery);
        let k2 = cache_key(&msgs(), "m", 0.5, QueryClass::SimpleQuery);
        assert_eq!(k1, k2);
    }

    #[test]
    fn different_query_class_changes_key() {
        let k1 = cache_key(&msgs(), "m", 0.5, QueryClass::SimpleQuery);
        let k2 = cache_key(&msgs(), "m", 0.5, QueryClass::ComplexQuery);
        assert_ne!(k1, k2);
    }

    #[test]
    fn get_put_roundtrip() {
        let cache = LlmCache::new(10);
        let key = cache_key(&msgs(), "m", 0.5, QueryClass::SimpleQuery);
        cache.put(key.clone(), CompletionResponse { text: "hello".to_string() }, Duration::from_secs(60));
        assert_eq!(cache.get(&key).unwrap().text, "hello");
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let cache = LlmCache::new(10);
        let key = "k".to_string();
        cache.put(key.clone(), CompletionResponse { text: "x".to_string() }, Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn lru_eviction_removes_least_recently_used() {
        let cache = LlmCache::new(2);
        cache.put("a".to_string(), CompletionResponse { text: "a".to_string() }, Duration::from_secs(60));
        cache.put("b".to_string(), CompletionResponse { text: "b".to_string() }, Duration::from_secs(60));
        // touch "a" so "b" becomes least-recently-used
        let _ = cache.get(&"a".to_string());
        cache.put("c".to_string(), CompletionResponse { text: "c".to_string() }, Duration::from_secs(60));
        assert!(cache.get(&"b".to_string()).is_none());
        assert!(cache.get(&"a".to_string()).is_some());
        assert!(cache.get(&"c".to_string()).is_some());
    }

    #[test]
    fn high_temperature_caps_ttl_at_ten_minutes() {
        let ttl = LlmCache::effective_ttl(QueryClass::SimpleQuery, 0.9);
        assert_eq!(ttl, Duration::from_secs(600));
    }

    #[test]
    fn low_temperature_uses_class_default() {
        let ttl = LlmCache::effective_ttl(QueryClass::SimpleQuery, 0.2);
        assert_eq!(ttl, Duration::from_secs(3600));
    }

    #[test]
    fn snapshot_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llm.bin");
        let cache = LlmCache::new(10);
        let key = cache_key(&msgs(), "m", 0.5, QueryClass::SimpleQuery);
        cache.put(key.clone(), CompletionResponse { text: "persisted".to_string() }, Duration::from_secs(3600));
        cache.snapshot_to_disk(&path).unwrap();

        let reloaded = LlmCache::new(10);
        reloaded.load_from_disk(&path).unwrap();
        assert_eq!(reloaded.get(&key).unwrap().text, "persisted");
    }
}
