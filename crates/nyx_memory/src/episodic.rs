//! Episodic Memory (C3, §4.3): free-form text about a user or interaction,
//! embedded and ranked by a blended score rather than raw similarity alone.
//! Grounded on `mneme_memory::sqlite::SqliteMemory` for the
//! table shape and on its `embedding::cosine_similarity` for the semantic
//! delete path — `sqlite-vec` itself is dropped (see crate-level docs in
//! `db.rs` and `DESIGN.md`); ranking scans the table and scores in Rust.

use crate::db;
use crate::embedding::{cosine_similarity, distance, Embedder};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    UserProfile,
    ChatHistory,
    Interaction,
    System,
}

impl Source {
    fn default_boost(self) -> f32 {
        match self {
            Source::UserProfile => 1.8,
            Source::ChatHistory => 1.3,
            Source::Interaction => 1.0,
            Source::System => 0.9,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Source::UserProfile => "user_profile",
            Source::ChatHistory => "chat_history",
            Source::Interaction => "interaction",
            Source::System => "system",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "user_profile" => Source::UserProfile,
            "chat_history" => Source::ChatHistory,
            "system" => Source::System,
            _ => Source::Interaction,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub user_id: String,
    pub text: String,
    pub category: String,
    pub importance: i32,
    pub source: Source,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub struct EpisodicMemory {
    pool: Pool<Sqlite>,
    embedder: Arc<dyn Embedder>,
    /// Serializes all mutators on this collection (§4.3: "all mutators hold
    /// a writer mutex on the collection"). Reads do not take this lock.
    writer: Arc<Mutex<()>>,
}

impl EpisodicMemory {
    pub async fn new(pool: Pool<Sqlite>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS episodic_memories (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                text TEXT NOT NULL,
                category TEXT NOT NULL,
                importance INTEGER NOT NULL,
                source TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .context("failed to create episodic_memories table")?;
        Ok(Self { pool, embedder, writer: Arc::new(Mutex::new(())) })
    }

    /// Derives a stable id from `(user_id, text)` so re-inserting identical
    /// text always resolves to the same row (§3: "id uniquely identifies
    /// text within a collection" / "stable across re-insertion").
    fn derive_id(user_id: &str, text: &str) -> String {
        let mut name = Vec::with_capacity(user_id.len() + text.len() + 1);
        name.extend_from_slice(user_id.as_bytes());
        name.push(0u8);
        name.extend_from_slice(text.as_bytes());
        Uuid::new_v5(&Uuid::NAMESPACE_OID, &name).to_string()
    }

    pub async fn add_texts(
        &self,
        user_id: &str,
        texts: &[String],
        category: &str,
        importance: i32,
        source: Source,
    ) -> Result<Vec<String>> {
        let _guard = self.writer.lock().await;
        let embeddings = self.embedder.embed_batch(texts)?;
        let mut ids = Vec::with_capacity(texts.len());
        for (text, embedding) in texts.iter().zip(embeddings) {
            let id = Self::derive_id(user_id, text);
            let blob = db::encode_embedding(&embedding);
            let now = chrono::Utc::now();
            sqlx::query(
                "INSERT INTO episodic_memories
                 (id, user_id, text, category, importance, source, embedding, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO NOTHING",
            )
            .bind(&id)
            .bind(user_id)
            .bind(text)
            .bind(category)
            .bind(importance.clamp(1, 5))
            .bind(source.as_str())
            .bind(&blob)
            .bind(now.timestamp())
            .execute(&self.pool)
            .await
            .context("failed to insert episodic memory")?;
            ids.push(id);
        }
        Ok(ids)
    }

    async fn load_user_rows(&self, user_id: &str) -> Result<Vec<(MemoryEntry, Vec<f32>)>> {
        let rows = sqlx::query(
            "SELECT id, user_id, text, category, importance, source, embedding, created_at
             FROM episodic_memories WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to query episodic_memories")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let created_ts: i64 = row.try_get("created_at")?;
            let entry = MemoryEntry {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                text: row.try_get("text")?,
                category: row.try_get("category")?,
                importance: row.try_get("importance")?,
                source: Source::parse(row.try_get::<String, _>("source")?.as_str()),
                created_at: chrono::DateTime::from_timestamp(created_ts, 0).unwrap_or_else(chrono::Utc::now),
            };
            let embedding = db::decode_embedding(row.try_get::<Vec<u8>, _>("embedding")?.as_slice());
            out.push((entry, embedding));
        }
        Ok(out)
    }

    /// §4.3 ranking formula.
    fn score(
        query_embedding: &[f32],
        candidate_embedding: &[f32],
        entry: &MemoryEntry,
        query_text: &str,
        now: chrono::DateTime<chrono::Utc>,
        source_overrides: &HashMap<Source, f32>,
    ) -> f32 {
        let dist = distance(query_embedding, candidate_embedding);
        let semantic = 1.0 / (1.0 + dist);

        let delta_hours = (now - entry.created_at).num_seconds() as f32 / 3600.0;
        let delta_hours = delta_hours.max(0.0);
        let time_decay = if delta_hours < 24.0 {
            0.5f32.powf(delta_hours / 96.0).max(0.2)
        } else {
            0.5f32.powf(delta_hours / 48.0).max(0.2)
        };

        let importance_boost = 1.0 + entry.importance as f32 * 0.3;
        let source_boost = source_overrides
            .get(&entry.source)
            .copied()
            .unwrap_or_else(|| entry.source.default_boost());
        let keyword_bonus = if !query_text.is_empty() && entry.text.contains(query_text) { 1.1 } else { 1.0 };

        semantic * time_decay * importance_boost * source_boost * keyword_bonus
    }

    /// Candidate pool `k*5`, dedup by text, post-filter by category and
    /// `importance >= importance_threshold`, return the top-`k` texts.
    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        k: usize,
        categories: Option<&[String]>,
        source_overrides: Option<&HashMap<Source, f32>>,
        importance_threshold: i32,
    ) -> Result<Vec<String>> {
        let query_embedding = self.embedder.embed(query)?;
        let rows = self.load_user_rows(user_id).await?;
        let now = chrono::Utc::now();
        let overrides = source_overrides.cloned().unwrap_or_default();

        let mut scored: Vec<(f32, MemoryEntry)> = rows
            .into_iter()
            .filter(|(entry, _)| entry.importance >= importance_threshold)
            .filter(|(entry, _)| categories.map(|cats| cats.iter().any(|c| c == &entry.category)).unwrap_or(true))
            .map(|(entry, emb)| {
                let s = Self::score(&query_embedding, &emb, &entry, query, now, &overrides);
                (s, entry)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k * 5);

        let mut seen_text = std::collections::HashSet::new();
        let mut out = Vec::with_capacity(k);
        for (_, entry) in scored {
            if seen_text.insert(entry.text.clone()) {
                out.push(entry.text);
                if out.len() == k {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Embed `query`, fetch nearest candidates for `user_id`, delete entries
    /// whose cosine similarity to the query exceeds `threshold`.
    pub async fn delete_by_semantic(&self, user_id: &str, query: &str, threshold: f32) -> Result<usize> {
        let _guard = self.writer.lock().await;
        let query_embedding = self.embedder.embed(query)?;
        let rows = self.load_user_rows(user_id).await?;
        let mut deleted = 0usize;
        for (entry, embedding) in rows {
            if cosine_similarity(&query_embedding, &embedding) > threshold {
                sqlx::query("DELETE FROM episodic_memories WHERE id = ?")
                    .bind(&entry.id)
                    .execute(&self.pool)
                    .await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    pub async fn delete(&self, ids: &[String]) -> Result<()> {
        let _guard = self.writer.lock().await;
        for id in ids {
            sqlx::query("DELETE FROM episodic_memories WHERE id = ?").bind(id).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn clear_all(&self, user_id: &str) -> Result<()> {
        let _guard = self.writer.lock().await;
        sqlx::query("DELETE FROM episodic_memories WHERE user_id = ?").bind(user_id).execute(&self.pool).await?;
        Ok(())
    }

    /// §4.3 periodic cleanup: drop entries older than 30 days, then sample
    /// up to 10 documents and collapse near-duplicates at `threshold=0.9`.
    pub async fn periodic_cleanup(&self, user_id: &str) -> Result<()> {
        {
            let _guard = self.writer.lock().await;
            let cutoff = (chrono::Utc::now() - chrono::Duration::days(30)).timestamp();
            sqlx::query("DELETE FROM episodic_memories WHERE user_id = ? AND created_at < ?")
                .bind(user_id)
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        }

        let rows = self.load_user_rows(user_id).await?;
        use rand::seq::SliceRandom;
        let mut sample: Vec<_> = rows.into_iter().collect();
        let mut rng = rand::thread_rng();
        sample.shuffle(&mut rng);
        sample.truncate(10);
        for (entry, _) in sample {
            self.delete_by_semantic(user_id, &entry.text, 0.9).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;

    async fn memory() -> EpisodicMemory {
        let pool = db::open_pool(":memory:").await.unwrap();
        EpisodicMemory::new(pool, Arc::new(HashEmbedder::new(32))).await.unwrap()
    }

    #[tokio::test]
    async fn add_and_search_roundtrips() {
        let mem = memory().await;
        mem.add_texts("u1", &["用户喜欢猫".to_string()], "likes", 3, Source::Interaction).await.unwrap();
        let results = mem.search("u1", "猫", 5, None, None, 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].contains("猫"));
    }

    #[tokio::test]
    async fn importance_threshold_filters_out_low_importance() {
        let mem = memory().await;
        mem.add_texts("u1", &["low importance fact".to_string()], "misc", 1, Source::System).await.unwrap();
        let results = mem.search("u1", "fact", 5, None, None, 3).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn category_filter_excludes_other_categories() {
        let mem = memory().await;
        mem.add_texts("u1", &["a dislike".to_string()], "dislikes", 3, Source::Interaction).await.unwrap();
        let results = mem.search("u1", "dislike", 5, Some(&["likes".to_string()]), None, 1).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn score_prefers_moderate_importance_recent_over_extremes() {
        // importance 1/3/5 at ages 3d/1d/7d: importance=3,age=1d should win.
        let mem = memory().await;
        let entries = [
            ("old important", 5, 7),
            ("mid fresh", 3, 1),
            ("young trivial", 1, 0),
        ];
        for (text, importance, _age_days) in entries {
            mem.add_texts("u1", &[text.to_string()], "cat", importance, Source::Interaction).await.unwrap();
        }
        // Backdate created_at directly since all three share near-identical embeddings.
        let pool = mem.pool.clone();
        sqlx::query("UPDATE episodic_memories SET created_at = ? WHERE text = ?")
            .bind((chrono::Utc::now() - chrono::Duration::days(7)).timestamp())
            .bind("old important")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("UPDATE episodic_memories SET created_at = ? WHERE text = ?")
            .bind((chrono::Utc::now() - chrono::Duration::days(1)).timestamp())
            .bind("mid fresh")
            .execute(&pool)
            .await
            .unwrap();

        let results = mem.search("u1", "cat", 3, None, None, 1).await.unwrap();
        assert_eq!(results[0], "mid fresh");
    }

    #[tokio::test]
    async fn delete_by_semantic_removes_similar_entries() {
        let mem = memory().await;
        mem.add_texts("u1", &["exact duplicate phrase".to_string()], "cat", 2, Source::Interaction).await.unwrap();
        let deleted = mem.delete_by_semantic("u1", "exact duplicate phrase", 0.3).await.unwrap();
        assert_eq!(deleted, 1);
        let remaining = mem.search("u1", "exact duplicate phrase", 5, None, None, 1).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn dedup_by_text_collapses_identical_entries() {
        let mem = memory().await;
        mem.add_texts("u1", &["same text".to_string(), "same text".to_string()], "cat", 2, Source::Interaction)
            .await
            .unwrap();
        let results = mem.search("u1", "same text", 5, None, None, 1).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn id_is_stable_across_reinsertion_of_identical_text() {
        let mem = memory().await;
        let first = mem.add_texts("u1", &["a stable fact".to_string()], "cat", 2, Source::Interaction).await.unwrap();
        let second = mem.add_texts("u1", &["a stable fact".to_string()], "cat", 4, Source::Interaction).await.unwrap();
        assert_eq!(first, second);
        let results = mem.search("u1", "a stable fact", 5, None, None, 1).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn id_differs_across_users_for_identical_text() {
        let mem = memory().await;
        let a = mem.add_texts("u1", &["shared phrasing".to_string()], "cat", 2, Source::Interaction).await.unwrap();
        let b = mem.add_texts("u2", &["shared phrasing".to_string()], "cat", 2, Source::Interaction).await.unwrap();
        assert_ne!(a, b);
    }
}
