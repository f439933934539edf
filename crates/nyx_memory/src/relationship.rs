//! The Relationship Store (C2, §3, §4.2): a per-user profile persisted to
//! SQLite. Each profile is stored as a single JSON document keyed by user
//! id — `sqlite.rs` takes the same "one row, one JSON blob"
//! shape for its narrative chapters and self-knowledge entries rather than
//! normalizing every nested collection into its own table.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommunicationStyle {
    Casual,
    Formal,
    Playful,
}

impl Default for CommunicationStyle {
    fn default() -> Self {
        CommunicationStyle::Casual
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPoint {
    pub category: String,
    pub content: String,
    pub weight: f32,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionHabit {
    pub habit: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentSample {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub sentiment: f32,
    pub intensity: f32,
}

const SENTIMENT_TREND_CAP: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub current_name: String,
    pub intimacy: i32,
    pub familiarity: i32,
    pub trust: i32,
    pub interest_match: i32,
    pub tags: HashSet<String>,
    pub notes: String,
    pub nickname: String,
    pub memory_points: Vec<MemoryPoint>,
    pub expression_habits: Vec<ExpressionHabit>,
    pub group_nicknames: HashMap<String, String>,
    pub communication_style: CommunicationStyle,
    pub favorite_topics: HashSet<String>,
    pub avoid_topics: HashSet<String>,
    pub interaction_patterns: HashMap<String, f32>,
    pub sentiment_trends: VecDeque<SentimentSample>,
    pub last_interaction_time: chrono::DateTime<chrono::Utc>,
}

impl Profile {
    fn new(user_id: &str, name: &str) -> Self {
        let now = chrono::Utc::now();
        Self {
            user_id: user_id.to_string(),
            current_name: name.to_string(),
            intimacy: 10,
            familiarity: 10,
            trust: 10,
            interest_match: 50,
            tags: HashSet::new(),
            notes: String::new(),
            nickname: String::new(),
            memory_points: Vec::new(),
            expression_habits: Vec::new(),
            group_nicknames: HashMap::new(),
            communication_style: CommunicationStyle::default(),
            favorite_topics: HashSet::new(),
            avoid_topics: HashSet::new(),
            interaction_patterns: HashMap::new(),
            sentiment_trends: VecDeque::new(),
            last_interaction_time: now,
        }
    }

    fn push_sentiment(&mut self, sample: SentimentSample) {
        self.sentiment_trends.push_back(sample);
        while self.sentiment_trends.len() > SENTIMENT_TREND_CAP {
            self.sentiment_trends.pop_front();
        }
    }
}

/// Bounded per-dimension update. Each field clamps to `[0, 100]` on apply
/// (§4.2: "clamps each target").
#[derive(Debug, Clone, Default)]
pub struct DimensionDelta {
    pub intimacy: i32,
    pub familiarity: i32,
    pub trust: i32,
    pub interest_match: i32,
}

#[derive(Clone)]
pub struct RelationshipStore {
    pool: Pool<Sqlite>,
    /// Per-user serialization point (§4.2: "all writes go through a
    /// per-user serialization point"). Creation of a new entry is itself
    /// guarded by `creation_lock` so two concurrent first-touches of the
    /// same user id cannot both slip past the `contains_key` check — the
    /// lazy-init race flagged as an Open Question in §9.
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl RelationshipStore {
    pub async fn new(pool: Pool<Sqlite>) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_profiles (
                user_id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .context("failed to create user_profiles table")?;
        Ok(Self { pool, locks: Arc::new(Mutex::new(HashMap::new())) })
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut table = self.locks.lock().await;
        table
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load_raw(&self, user_id: &str) -> Result<Option<Profile>> {
        let row = sqlx::query("SELECT data FROM user_profiles WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to query user_profiles")?;
        match row {
            Some(r) => {
                let data: String = r.try_get("data")?;
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }

    async fn save_raw(&self, profile: &Profile) -> Result<()> {
        let data = serde_json::to_string(profile)?;
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO user_profiles (user_id, data, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        )
        .bind(&profile.user_id)
        .bind(&data)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("failed to persist user profile")?;
        Ok(())
    }

    /// Fetch the profile for `user_id`, auto-creating it on first touch and
    /// refreshing the cached display name if `current_name` is provided.
    pub async fn get(&self, user_id: &str, current_name: Option<&str>) -> Result<Profile> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let mut profile = match self.load_raw(user_id).await? {
            Some(p) => p,
            None => Profile::new(user_id, current_name.unwrap_or(user_id)),
        };
        if let Some(name) = current_name {
            if profile.current_name != name {
                profile.current_name = name.to_string();
            }
        }
        self.save_raw(&profile).await?;
        Ok(profile)
    }

    pub async fn update_dimensions(&self, user_id: &str, delta: DimensionDelta) -> Result<Profile> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let mut profile = self.load_raw(user_id).await?.unwrap_or_else(|| Profile::new(user_id, user_id));
        profile.intimacy = (profile.intimacy + delta.intimacy).clamp(0, 100);
        profile.familiarity = (profile.familiarity + delta.familiarity).clamp(0, 100);
        profile.trust = (profile.trust + delta.trust).clamp(0, 100);
        profile.interest_match = (profile.interest_match + delta.interest_match).clamp(0, 100);
        profile.last_interaction_time = chrono::Utc::now();
        self.save_raw(&profile).await?;
        Ok(profile)
    }

    /// §4.2 memory-point weight formula.
    pub fn compute_memory_point_weight(content: &str, interactions: u32, recency_days: f32) -> f32 {
        let base = 1.0f32;
        let length_factor = (1.0 + content.chars().count() as f32 / 100.0).min(2.0);
        let interaction_factor = (1.0 + interactions as f32 * 0.5).min(3.0);
        let recency_factor = (1.0 - (recency_days - 1.0) * 0.1).max(0.1);
        let weight = base * length_factor * interaction_factor * recency_factor;
        (weight * 100.0).round() / 100.0
    }

    pub async fn add_memory_point(
        &self,
        user_id: &str,
        category: &str,
        content: &str,
        interactions: u32,
        recency_days: f32,
    ) -> Result<()> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let mut profile = self.load_raw(user_id).await?.unwrap_or_else(|| Profile::new(user_id, user_id));
        let weight = Self::compute_memory_point_weight(content, interactions, recency_days);
        profile.memory_points.push(MemoryPoint {
            category: category.to_string(),
            content: content.to_string(),
            weight,
            created_at: chrono::Utc::now(),
        });
        self.save_raw(&profile).await
    }

    /// Deduplicated by habit string; confidence overwritten on re-insert.
    pub async fn add_expression_habit(&self, user_id: &str, habit: &str, confidence: f32) -> Result<()> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let mut profile = self.load_raw(user_id).await?.unwrap_or_else(|| Profile::new(user_id, user_id));
        let confidence = confidence.clamp(0.0, 1.0);
        if let Some(existing) = profile.expression_habits.iter_mut().find(|h| h.habit == habit) {
            existing.confidence = confidence;
        } else {
            profile.expression_habits.push(ExpressionHabit { habit: habit.to_string(), confidence });
        }
        self.save_raw(&profile).await
    }

    pub async fn add_group_nickname(&self, user_id: &str, group_id: &str, nickname: &str) -> Result<()> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let mut profile = self.load_raw(user_id).await?.unwrap_or_else(|| Profile::new(user_id, user_id));
        profile.group_nicknames.insert(group_id.to_string(), nickname.to_string());
        self.save_raw(&profile).await
    }

    pub async fn record_sentiment(&self, user_id: &str, sentiment: f32, intensity: f32) -> Result<()> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let mut profile = self.load_raw(user_id).await?.unwrap_or_else(|| Profile::new(user_id, user_id));
        profile.push_sentiment(SentimentSample {
            timestamp: chrono::Utc::now(),
            sentiment: sentiment.clamp(-1.0, 1.0),
            intensity: intensity.clamp(0.0, 1.0),
        });
        self.save_raw(&profile).await
    }

    /// Sample up to `n` random memory points, optionally filtered by
    /// category. Read-only; does not require the per-user lock.
    pub async fn get_random_memory_points(
        &self,
        user_id: &str,
        category: Option<&str>,
        n: usize,
    ) -> Result<Vec<MemoryPoint>> {
        use rand::seq::SliceRandom;
        let profile = self.load_raw(user_id).await?;
        let Some(profile) = profile else { return Ok(Vec::new()) };
        let mut candidates: Vec<MemoryPoint> = profile
            .memory_points
            .into_iter()
            .filter(|p| category.map(|c| p.category == c).unwrap_or(true))
            .collect();
        let mut rng = rand::thread_rng();
        candidates.shuffle(&mut rng);
        candidates.truncate(n);
        Ok(candidates)
    }

    /// All user ids with a persisted profile, for the vector-cleanup ticker
    /// to sweep episodic memory per user (§4.3's periodic cleanup is scoped
    /// per `user_id`, so the caller needs the full set to cover everyone).
    pub async fn all_user_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT user_id FROM user_profiles")
            .fetch_all(&self.pool)
            .await
            .context("failed to list user_profiles")?;
        rows.into_iter().map(|r| r.try_get::<String, _>("user_id").map_err(Into::into)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> RelationshipStore {
        let pool = crate::db::open_pool(":memory:").await.unwrap();
        RelationshipStore::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn get_auto_creates_profile() {
        let store = store().await;
        let profile = store.get("u1", Some("Alice")).await.unwrap();
        assert_eq!(profile.current_name, "Alice");
        assert_eq!(profile.intimacy, 10);
    }

    #[tokio::test]
    async fn update_dimensions_clamps_to_range() {
        let store = store().await;
        store.get("u1", None).await.unwrap();
        let profile = store
            .update_dimensions("u1", DimensionDelta { intimacy: 1000, familiarity: -1000, trust: 0, interest_match: 0 })
            .await
            .unwrap();
        assert_eq!(profile.intimacy, 100);
        assert_eq!(profile.familiarity, 0);
    }

    #[tokio::test]
    async fn sentiment_trend_caps_at_100() {
        let store = store().await;
        store.get("u1", None).await.unwrap();
        for _ in 0..150 {
            store.record_sentiment("u1", 0.5, 0.5).await.unwrap();
        }
        let profile = store.get("u1", None).await.unwrap();
        assert_eq!(profile.sentiment_trends.len(), SENTIMENT_TREND_CAP);
    }

    #[tokio::test]
    async fn expression_habit_dedup_overwrites_confidence() {
        let store = store().await;
        store.add_expression_habit("u1", "uses emoji a lot", 0.3).await.unwrap();
        store.add_expression_habit("u1", "uses emoji a lot", 0.9).await.unwrap();
        let profile = store.get("u1", None).await.unwrap();
        assert_eq!(profile.expression_habits.len(), 1);
        assert!((profile.expression_habits[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn memory_point_weight_formula() {
        let w = RelationshipStore::compute_memory_point_weight(&"a".repeat(50), 2, 1.0);
        // length_factor = 1.5, interaction_factor = 2.0, recency_factor = 1.0
        assert!((w - 3.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn random_memory_points_respects_n_and_category() {
        let store = store().await;
        for i in 0..10 {
            store
                .add_memory_point("u1", if i % 2 == 0 { "likes" } else { "dislikes" }, "x", 1, 1.0)
                .await
                .unwrap();
        }
        let sampled = store.get_random_memory_points("u1", Some("likes"), 3).await.unwrap();
        assert!(sampled.len() <= 3);
        assert!(sampled.iter().all(|p| p.category == "likes"));
    }

    #[tokio::test]
    async fn concurrent_get_does_not_duplicate_profile() {
        let store = store().await;
        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.get("race", Some("Bob")).await.unwrap() }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let profile = store.get("race", None).await.unwrap();
        assert_eq!(profile.user_id, "race");
    }
}
