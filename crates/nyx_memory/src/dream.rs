//! Dream Consolidator (C8, §4.8): a long-interval background loop that
//! prunes trivial episodic memories and consolidates moderately important
//! ones into a single summarized entry. Grounded on
//! `mneme_memory::consolidation::SleepConsolidator` for the
//! "skip-if-recent-activity, then prune-then-weave" shape, adapted from a
//! time-of-day gate to the idle-gate and two-phase algorithm used here. The
//! cross-process single-writer lock is new: the single-process original
//! doesn't need one, so this is grounded on `fs2`, which the sibling
//! example repo `aigent` already depends on for the same purpose.

use crate::db;
use crate::episodic::{EpisodicMemory, Source};
use anyhow::{Context, Result};
use nyx_affect::AffectStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const PRUNE_AGE_DAYS: i64 = 3;
const CONSOLIDATE_AGE_HOURS: i64 = 24;
const CONSOLIDATE_MIN_ENTRIES: usize = 4;
const CONSOLIDATE_TAKE: usize = 10;
const STAMINA_CREDIT: f32 = 30.0;

/// Summarizes a batch of episodic fragments into a single consolidated
/// memory, or signals that nothing useful can be distilled.
#[async_trait::async_trait]
pub trait DreamSummarizer: Send + Sync {
    async fn summarize(&self, fragments: &[String]) -> Result<String>;
}

pub struct DreamConsolidator {
    pool: sqlx::Pool<sqlx::Sqlite>,
    affect: AffectStore,
    lock_path: PathBuf,
}

impl DreamConsolidator {
    pub fn new(pool: sqlx::Pool<sqlx::Sqlite>, affect: AffectStore, data_dir: impl AsRef<Path>) -> Self {
        Self { pool, affect, lock_path: data_dir.as_ref().join("dream_lock.lock") }
    }

    /// Returns `true` if work was done (prune and/or consolidate touched
    /// something), consistent with "on any successful work, credit stamina".
    pub async fn run_once(&self, episodic: &EpisodicMemory, summarizer: &dyn DreamSummarizer) -> Result<bool> {
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.lock_path)
            .with_context(|| format!("failed to open dream lock file {}", self.lock_path.display()))?;
        if fs2::FileExt::try_lock_exclusive(&lock_file).is_err() {
            tracing::info!("dream consolidator already running in another process, skipping");
            return Ok(false);
        }

        let pruned = self.prune_trivial().await?;
        let consolidated = self.consolidate(episodic, summarizer).await?;

        fs2::FileExt::unlock(&lock_file).ok();

        let worked = pruned > 0 || consolidated;
        if worked {
            self.affect.credit_stamina(STAMINA_CREDIT).await;
        }
        Ok(worked)
    }

    /// Phase 1: delete entries where `importance == 1 && age > 3 days`.
    async fn prune_trivial(&self) -> Result<u64> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::days(PRUNE_AGE_DAYS)).timestamp();
        let result = sqlx::query("DELETE FROM episodic_memories WHERE importance = 1 AND created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("failed to prune trivial episodic memories")?;
        Ok(result.rows_affected())
    }

    /// Phase 2: collect `importance in {2,3}` aged `< 24h`; if at least 4,
    /// take the first 10, summarize, and replace with a single consolidated
    /// entry. No-op if the summary is `SKIP` or shorter than 5 chars.
    async fn consolidate(&self, episodic: &EpisodicMemory, summarizer: &dyn DreamSummarizer) -> Result<bool> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::hours(CONSOLIDATE_AGE_HOURS)).timestamp();
        let rows = sqlx::query(
            "SELECT id, user_id, text FROM episodic_memories
             WHERE importance IN (2, 3) AND created_at > ?
             ORDER BY created_at ASC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("failed to collect consolidation candidates")?;

        use sqlx::Row;
        let mut candidates: Vec<(String, String, String)> = Vec::with_capacity(rows.len());
        for row in rows {
            candidates.push((row.try_get("id")?, row.try_get("user_id")?, row.try_get("text")?));
        }

        if candidates.len() < CONSOLIDATE_MIN_ENTRIES {
            return Ok(false);
        }
        candidates.truncate(CONSOLIDATE_TAKE);

        let user_id = candidates[0].1.clone();
        let fragments: Vec<String> = candidates.iter().map(|(_, _, text)| text.clone()).collect();
        let summary = summarizer.summarize(&fragments).await?;

        if summary.trim() == "SKIP" || summary.trim().chars().count() < 5 {
            return Ok(false);
        }

        let ids: Vec<String> = candidates.iter().map(|(id, _, _)| id.clone()).collect();
        episodic.delete(&ids).await?;
        episodic.add_texts(&user_id, &[summary], "consolidated", 4, Source::Interaction).await?;

        Ok(true)
    }

    #[allow(dead_code)]
    fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

/// Idle gate: skip if the last user activity for the process was within 5
/// minutes of now, to avoid write contention with an active pipeline run.
pub fn should_skip_for_activity(last_activity: Option<chrono::DateTime<chrono::Utc>>) -> bool {
    match last_activity {
        Some(t) => (chrono::Utc::now() - t).num_seconds() < 300,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;

    struct FixedSummarizer(String);
    #[async_trait::async_trait]
    impl DreamSummarizer for FixedSummarizer {
        async fn summarize(&self, _fragments: &[String]) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    async fn setup() -> (DreamConsolidator, EpisodicMemory, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::open_pool(dir.path().join("test.db")).await.unwrap();
        let episodic = EpisodicMemory::new(pool.clone(), Arc::new(HashEmbedder::new(16))).await.unwrap();
        let affect = AffectStore::default();
        let consolidator = DreamConsolidator::new(pool, affect, dir.path());
        (consolidator, episodic, dir)
    }

    #[tokio::test]
    async fn prunes_old_trivial_entries() {
        let (consolidator, episodic, _dir) = setup().await;
        episodic.add_texts("u1", &["trivial old".to_string()], "misc", 1, Source::System).await.unwrap();
        sqlx::query("UPDATE episodic_memories SET created_at = ?")
            .bind((chrono::Utc::now() - chrono::Duration::days(4)).timestamp())
            .execute(&consolidator.pool)
            .await
            .unwrap();

        let summarizer = FixedSummarizer("SKIP".to_string());
        let worked = consolidator.run_once(&episodic, &summarizer).await.unwrap();
        assert!(worked);
        let remaining = episodic.search("u1", "trivial old", 5, None, None, 1).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn skips_consolidation_below_minimum_entries() {
        let (consolidator, episodic, _dir) = setup().await;
        episodic.add_texts("u1", &["one".to_string(), "two".to_string()], "misc", 2, Source::Interaction).await.unwrap();
        let summarizer = FixedSummarizer("a perfectly fine summary".to_string());
        let worked = consolidator.run_once(&episodic, &summarizer).await.unwrap();
        assert!(!worked);
    }

    #[tokio::test]
    async fn consolidates_when_enough_entries_and_credits_stamina() {
        let (consolidator, episodic, _dir) = setup().await;
        for i in 0..5 {
            episodic.add_texts("u1", &[format!("fragment {i}")], "misc", 2, Source::Interaction).await.unwrap();
        }
        let affect_before = consolidator.affect.snapshot().await;
        let summarizer = FixedSummarizer("a consolidated realization about the user".to_string());
        let worked = consolidator.run_once(&episodic, &summarizer).await.unwrap();
        assert!(worked);
        let affect_after = consolidator.affect.snapshot().await;
        assert!(affect_after.stamina >= affect_before.stamina);

        let results = episodic.search("u1", "consolidated realization", 5, None, None, 1).await.unwrap();
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn skip_response_does_not_consolidate() {
        let (consolidator, episodic, _dir) = setup().await;
        for i in 0..5 {
            episodic.add_texts("u1", &[format!("fragment {i}")], "misc", 2, Source::Interaction).await.unwrap();
        }
        let summarizer = FixedSummarizer("SKIP".to_string());
        let worked = consolidator.run_once(&episodic, &summarizer).await.unwrap();
        assert!(!worked);
    }

    #[test]
    fn idle_gate_skips_within_five_minutes() {
        assert!(should_skip_for_activity(Some(chrono::Utc::now())));
        assert!(!should_skip_for_activity(Some(chrono::Utc::now() - chrono::Duration::minutes(10))));
        assert!(!should_skip_for_activity(None));
    }
}
