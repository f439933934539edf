//! Persona Retriever (C11, §4.11): persona data lives in its own
//! collections, separate from episodic memory, so dream prune/consolidate
//! never touches it. Direct structured lookup is preferred; vector search
//! over the flattened strings is only a fallback. Grounded on
//! `mneme_memory::sqlite`'s table-per-collection shape; the
//! flatten-nested-config-into-indexed-strings idiom mirrors
//! `mneme_memory::narrative::NarrativeWeaver`'s chapter-to-text flattening.

use crate::db;
use crate::embedding::Embedder;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A nested persona configuration: category -> subcategory -> key -> value.
pub type PersonaConfig = HashMap<String, HashMap<String, HashMap<String, String>>>;

/// Contextual speech style keyed by emotion/relation/scene, any of which may
/// be absent (matched against the broader bucket in that case).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechStyle {
    pub emotion: Option<String>,
    pub relation: Option<String>,
    pub scene: Option<String>,
    pub text: String,
}

fn flatten_persona(config: &PersonaConfig) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for (cat, subs) in config {
        for (sub, kvs) in subs {
            for (key, val) in kvs {
                out.push((format!("{cat} - {sub} - {key}"), format!("{cat} - {sub} - {key}: {val}")));
            }
        }
    }
    out
}

/// English scene names map to native scene labels used by the source
/// persona configuration (e.g. stored under Chinese scene keys).
fn map_scene_to_native(scene: &str) -> String {
    match scene {
        "greeting" => "问候".to_string(),
        "farewell" => "告别".to_string(),
        "comfort" => "安慰".to_string(),
        "celebration" => "庆祝".to_string(),
        "teasing" => "调侃".to_string(),
        other => other.to_string(),
    }
}

pub struct PersonaRetriever {
    pool: Pool<Sqlite>,
    embedder: Arc<dyn Embedder>,
    /// In-memory structured index, preferred over vector search for direct
    /// lookups. Rebuilt from `pool` on self-heal.
    styles: RwLock<Vec<SpeechStyle>>,
    extended: RwLock<Vec<(String, String)>>,
}

impl PersonaRetriever {
    pub async fn new(pool: Pool<Sqlite>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS persona_extended (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                label TEXT NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .context("failed to create persona_extended table")?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS persona_styles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                emotion TEXT,
                relation TEXT,
                scene TEXT,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .context("failed to create persona_styles table")?;
        Ok(Self { pool, embedder, styles: RwLock::new(Vec::new()), extended: RwLock::new(Vec::new()) })
    }

    pub async fn index_extended_persona(&self, config: &PersonaConfig) -> Result<()> {
        sqlx::query("DELETE FROM persona_extended").execute(&self.pool).await?;
        let flattened = flatten_persona(config);
        for (label, text) in &flattened {
            let embedding = self.embedder.embed(text)?;
            let blob = db::encode_embedding(&embedding);
            sqlx::query("INSERT INTO persona_extended (label, text, embedding) VALUES (?, ?, ?)")
                .bind(label)
                .bind(text)
                .bind(&blob)
                .execute(&self.pool)
                .await?;
        }
        *self.extended.write().await = flattened;
        Ok(())
    }

    pub async fn index_speech_styles(&self, styles: Vec<SpeechStyle>) -> Result<()> {
        sqlx::query("DELETE FROM persona_styles").execute(&self.pool).await?;
        for style in &styles {
            let embedding = self.embedder.embed(&style.text)?;
            let blob = db::encode_embedding(&embedding);
            sqlx::query(
                "INSERT INTO persona_styles (emotion, relation, scene, text, embedding) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&style.emotion)
            .bind(&style.relation)
            .bind(&style.scene)
            .bind(&style.text)
            .bind(&blob)
            .execute(&self.pool)
            .await?;
        }
        *self.styles.write().await = styles;
        Ok(())
    }

    /// Direct lookup preferred: an exact `emotion-relation-scene` match,
    /// falling back to any two-of-three match, then vector search over the
    /// indexed text as a last resort.
    pub async fn lookup_style(&self, emotion: Option<&str>, relation: Option<&str>, scene: Option<&str>) -> Result<Option<String>> {
        let scene = scene.map(map_scene_to_native);
        let styles = match self.direct_style_lookup(emotion, relation, scene.as_deref()).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(error = %e, "persona style index read failed, rebuilding from source");
                self.self_heal_styles().await?;
                self.direct_style_lookup(emotion, relation, scene.as_deref()).await?
            }
        };
        if styles.is_some() {
            return Ok(styles);
        }

        let query = [emotion, relation, scene.as_deref()].into_iter().flatten().collect::<Vec<_>>().join(" ");
        if query.is_empty() {
            return Ok(None);
        }
        self.vector_fallback_style(&query).await
    }

    async fn direct_style_lookup(
        &self,
        emotion: Option<&str>,
        relation: Option<&str>,
        scene: Option<&str>,
    ) -> Result<Option<String>> {
        let styles = self.styles.read().await;
        let exact = styles.iter().find(|s| {
            s.emotion.as_deref() == emotion && s.relation.as_deref() == relation && s.scene.as_deref() == scene
        });
        if let Some(s) = exact {
            return Ok(Some(s.text.clone()));
        }
        let partial = styles.iter().find(|s| {
            let matches = [
                emotion.is_some() && s.emotion.as_deref() == emotion,
                relation.is_some() && s.relation.as_deref() == relation,
                scene.is_some() && s.scene.as_deref() == scene,
            ];
            matches.iter().filter(|m| **m).count() >= 2
        });
        Ok(partial.map(|s| s.text.clone()))
    }

    async fn vector_fallback_style(&self, query: &str) -> Result<Option<String>> {
        let query_embedding = self.embedder.embed(query)?;
        let rows = sqlx::query("SELECT text, embedding FROM persona_styles").fetch_all(&self.pool).await?;
        let mut best: Option<(f32, String)> = None;
        for row in rows {
            let text: String = row.try_get("text")?;
            let embedding = db::decode_embedding(row.try_get::<Vec<u8>, _>("embedding")?.as_slice());
            let sim = crate::embedding::cosine_similarity(&query_embedding, &embedding);
            if best.as_ref().map(|(b, _)| sim > *b).unwrap_or(true) {
                best = Some((sim, text));
            }
        }
        Ok(best.map(|(_, text)| text))
    }

    /// Vector search over the flattened extended-persona strings (§4.6 agent
    /// stage: "context-retrieved extended persona"). Direct lookup doesn't
    /// apply here since the query is free-form conversational text, not a
    /// structured emotion/relation/scene triple.
    pub async fn search_extended(&self, query: &str, k: usize) -> Result<Vec<String>> {
        let entries = self.extended.read().await;
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(query)?;
        let mut scored: Vec<(f32, &String)> = Vec::with_capacity(entries.len());
        for (_, text) in entries.iter() {
            let embedding = self.embedder.embed(text)?;
            scored.push((crate::embedding::cosine_similarity(&query_embedding, &embedding), text));
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(k).map(|(_, text)| text.clone()).collect())
    }

    async fn self_heal_styles(&self) -> Result<()> {
        let rows = sqlx::query("SELECT emotion, relation, scene, text FROM persona_styles").fetch_all(&self.pool).await?;
        let mut rebuilt = Vec::with_capacity(rows.len());
        for row in rows {
            rebuilt.push(SpeechStyle {
                emotion: row.try_get("emotion")?,
                relation: row.try_get("relation")?,
                scene: row.try_get("scene")?,
                text: row.try_get("text")?,
            });
        }
        *self.styles.write().await = rebuilt;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;

    async fn retriever() -> PersonaRetriever {
        let pool = db::open_pool(":memory:").await.unwrap();
        PersonaRetriever::new(pool, Arc::new(HashEmbedder::new(32))).await.unwrap()
    }

    fn style(emotion: &str, relation: &str, scene: &str, text: &str) -> SpeechStyle {
        SpeechStyle {
            emotion: Some(emotion.to_string()),
            relation: Some(relation.to_string()),
            scene: Some(scene.to_string()),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn exact_triple_match_is_preferred() {
        let retriever = retriever().await;
        retriever
            .index_speech_styles(vec![
                style("happy", "close", "greeting", "exact match text"),
                style("happy", "close", "farewell", "wrong scene"),
            ])
            .await
            .unwrap();
        let found = retriever.lookup_style(Some("happy"), Some("close"), Some("greeting")).await.unwrap();
        assert_eq!(found.unwrap(), "exact match text");
    }

    #[tokio::test]
    async fn scene_is_mapped_to_native_label() {
        let retriever = retriever().await;
        retriever
            .index_speech_styles(vec![SpeechStyle {
                emotion: Some("happy".to_string()),
                relation: None,
                scene: Some("问候".to_string()),
                text: "native scene text".to_string(),
            }])
            .await
            .unwrap();
        let found = retriever.lookup_style(Some("happy"), None, Some("greeting")).await.unwrap();
        assert_eq!(found.unwrap(), "native scene text");
    }

    #[tokio::test]
    async fn falls_back_to_vector_search_when_no_direct_match() {
        let retriever = retriever().await;
        retriever.index_speech_styles(vec![style("sad", "distant", "comfort", "嗯嗯我在")]).await.unwrap();
        let found = retriever.lookup_style(Some("happy"), Some("close"), Some("celebration")).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn search_extended_returns_top_k() {
        let retriever = retriever().await;
        let mut config: PersonaConfig = HashMap::new();
        config.entry("性格".to_string()).or_default().entry("基础".to_string()).or_default().insert(
            "温柔".to_string(),
            "true".to_string(),
        );
        retriever.index_extended_persona(&config).await.unwrap();
        let hits = retriever.search_extended("性格", 3).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn extended_persona_flattens_nested_config() {
        let retriever = retriever().await;
        let mut config: PersonaConfig = HashMap::new();
        config.entry("性格".to_string()).or_default().entry("基础".to_string()).or_default().insert(
            "温柔".to_string(),
            "true".to_string(),
        );
        retriever.index_extended_persona(&config).await.unwrap();
        let extended = retriever.extended.read().await;
        assert_eq!(extended.len(), 1);
        assert!(extended[0].1.contains("性格 - 基础 - 温柔"));
    }
}
