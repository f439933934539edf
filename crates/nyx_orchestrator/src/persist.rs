//! Persist stage (§4.6 end-of-run, §4.9): the Memory Saver. Extracts
//! structured memory operations from the user's turn only — never from the
//! assistant's output — and applies the INTERACTIVE/OBSERVATION importance
//! thresholds before writing to episodic memory. Also implements
//! `nyx_memory::history::{Summarizer, MemorySaver}` so the History Store can
//! call back into the LLM gateway without depending on it directly.

use crate::actions::{MemoryOp, MemoryOpsResponse};
use async_trait::async_trait;
use nyx_llm::{request, ChatMessage, LlmGateway, QueryClass};
use nyx_memory::{EpisodicMemory, HistoryMessage, MemorySaver as MemorySaverTrait, Source, Summarizer as SummarizerTrait};
use std::sync::Arc;

/// Whether the assistant replied this turn (§4.6: "in either `INTERACTIVE`
/// (assistant replied) or `OBSERVATION` (assistant stayed silent) mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    Interactive,
    Observation,
}

impl SaveMode {
    fn importance_floor(self) -> i32 {
        match self {
            SaveMode::Interactive => 2,
            SaveMode::Observation => 4,
        }
    }
}

/// Phrases that force `importance >= 5` regardless of the LLM's own
/// estimate (§4.6: "Imperative phrases (\"请记住\", \"重要\", …) force
/// importance ≥ 5").
const IMPERATIVE_PHRASES: &[&str] = &["请记住", "重要", "一定要记住", "记住这个", "please remember", "don't forget"];

fn contains_imperative_phrase(text: &str) -> bool {
    let lower = text.to_lowercase();
    IMPERATIVE_PHRASES.iter().any(|p| text.contains(p) || lower.contains(&p.to_lowercase()))
}

fn extraction_prompt(user_text: &str) -> Vec<ChatMessage> {
    let system = "Extract durable facts about the user worth remembering long-term from their \
                  message below. Ignore anything the assistant said. Respond with a single JSON \
                  object: {\"ops\":[{\"category\":string,\"content\":string,\"importance\":1..5}]}. \
                  If nothing is worth remembering, return {\"ops\":[]}."
        .to_string();
    vec![ChatMessage::system(system), ChatMessage::user(user_text)]
}

/// Runs the extraction call, applies the mode-dependent importance floor and
/// the imperative-phrase override, and writes surviving ops to episodic
/// memory. Failures are the caller's to absorb (§4.6 failure isolation).
pub async fn save_turn(
    gateway: &LlmGateway,
    model: &str,
    memory: &EpisodicMemory,
    user_id: &str,
    user_text: &str,
    mode: SaveMode,
) -> anyhow::Result<usize> {
    let messages = extraction_prompt(user_text);
    let response = gateway.invoke(request(model, messages, 0.2, QueryClass::MemoryExtraction)).await?;
    let parsed: MemoryOpsResponse = crate::json_extract::extract_json(&response.text).unwrap_or_default();

    let floor = mode.importance_floor();
    let forced = contains_imperative_phrase(user_text);

    let mut saved = 0;
    for op in parsed.ops {
        let importance = if forced { op.importance.max(5) } else { op.importance };
        if importance < floor {
            continue;
        }
        memory.add_texts(user_id, &[op.content], &op.category, importance, Source::Interaction).await?;
        saved += 1;
    }
    Ok(saved)
}

/// Pulls the ops list straight out of a parsed response, for callers (tests,
/// the proactive path) that already have a response in hand.
pub fn ops_above_threshold(ops: Vec<MemoryOp>, floor: i32, forced: bool) -> Vec<MemoryOp> {
    ops.into_iter()
        .map(|mut op| {
            if forced {
                op.importance = op.importance.max(5);
            }
            op
        })
        .filter(|op| op.importance >= floor)
        .collect()
}

/// `Summarizer` impl backing `HistoryStore::append_and_prune`'s running
/// summary update (§4.9: "ask the LLM to update the summary").
pub struct LlmSummarizer {
    gateway: Arc<LlmGateway>,
    model: String,
}

impl LlmSummarizer {
    pub fn new(gateway: Arc<LlmGateway>, model: impl Into<String>) -> Self {
        Self { gateway, model: model.into() }
    }
}

#[async_trait]
impl SummarizerTrait for LlmSummarizer {
    async fn update_summary(&self, prior_summary: &str, pruned: &[HistoryMessage]) -> anyhow::Result<String> {
        let lines: Vec<String> = pruned.iter().map(|m| format!("{}: {}", m.role, m.content)).collect();
        let system = format!(
            "Update the running summary with new lines. Prior summary: {prior_summary}\nNew lines:\n{}",
            lines.join("\n")
        );
        let messages = vec![ChatMessage::system(system)];
        let response = self.gateway.invoke(request(&self.model, messages, 0.3, QueryClass::MemoryExtraction)).await?;
        Ok(response.text)
    }
}

/// `MemorySaver` impl forwarding a pruned history block to episodic memory
/// in `OBSERVATION` mode, once per prune (§4.9).
pub struct LlmMemorySaver {
    gateway: Arc<LlmGateway>,
    model: String,
    memory: Arc<EpisodicMemory>,
}

impl LlmMemorySaver {
    pub fn new(gateway: Arc<LlmGateway>, model: impl Into<String>, memory: Arc<EpisodicMemory>) -> Self {
        Self { gateway, model: model.into(), memory }
    }
}

#[async_trait]
impl MemorySaverTrait for LlmMemorySaver {
    async fn save_block(&self, session_id: &str, pruned: &[HistoryMessage]) -> anyhow::Result<()> {
        let user_text: Vec<&str> = pruned.iter().filter(|m| m.role == "user").map(|m| m.content.as_str()).collect();
        if user_text.is_empty() {
            return Ok(());
        }
        let combined = user_text.join("\n");
        save_turn(&self.gateway, &self.model, &self.memory, session_id, &combined, SaveMode::Observation).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nyx_llm::{LlmGateway, MockProvider, RetryConfig};

    async fn memory() -> EpisodicMemory {
        let pool = nyx_memory::open_pool(":memory:").await.unwrap();
        EpisodicMemory::new(pool, Arc::new(nyx_memory::HashEmbedder::new(16))).await.unwrap()
    }

    fn gateway_with(text: &str) -> LlmGateway {
        LlmGateway::new(Arc::new(MockProvider::new(Some(text.to_string()))), 10, 10, RetryConfig::default())
    }

    #[test]
    fn imperative_phrase_is_detected() {
        assert!(contains_imperative_phrase("请记住我喜欢咖啡"));
        assert!(contains_imperative_phrase("please remember my birthday"));
        assert!(!contains_imperative_phrase("just chatting about cats"));
    }

    #[test]
    fn interactive_floor_drops_low_importance() {
        let ops = vec![
            MemoryOp { category: "likes".into(), content: "a".into(), importance: 1 },
            MemoryOp { category: "likes".into(), content: "b".into(), importance: 3 },
        ];
        let kept = ops_above_threshold(ops, SaveMode::Interactive.importance_floor(), false);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].content, "b");
    }

    #[test]
    fn observation_floor_is_stricter_than_interactive() {
        assert!(SaveMode::Observation.importance_floor() > SaveMode::Interactive.importance_floor());
    }

    #[test]
    fn forced_importance_overrides_low_llm_estimate() {
        let ops = vec![MemoryOp { category: "likes".into(), content: "remember this".into(), importance: 1 }];
        let kept = ops_above_threshold(ops, SaveMode::Observation.importance_floor(), true);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].importance, 5);
    }

    #[tokio::test]
    async fn save_turn_writes_surviving_ops_to_episodic_memory() {
        let json = r#"{"ops":[{"category":"likes","content":"loves coffee","importance":3},
                                {"category":"misc","content":"trivial aside","importance":1}]}"#;
        let gateway = gateway_with(json);
        let mem = memory().await;
        let saved = save_turn(&gateway, "m", &mem, "u1", "I really love coffee", SaveMode::Interactive).await.unwrap();
        assert_eq!(saved, 1);
        let results = mem.search("u1", "coffee", 5, None, None, 1).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn save_turn_on_unparseable_response_saves_nothing_without_erroring() {
        let gateway = gateway_with("not json");
        let mem = memory().await;
        let saved = save_turn(&gateway, "m", &mem, "u1", "hello", SaveMode::Interactive).await.unwrap();
        assert_eq!(saved, 0);
    }

    #[tokio::test]
    async fn memory_saver_forwards_only_user_lines() {
        let json = r#"{"ops":[{"category":"likes","content":"likes hiking","importance":4}]}"#;
        let gateway = Arc::new(gateway_with(json));
        let mem = Arc::new(memory().await);
        let saver = LlmMemorySaver::new(gateway, "m", mem.clone());
        let pruned = vec![
            HistoryMessage { role: "user".to_string(), content: "I like hiking".to_string(), timestamp: chrono::Utc::now() },
            HistoryMessage { role: "assistant".to_string(), content: "nice!".to_string(), timestamp: chrono::Utc::now() },
        ];
        saver.save_block("s1", &pruned).await.unwrap();
        let results = mem.search("s1", "hiking", 5, None, None, 1).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn summarizer_returns_updated_text() {
        let gateway = Arc::new(gateway_with("updated summary text"));
        let summarizer = LlmSummarizer::new(gateway, "m");
        let pruned = vec![HistoryMessage { role: "user".to_string(), content: "hi".to_string(), timestamp: chrono::Utc::now() }];
        let summary = summarizer.update_summary("old summary", &pruned).await.unwrap();
        assert_eq!(summary, "updated summary text");
    }
}
