//! Psychology stage (§4.6 parallel fan-out, second branch): asks the LLM
//! gateway to read the current affect snapshot, relationship snapshot, and
//! latest inbound text, and return structured deltas to apply to both
//! stores in one shot. Grounded on the teacher's
//! `mneme_reasoning::metacognition` prompt-then-parse shape, narrowed to
//! the single JSON object this stage needs.

use nyx_affect::Affect;
use nyx_llm::{request, ChatMessage, LlmGateway, QueryClass};
use nyx_memory::Profile;
use serde::Deserialize;

/// §4.6: "the returned structured object carries `Δvalence, Δarousal,
/// Δstress, Δfatigue, relation_deltas{...}, primary_emotion,
/// secondary_emotion, internal_thought, style_instruction`".
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PsychologyResult {
    #[serde(default)]
    pub delta_valence: f32,
    #[serde(default)]
    pub delta_arousal: f32,
    #[serde(default)]
    pub delta_stress: f32,
    #[serde(default)]
    pub delta_fatigue: f32,
    #[serde(default)]
    pub relation_deltas: RelationDeltas,
    pub primary_emotion: Option<String>,
    pub secondary_emotion: Option<String>,
    #[serde(default)]
    pub internal_thought: String,
    #[serde(default)]
    pub style_instruction: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RelationDeltas {
    #[serde(default)]
    pub intimacy: i32,
    #[serde(default)]
    pub familiarity: i32,
    #[serde(default)]
    pub trust: i32,
    #[serde(default)]
    pub interest_match: i32,
}

/// Runs the psychology LLM call and parses its response. Callers are
/// expected to treat a returned `Err` as "absorb and log, continue with
/// defaults" (§4.6: "If either subtask fails... the pipeline continues
/// with defaults") rather than aborting the pipeline.
pub async fn analyze(
    gateway: &LlmGateway,
    model: &str,
    affect: &Affect,
    profile: &Profile,
    latest_text: &str,
) -> anyhow::Result<PsychologyResult> {
    let system = format!(
        "You are the internal psychology module of a persistent chat persona. \
         Current affect: valence={:.2} arousal={:.2} stress={:.2} fatigue={:.2} mood={}. \
         Relationship with this user: intimacy={} familiarity={} trust={} interest_match={}. \
         Read the user's latest message and respond with a single JSON object: \
         {{\"delta_valence\":f,\"delta_arousal\":f,\"delta_stress\":f,\"delta_fatigue\":f,\
         \"relation_deltas\":{{\"intimacy\":i,\"familiarity\":i,\"trust\":i,\"interest_match\":i}},\
         \"primary_emotion\":s,\"secondary_emotion\":s,\"internal_thought\":s,\"style_instruction\":s}}. \
         No prose outside the JSON object.",
        affect.valence,
        affect.arousal,
        affect.stress,
        affect.fatigue,
        affect.primary_emotion,
        profile.intimacy,
        profile.familiarity,
        profile.trust,
        profile.interest_match,
    );

    let messages = vec![ChatMessage::system(system), ChatMessage::user(latest_text)];
    let response = gateway.invoke(request(model, messages, 0.3, QueryClass::PsychologyAnalysis)).await?;
    crate::json_extract::extract_json(&response.text)
        .ok_or_else(|| anyhow::anyhow!("psychology response was not parseable JSON"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nyx_llm::{LlmGateway, MockProvider, RetryConfig};
    use std::sync::Arc;

    #[tokio::test]
    async fn parses_well_formed_response() {
        let json = r#"{"delta_valence":0.1,"delta_arousal":0.0,"delta_stress":0.0,"delta_fatigue":0.0,
            "relation_deltas":{"intimacy":1,"familiarity":0,"trust":0,"interest_match":0},
            "primary_emotion":"开心","secondary_emotion":null,"internal_thought":"glad they wrote",
            "style_instruction":"keep it short"}"#;
        let gateway = LlmGateway::new(
            Arc::new(MockProvider::new(Some(json.to_string()))),
            10,
            15,
            RetryConfig::default(),
        );
        let affect = Affect::default();
        let profile_pool = nyx_memory::open_pool(":memory:").await.unwrap();
        let store = nyx_memory::RelationshipStore::new(profile_pool).await.unwrap();
        let profile = store.get("u1", None).await.unwrap();

        let result = analyze(&gateway, "m", &affect, &profile, "hi there").await.unwrap();
        assert_eq!(result.relation_deltas.intimacy, 1);
        assert_eq!(result.primary_emotion.as_deref(), Some("开心"));
    }

    #[tokio::test]
    async fn unparseable_response_is_an_error_not_a_panic() {
        let gateway = LlmGateway::new(
            Arc::new(MockProvider::new(Some("not json".to_string()))),
            10,
            15,
            RetryConfig::default(),
        );
        let affect = Affect::default();
        let profile_pool = nyx_memory::open_pool(":memory:").await.unwrap();
        let store = nyx_memory::RelationshipStore::new(profile_pool).await.unwrap();
        let profile = store.get("u1", None).await.unwrap();

        let result = analyze(&gateway, "m", &affect, &profile, "hi").await;
        assert!(result.is_err());
    }
}
