//! Session Orchestrator (C6, §4.6) — the heart of the engine. Owns the
//! per-session mutex table (lazy-creation-mutex, same fix as
//! `RelationshipStore`'s `locks`/`creation_lock` split) and drives the full
//! pipeline: filter -> {parallel, shortcut, silent} -> agent -> {tool loop |
//! persist} -> summarize -> end. One run produces zero or one assistant
//! messages.

use crate::active_sessions::{ActiveSessionRegistry, SessionMeta};
use crate::actions::AgentAction;
use crate::agent::{self, AgentContext};
use crate::filter::{FilterStage, DEFAULT_STICKER_EMOJI};
use crate::perception::ImagePerception;
use crate::persist::{self, LlmMemorySaver, LlmSummarizer, SaveMode};
use crate::pipeline::{FilterDecision, PipelineInput, PipelineOutcome};
use crate::psychology;
use crate::tools::ToolRegistry;
use crate::visual::VisualType;
use nyx_affect::{AffectDelta, AffectStore};
use nyx_llm::LlmGateway;
use nyx_memory::{EpisodicMemory, HistoryMessage, HistoryStore, PersonaRetriever, RelationshipStore, Source};
use nyx_onebot::MessageKind;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// §4.6 Open Question resolution: the tool loop runs at most this many
/// rounds before the last tool output is wrapped into a synthetic reply.
const MAX_TOOL_ITERATIONS: usize = 3;
const EXPRESSION_HABITS_CAP: usize = 5;

pub struct SessionOrchestrator {
    affect: AffectStore,
    relationships: Arc<RelationshipStore>,
    episodic: Arc<EpisodicMemory>,
    persona: Arc<PersonaRetriever>,
    history: Arc<HistoryStore>,
    gateway: Arc<LlmGateway>,
    tools: Arc<ToolRegistry>,
    model: String,
    core_persona: String,
    perception: Option<Arc<ImagePerception>>,
    /// Sessions recently seen by the Ingress (§4.7 input). Populated on
    /// every non-proactive `run`; scanned by the Proactive Scheduler.
    active_sessions: Arc<ActiveSessionRegistry>,
    /// Per-session serialization point (§4.6: "holds per-session mutex").
    /// Lazily created under `creation_lock`, the same fix applied to C2's
    /// per-user lock table, closing the Open Question in §9.
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        affect: AffectStore,
        relationships: Arc<RelationshipStore>,
        episodic: Arc<EpisodicMemory>,
        persona: Arc<PersonaRetriever>,
        history: Arc<HistoryStore>,
        gateway: Arc<LlmGateway>,
        tools: Arc<ToolRegistry>,
        model: impl Into<String>,
        core_persona: impl Into<String>,
        perception: Option<Arc<ImagePerception>>,
    ) -> Self {
        Self {
            affect,
            relationships,
            episodic,
            persona,
            history,
            gateway,
            tools,
            model: model.into(),
            core_persona: core_persona.into(),
            perception,
            active_sessions: ActiveSessionRegistry::new(),
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn active_sessions(&self) -> Arc<ActiveSessionRegistry> {
        self.active_sessions.clone()
    }

    async fn session_lock(&self, sanitized_session_id: &str) -> Arc<Mutex<()>> {
        let mut table = self.session_locks.lock().await;
        table.entry(sanitized_session_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Runs one pipeline pass for `input`, holding that session's mutex for
    /// the duration (§4.6, §4.7: both the normal and proactive paths share
    /// this entry point; `input.is_proactive` only changes gating).
    pub async fn run(&self, input: PipelineInput) -> PipelineOutcome {
        let sanitized = input.session_id.sanitized();
        let lock = self.session_lock(&sanitized).await;
        let _guard = lock.lock().await;

        if !input.is_proactive {
            self.active_sessions
                .record(SessionMeta {
                    session_id: input.session_id.clone(),
                    user_id: input.user_id.clone(),
                    session_kind: input.session_kind,
                    group_id: input.group_id,
                    sender_display_name: input.sender_display_name.clone(),
                    last_seen: chrono::Utc::now(),
                })
                .await;
        }

        let decision = FilterStage::evaluate(&input, false);
        let outcome = match decision {
            FilterDecision::Reply => self.run_reply_path(&input, &sanitized).await,
            FilterDecision::ShortcutSticker => self.run_sticker_shortcut(&input, &sanitized).await,
            FilterDecision::ShortcutSilent => self.run_silent_path(&input, &sanitized, None).await,
            FilterDecision::Silent { reason } => {
                tracing::debug!(session = %input.session_id, %reason, "gating stage silenced this run");
                self.run_silent_path(&input, &sanitized, None).await
            }
        };

        outcome
    }

    async fn run_sticker_shortcut(&self, input: &PipelineInput, sanitized: &str) -> PipelineOutcome {
        let mut rng = rand::thread_rng();
        let emoji = DEFAULT_STICKER_EMOJI.choose(&mut rng).copied().unwrap_or("🙂");
        self.append_turn(sanitized, input.combined_text().as_str(), emoji).await;
        self.persist_turn(input, SaveMode::Interactive).await;
        PipelineOutcome { assistant_message: Some(emoji.to_string()), visual_type: VisualType::None }
    }

    async fn run_silent_path(&self, input: &PipelineInput, sanitized: &str, user_text_override: Option<&str>) -> PipelineOutcome {
        let user_text = user_text_override.unwrap_or(&input.combined_text()).to_string();
        if !user_text.is_empty() {
            self.append_user_message(sanitized, &user_text).await;
        }
        self.persist_turn(input, SaveMode::Observation).await;
        PipelineOutcome::silent()
    }

    async fn run_reply_path(&self, input: &PipelineInput, sanitized: &str) -> PipelineOutcome {
        let user_text = input.combined_text();
        let profile = match self.relationships.get(input.user_id.0.as_str(), Some(&input.sender_display_name)).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "relationship lookup failed, using defaults for this run");
                return self.run_silent_path(input, sanitized, Some(&user_text)).await;
            }
        };

        let (visual_type, psych) = tokio::join!(self.perceive(input), self.analyze_psychology(&profile, &user_text));
        let affect_snapshot = self.apply_psychology(input.user_id.0.as_str(), &profile, psych).await;

        let history = self.history.load(sanitized).await.unwrap_or_default();
        let recent_history: Vec<(String, String)> = history.messages.iter().map(|m| (m.role.clone(), m.content.clone())).collect();

        let extended_persona = self.persona.search_extended(&user_text, 3).await.unwrap_or_default();
        let speech_style = self
            .persona
            .lookup_style(Some(affect_snapshot.primary_emotion.as_str()), Some(relation_label(&profile)), None)
            .await
            .unwrap_or(None);
        let retrieved_memories = self.episodic.search(input.user_id.0.as_str(), &user_text, 3, None, None, 1).await.unwrap_or_default();
        let sampled_points = self.relationships.get_random_memory_points(input.user_id.0.as_str(), None, 3).await.unwrap_or_default();
        let habits: Vec<_> = profile.expression_habits.iter().take(EXPRESSION_HABITS_CAP).cloned().collect();

        let ctx = AgentContext {
            core_persona: &self.core_persona,
            extended_persona_snippets: &extended_persona,
            speech_style_snippet: speech_style.as_deref(),
            affect: &affect_snapshot,
            profile: &profile,
            retrieved_memories: &retrieved_memories,
            sampled_memory_points: &sampled_points,
            expression_habits: &habits,
            recent_history: &recent_history,
            visual_type: &visual_type,
            sender_display_name: &input.sender_display_name,
            is_group: matches!(input.session_kind, nyx_onebot::MessageKind::Group),
        };

        let action = self.run_agent_with_tool_loop(&ctx, &user_text).await;

        match action {
            Some(AgentAction::Reply { response }) => {
                self.append_turn(sanitized, &user_text, &response).await;
                self.persist_turn(input, SaveMode::Interactive).await;
                PipelineOutcome { assistant_message: Some(response), visual_type }
            }
            _ => {
                tracing::warn!(session = %input.session_id, "agent stage failed or exhausted the tool loop without a reply");
                self.run_silent_path(input, sanitized, Some(&user_text)).await
            }
        }
    }

    /// §4.7 entry point for the Proactive Scheduler. Bypasses the normal
    /// filter stage entirely — a synthesized proactive trigger has
    /// `is_mentioned=false`, which the group-mention gate would otherwise
    /// read as "stay silent". Uses `try_lock` rather than blocking so the
    /// scheduler can move on to the next session instead of queuing behind
    /// live traffic (§4.7: "if the session mutex is held, skip").
    pub async fn try_run_proactive(&self, input: PipelineInput) -> Option<PipelineOutcome> {
        let sanitized = input.session_id.sanitized();
        let lock = self.session_lock(&sanitized).await;
        let _guard = lock.try_lock().ok()?;
        Some(self.run_proactive_inner(&input, &sanitized).await)
    }

    async fn run_proactive_inner(&self, input: &PipelineInput, sanitized: &str) -> PipelineOutcome {
        let profile = match self.relationships.get(input.user_id.0.as_str(), Some(&input.sender_display_name)).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "relationship lookup failed, skipping proactive run");
                return PipelineOutcome::silent();
            }
        };

        let affect_snapshot = self.affect.snapshot().await;
        let history = self.history.load(sanitized).await.unwrap_or_default();
        let recent_history: Vec<(String, String)> = history.messages.iter().map(|m| (m.role.clone(), m.content.clone())).collect();

        let speech_style = self
            .persona
            .lookup_style(Some(affect_snapshot.primary_emotion.as_str()), Some(relation_label(&profile)), None)
            .await
            .unwrap_or(None);
        let sampled_points = self.relationships.get_random_memory_points(input.user_id.0.as_str(), None, 3).await.unwrap_or_default();
        let habits: Vec<_> = profile.expression_habits.iter().take(EXPRESSION_HABITS_CAP).cloned().collect();

        let ctx = AgentContext {
            core_persona: &self.core_persona,
            extended_persona_snippets: &[],
            speech_style_snippet: speech_style.as_deref(),
            affect: &affect_snapshot,
            profile: &profile,
            retrieved_memories: &[],
            sampled_memory_points: &sampled_points,
            expression_habits: &habits,
            recent_history: &recent_history,
            visual_type: &VisualType::None,
            sender_display_name: &input.sender_display_name,
            is_group: matches!(input.session_kind, MessageKind::Group),
        };

        match agent::run_proactive(&self.gateway, &self.model, &ctx).await {
            Ok(AgentAction::Reply { response }) => {
                let humanized = crate::proactive::humanize_proactive_message(&response);
                self.append_message(
                    sanitized,
                    HistoryMessage { role: "assistant".to_string(), content: humanized.clone(), timestamp: chrono::Utc::now() },
                )
                .await;
                PipelineOutcome { assistant_message: Some(humanized), visual_type: VisualType::None }
            }
            Ok(_) => PipelineOutcome::silent(),
            Err(e) => {
                tracing::warn!(error = %e, "proactive agent stage failed");
                PipelineOutcome::silent()
            }
        }
    }

    async fn perceive(&self, input: &PipelineInput) -> VisualType {
        let Some(url) = input.lone_image_url() else {
            return VisualType::None;
        };
        let Some(perception) = &self.perception else {
            return VisualType::None;
        };
        match perception.perceive(&url).await {
            Ok(visual) => visual,
            Err(e) => {
                tracing::warn!(error = %e, "image perception failed, continuing without visual context");
                VisualType::None
            }
        }
    }

    async fn analyze_psychology(&self, profile: &nyx_memory::Profile, user_text: &str) -> Option<psychology::PsychologyResult> {
        let affect = self.affect.snapshot().await;
        match psychology::analyze(&self.gateway, &self.model, &affect, profile, user_text).await {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::warn!(error = %e, "psychology stage failed, continuing with unchanged affect/relationship");
                None
            }
        }
    }

    async fn apply_psychology(&self, user_id: &str, _profile: &nyx_memory::Profile, psych: Option<psychology::PsychologyResult>) -> nyx_affect::Affect {
        let Some(psych) = psych else {
            return self.affect.snapshot().await;
        };

        let delta = AffectDelta {
            valence: psych.delta_valence,
            arousal: psych.delta_arousal,
            stress: psych.delta_stress,
            fatigue: psych.delta_fatigue,
            stamina: 0.0,
            new_primary: psych.primary_emotion.clone(),
            new_secondary: psych.secondary_emotion.clone(),
        };
        let updated = self.affect.update(delta).await;

        let relation_delta = nyx_memory::DimensionDelta {
            intimacy: psych.relation_deltas.intimacy,
            familiarity: psych.relation_deltas.familiarity,
            trust: psych.relation_deltas.trust,
            interest_match: psych.relation_deltas.interest_match,
        };
        if let Err(e) = self.relationships.update_dimensions(user_id, relation_delta).await {
            tracing::warn!(error = %e, "failed to persist relationship deltas from psychology stage");
        }

        updated
    }

    /// Bounded tool loop (§4.6, §9 Open Question: bounded at
    /// [`MAX_TOOL_ITERATIONS`]). Each non-`reply` action is dispatched, its
    /// output appended to the conversation, and the agent re-invoked; after
    /// the cap the last tool output is wrapped into a synthetic reply.
    async fn run_agent_with_tool_loop(&self, ctx: &AgentContext<'_>, user_text: &str) -> Option<AgentAction> {
        let mut exchange = Vec::new();
        let mut last_tool_output: Option<String> = None;

        for _ in 0..MAX_TOOL_ITERATIONS {
            let action = match agent::run(&self.gateway, &self.model, ctx, user_text, &exchange).await {
                Ok(a) => a,
                Err(e) => {
                    tracing::warn!(error = %e, "agent stage call failed");
                    return None;
                }
            };

            let Some(tool_name) = action.tool_name() else {
                return Some(action);
            };

            let arg = action.tool_arg();
            let output = self.tools.dispatch(tool_name, &arg).await;
            exchange.push(nyx_llm::ChatMessage::assistant(format!("calling tool {tool_name}({arg})")));
            exchange.push(nyx_llm::ChatMessage::user(format!("tool result: {}", output.content)));
            last_tool_output = Some(output.content);
        }

        last_tool_output.map(|content| AgentAction::Reply { response: content })
    }

    async fn append_user_message(&self, sanitized_session_id: &str, text: &str) {
        let message = HistoryMessage { role: "user".to_string(), content: text.to_string(), timestamp: chrono::Utc::now() };
        self.append_message(sanitized_session_id, message).await;
    }

    async fn append_turn(&self, sanitized_session_id: &str, user_text: &str, assistant_text: &str) {
        if !user_text.is_empty() {
            self.append_user_message(sanitized_session_id, user_text).await;
        }
        let message = HistoryMessage { role: "assistant".to_string(), content: assistant_text.to_string(), timestamp: chrono::Utc::now() };
        self.append_message(sanitized_session_id, message).await;
    }

    async fn append_message(&self, sanitized_session_id: &str, message: HistoryMessage) {
        let summarizer = LlmSummarizer::new(self.gateway.clone(), self.model.clone());
        let saver = LlmMemorySaver::new(self.gateway.clone(), self.model.clone(), self.episodic.clone());
        if let Err(e) = self.history.append_and_prune(sanitized_session_id, message, &summarizer, &saver).await {
            tracing::warn!(error = %e, "failed to append to short-term history");
        }
    }

    /// §4.6 persist stage: extract structured memory ops from the user's
    /// turn only, never the assistant's reply.
    async fn persist_turn(&self, input: &PipelineInput, mode: SaveMode) {
        let user_text = input.combined_text();
        if user_text.trim().is_empty() {
            return;
        }
        if let Err(e) = persist::save_turn(&self.gateway, &self.model, &self.episodic, input.user_id.0.as_str(), &user_text, mode).await {
            tracing::warn!(error = %e, "persist stage failed");
        }
    }
}

/// Coarse relation label for speech-style lookup, derived from intimacy.
fn relation_label(profile: &nyx_memory::Profile) -> &'static str {
    if profile.intimacy >= 60 {
        "close"
    } else if profile.intimacy >= 30 {
        "familiar"
    } else {
        "distant"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;
    use nyx_core::{SessionId, UserId};
    use nyx_llm::{MockProvider, RetryConfig};
    use nyx_onebot::MessageKind;

    async fn orchestrator(mock_text: &str) -> SessionOrchestrator {
        let pool = nyx_memory::open_pool(":memory:").await.unwrap();
        let relationships = Arc::new(RelationshipStore::new(pool.clone()).await.unwrap());
        let embedder = Arc::new(nyx_memory::HashEmbedder::new(16));
        let episodic = Arc::new(EpisodicMemory::new(pool.clone(), embedder.clone()).await.unwrap());
        let persona = Arc::new(PersonaRetriever::new(pool, embedder).await.unwrap());
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(HistoryStore::new(dir.path()));
        let gateway = Arc::new(LlmGateway::new(Arc::new(MockProvider::new(Some(mock_text.to_string()))), 10, 10, RetryConfig::default()));
        let tools = Arc::new(ToolRegistry::new());
        SessionOrchestrator::new(AffectStore::default(), relationships, episodic, persona, history, gateway, tools, "m", "You are Nyx.", None)
    }

    fn private_input(text: &str) -> PipelineInput {
        PipelineInput {
            session_id: SessionId::from("s1"),
            user_id: UserId::from("u1"),
            session_kind: MessageKind::Private,
            sender_display_name: "alice".to_string(),
            group_id: None,
            messages: vec![crate::pipeline::InboundText { text: text.to_string(), segments: vec![] }],
            is_mentioned: false,
            is_proactive: false,
        }
    }

    #[tokio::test]
    async fn private_reply_path_produces_one_message() {
        let json = r#"{"monologue":"m","action":"reply","args":{"response":"hi there!"}}"#;
        let orch = orchestrator(json).await;
        let outcome = orch.run(private_input("hello")).await;
        assert_eq!(outcome.assistant_message.as_deref(), Some("hi there!"));
    }

    #[tokio::test]
    async fn group_message_without_mention_stays_silent() {
        let json = r#"{"monologue":"m","action":"reply","args":{"response":"should not be used"}}"#;
        let orch = orchestrator(json).await;
        let mut input = private_input("hello");
        input.session_kind = MessageKind::Group;
        input.group_id = Some(1);
        input.is_mentioned = false;
        let outcome = orch.run(input).await;
        assert!(outcome.assistant_message.is_none());
    }

    #[tokio::test]
    async fn parse_failure_falls_back_to_raw_text_reply() {
        let orch = orchestrator("just plain text, not json").await;
        let outcome = orch.run(private_input("hello")).await;
        assert_eq!(outcome.assistant_message.as_deref(), Some("just plain text, not json"));
    }

    #[tokio::test]
    async fn history_is_appended_after_a_reply() {
        let json = r#"{"monologue":"m","action":"reply","args":{"response":"pong"}}"#;
        let orch = orchestrator(json).await;
        orch.run(private_input("ping")).await;
        let history = orch.history.load("s1").await.unwrap();
        assert_eq!(history.messages.len(), 2);
        assert_eq!(history.messages[0].content, "ping");
        assert_eq!(history.messages[1].content, "pong");
    }

    #[tokio::test]
    async fn concurrent_runs_on_same_session_do_not_interleave_history() {
        let json = r#"{"monologue":"m","action":"reply","args":{"response":"ack"}}"#;
        let orch = Arc::new(orchestrator(json).await);
        let mut handles = Vec::new();
        for i in 0..5 {
            let orch = orch.clone();
            handles.push(tokio::spawn(async move { orch.run(private_input(&format!("msg {i}"))).await }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let history = orch.history.load("s1").await.unwrap();
        assert_eq!(history.messages.len(), 10);
    }
}
