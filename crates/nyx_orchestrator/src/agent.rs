//! Agent stage (§4.6): composes the system prompt from persona, affect,
//! relationship, retrieved memory, and expression habits, appends recent
//! history, calls the LLM gateway, and parses the structured
//! [`AgentResponse`]. Grounded on the teacher's
//! `mneme_reasoning::context::ContextBuilder` for the "concatenate ranked
//! sections into one system prompt" shape.

use crate::actions::{AgentAction, AgentResponse};
use crate::visual::VisualType;
use nyx_affect::Affect;
use nyx_llm::{request, ChatMessage, LlmGateway, QueryClass};
use nyx_memory::{ExpressionHabit, MemoryPoint, Profile};

const MAX_HISTORY_MESSAGES: usize = 10;
const RETRIEVED_MEMORY_K: usize = 3;
const SAMPLED_MEMORY_POINTS_N: usize = 3;
/// §4.6: "sticker-description artifacts" are excluded from retrieved
/// memories injected into the prompt — they're labels the perception stage
/// produced for stickers, not facts about the user.
const STICKER_ARTIFACT_PREFIX: &str = "[sticker]";

pub struct AgentContext<'a> {
    pub core_persona: &'a str,
    pub extended_persona_snippets: &'a [String],
    pub speech_style_snippet: Option<&'a str>,
    pub affect: &'a Affect,
    pub profile: &'a Profile,
    pub retrieved_memories: &'a [String],
    pub sampled_memory_points: &'a [MemoryPoint],
    pub expression_habits: &'a [ExpressionHabit],
    pub recent_history: &'a [(String, String)], // (role, content)
    pub visual_type: &'a VisualType,
    pub sender_display_name: &'a str,
    pub is_group: bool,
}

/// Strips entries that are pure sticker-description artifacts out of a
/// retrieved-memory list, per §4.6's "filtered to exclude sticker-
/// description artifacts".
pub fn filter_sticker_artifacts(memories: Vec<String>) -> Vec<String> {
    memories.into_iter().filter(|m| !m.starts_with(STICKER_ARTIFACT_PREFIX)).take(RETRIEVED_MEMORY_K).collect()
}

/// Strips sticker-description markers out of short-term history entries
/// before they're appended to the prompt (§4.6: "the short-term history
/// (last 10) with sticker descriptions stripped").
pub fn strip_sticker_descriptions(history: &[(String, String)]) -> Vec<(String, String)> {
    history
        .iter()
        .rev()
        .take(MAX_HISTORY_MESSAGES)
        .rev()
        .map(|(role, content)| {
            if content.starts_with(STICKER_ARTIFACT_PREFIX) {
                (role.clone(), "[sticker]".to_string())
            } else {
                (role.clone(), content.clone())
            }
        })
        .collect()
}

fn build_system_prompt(ctx: &AgentContext) -> String {
    let mut sections = vec![ctx.core_persona.to_string()];

    if !ctx.extended_persona_snippets.is_empty() {
        sections.push(format!("Persona detail:\n{}", ctx.extended_persona_snippets.join("\n")));
    }
    if let Some(style) = ctx.speech_style_snippet {
        sections.push(format!("Speech style for this moment: {style}"));
    }

    sections.push(format!(
        "Current mood: {} (valence={:.2}, arousal={:.2}, stress={:.2}, fatigue={:.2}, stamina={:.0}).",
        ctx.affect.primary_emotion, ctx.affect.valence, ctx.affect.arousal, ctx.affect.stress, ctx.affect.fatigue, ctx.affect.stamina
    ));

    sections.push(format!(
        "Relationship with {}: intimacy={} familiarity={} trust={} interest_match={} style={:?}.",
        ctx.sender_display_name, ctx.profile.intimacy, ctx.profile.familiarity, ctx.profile.trust, ctx.profile.interest_match, ctx.profile.communication_style
    ));

    let filtered_memories = filter_sticker_artifacts(ctx.retrieved_memories.to_vec());
    if !filtered_memories.is_empty() {
        sections.push(format!("Things you remember:\n- {}", filtered_memories.join("\n- ")));
    }

    if !ctx.sampled_memory_points.is_empty() {
        let points: Vec<String> = ctx.sampled_memory_points.iter().take(SAMPLED_MEMORY_POINTS_N).map(|p| p.content.clone()).collect();
        sections.push(format!("A few things you've noted about them:\n- {}", points.join("\n- ")));
    }

    if !ctx.expression_habits.is_empty() {
        let habits: Vec<String> = ctx.expression_habits.iter().map(|h| h.habit.clone()).collect();
        sections.push(format!("Your speech habits: {}", habits.join(", ")));
    }

    match ctx.visual_type {
        VisualType::Sticker => {
            sections.push("The user sent a sticker. Do not attempt to describe or analyze its visual content; react to it socially instead.".to_string());
        }
        VisualType::Photo { .. } => {
            sections.push("The user sent a photo; it is attached below for you to look at.".to_string());
        }
        _ => {}
    }

    sections.push(
        "Respond with a single JSON object: {\"monologue\":string,\"action\":\"reply\"|\"web_search\"|\"generate_image\"|\"run_python_analysis\",\
         \"args\":{...}}. For a reply, args is {\"response\":string}. Output nothing outside the JSON object."
            .to_string(),
    );

    sections.join("\n\n")
}

fn query_class_for(ctx: &AgentContext, latest_text: &str) -> QueryClass {
    let len = latest_text.chars().count();
    if ctx.is_group {
        if len > 80 {
            QueryClass::ComplexQuery
        } else {
            QueryClass::SimpleQuery
        }
    } else if len > 80 {
        QueryClass::ComplexQuery
    } else {
        QueryClass::SimpleQuery
    }
}

/// Runs the agent stage: composes the prompt, calls the gateway, and
/// parses the response. On parse failure the raw text is wrapped into a
/// synthetic `reply` action (§4.6: "on parse failure, the raw text is
/// wrapped into a synthetic `action=reply` object"). `tool_exchange` carries
/// prior tool-call/tool-result turns for the bounded tool loop (§4.6); empty
/// on the first call.
pub async fn run(
    gateway: &LlmGateway,
    model: &str,
    ctx: &AgentContext<'_>,
    latest_text: &str,
    tool_exchange: &[ChatMessage],
) -> anyhow::Result<AgentAction> {
    let system = build_system_prompt(ctx);
    let history = strip_sticker_descriptions(ctx.recent_history);

    let mut messages = vec![ChatMessage::system(system)];
    for (role, content) in &history {
        messages.push(if role == "assistant" { ChatMessage::assistant(content) } else { ChatMessage::user(content) });
    }
    messages.push(ChatMessage::user(latest_text));
    if let VisualType::Photo { base64_jpeg } = ctx.visual_type {
        messages.push(ChatMessage::user(format!("data:image/jpeg;base64,{base64_jpeg}")));
    }
    messages.extend_from_slice(tool_exchange);

    let query_class = query_class_for(ctx, latest_text);
    let response = gateway.invoke(request(model, messages, 0.7, query_class)).await?;

    match crate::json_extract::extract_json::<AgentResponse>(&response.text) {
        Some(parsed) => Ok(parsed.action),
        None => Ok(AgentAction::Reply { response: response.text }),
    }
}

/// Runs the agent stage for a proactive-initiation decision (§4.7): no new
/// inbound message, the agent is only given the current mood/relationship/
/// memory context and must decide whether to speak up or stay silent. Parse
/// failure falls back to silence rather than the reply-wrapping fallback
/// `run` uses, since a garbled proactive message is worse than none.
pub async fn run_proactive(gateway: &LlmGateway, model: &str, ctx: &AgentContext<'_>) -> anyhow::Result<AgentAction> {
    let mut system = build_system_prompt(ctx);
    system.push_str(
        "\n\nNo new message has arrived; you are deciding whether to reach out first. \
         If there's something worth saying unprompted, reply with it, short and in \
         character. Otherwise stay silent. Respond with a single JSON object: \
         {\"monologue\":string,\"action\":\"reply\"|\"silent\",\"args\":{...}}. For reply, \
         args is {\"response\":string}; for silent, args is {}. Output nothing outside \
         the JSON object.",
    );

    let history = strip_sticker_descriptions(ctx.recent_history);
    let mut messages = vec![ChatMessage::system(system)];
    for (role, content) in &history {
        messages.push(if role == "assistant" { ChatMessage::assistant(content) } else { ChatMessage::user(content) });
    }

    let response = gateway.invoke(request(model, messages, 0.7, QueryClass::SimpleQuery)).await?;

    match crate::json_extract::extract_json::<AgentResponse>(&response.text) {
        Some(parsed) => Ok(parsed.action),
        None => Ok(AgentAction::Silent),
    }
}
