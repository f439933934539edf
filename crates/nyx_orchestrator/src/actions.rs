//! Agent action and memory-operation shapes (§9: "duck-typed JSON dispatch
//! tables become tagged enum variants"). The agent stage parses the LLM's
//! JSON response into one [`AgentAction`]; the persist stage parses a list
//! of [`MemoryOp`]s out of the memory saver's response.

use serde::Deserialize;

/// One of `{reply, web_search, generate_image, run_python_analysis}` (§4.6
/// agent stage). `monologue` is carried through for logging but never
/// surfaced to the user.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentResponse {
    #[serde(default)]
    pub monologue: String,
    pub action: AgentAction,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "action", content = "args", rename_all = "snake_case")]
pub enum AgentAction {
    Reply { response: String },
    WebSearch { query: String },
    GenerateImage { prompt: String },
    RunPythonAnalysis { code: String },
    /// §4.7 proactive path only: the agent decided not to initiate. Never
    /// produced by the normal agent prompt, which always asks for a reply
    /// or a tool call.
    Silent,
}

impl AgentAction {
    /// Tool name as dispatched to the Tool Executor (§4.10), or `None` for
    /// the terminal `reply`/`silent` actions.
    pub fn tool_name(&self) -> Option<&'static str> {
        match self {
            AgentAction::Reply { .. } | AgentAction::Silent => None,
            AgentAction::WebSearch { .. } => Some("web_search"),
            AgentAction::GenerateImage { .. } => Some("generate_image"),
            AgentAction::RunPythonAnalysis { .. } => Some("run_python_analysis"),
        }
    }

    pub fn tool_arg(&self) -> String {
        match self {
            AgentAction::Reply { response } => response.clone(),
            AgentAction::WebSearch { query } => query.clone(),
            AgentAction::GenerateImage { prompt } => prompt.clone(),
            AgentAction::RunPythonAnalysis { code } => code.clone(),
            AgentAction::Silent => String::new(),
        }
    }
}

/// §4.6 persist stage: a single structured memory extraction. Each `add`
/// op becomes a new episodic memory; there is no update/remove variant.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryOp {
    pub category: String,
    pub content: String,
    pub importance: i32,
}

#[derive(Debug, Deserialize, Default)]
pub struct MemoryOpsResponse {
    #[serde(default)]
    pub ops: Vec<MemoryOp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reply_action() {
        let json = r#"{"monologue":"thinking","action":"reply","args":{"response":"hi"}}"#;
        let parsed: AgentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.action, AgentAction::Reply { response: "hi".to_string() });
    }

    #[test]
    fn parses_web_search_action() {
        let json = r#"{"action":"web_search","args":{"query":"weather today"}}"#;
        let parsed: AgentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.action.tool_name(), Some("web_search"));
    }

    #[test]
    fn memory_ops_default_to_empty() {
        let parsed: MemoryOpsResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.ops.is_empty());
    }
}
