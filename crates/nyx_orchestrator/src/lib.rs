//! Session Orchestrator (C6), Proactive Scheduler (C7), and Tool Executor
//! (C10) — the engine's per-message decision pipeline and the two
//! scheduler loops that drive it outside of inbound traffic.

pub mod actions;
pub mod active_sessions;
pub mod agent;
pub mod filter;
pub mod json_extract;
pub mod perception;
pub mod persist;
pub mod pipeline;
pub mod proactive;
pub mod psychology;
pub mod session;
pub mod tools;
pub mod visual;

pub use actions::{AgentAction, AgentResponse, MemoryOp, MemoryOpsResponse};
pub use active_sessions::{ActiveSessionRegistry, SessionMeta};
pub use filter::FilterStage;
pub use perception::ImagePerception;
pub use persist::{LlmMemorySaver, LlmSummarizer, SaveMode};
pub use pipeline::{FilterDecision, InboundText, PipelineInput, PipelineOutcome};
pub use proactive::{humanize_proactive_message, ProactiveScheduler, SilenceTier};
pub use psychology::PsychologyResult;
pub use session::SessionOrchestrator;
pub use tools::{GenerateImageTool, RunPythonAnalysisTool, ToolHandler, ToolOutput, ToolRegistry, WebSearchTool};
pub use visual::{VisualClassifier, VisualKind, VisualType};
