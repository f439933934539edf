//! Request-scoped pipeline state threaded through the orchestrator stages
//! (§4.6: "filter -> {parallel, shortcut, silent} -> agent -> {tool ->
//! agent | persist} -> summarize -> end").

use crate::visual::VisualType;
use nyx_core::{SessionId, UserId};
use nyx_onebot::{MessageKind, Segment};

/// One run's input: either a debounced batch of inbound messages, or a
/// synthetic proactive trigger (§4.7: "synthesizes a Pipeline State with
/// `is_proactive=true`, an empty new-message list").
#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub session_kind: MessageKind,
    pub sender_display_name: String,
    pub group_id: Option<i64>,
    pub messages: Vec<InboundText>,
    pub is_mentioned: bool,
    pub is_proactive: bool,
}

#[derive(Debug, Clone)]
pub struct InboundText {
    pub text: String,
    pub segments: Vec<Segment>,
}

impl PipelineInput {
    /// All text segments concatenated, newline-joined (§4.6 gating: "last
    /// message content").
    pub fn combined_text(&self) -> String {
        self.messages.iter().map(|m| m.text.as_str()).collect::<Vec<_>>().join("\n")
    }

    /// The lone sticker/image url, if this batch carries exactly one
    /// image-bearing segment and no other segments beyond text.
    pub fn lone_image_url(&self) -> Option<String> {
        let mut found = None;
        for msg in &self.messages {
            for seg in &msg.segments {
                if let Segment::Image { url: Some(url), .. } = seg {
                    if found.is_some() {
                        return None;
                    }
                    found = Some(url.clone());
                }
            }
        }
        found
    }

    pub fn has_any_image(&self) -> bool {
        self.messages.iter().any(|m| m.segments.iter().any(|s| matches!(s, Segment::Image { .. })))
    }
}

/// Outcome of the gating stage (§4.6 "Gating (filter stage)").
#[derive(Debug, Clone, PartialEq)]
pub enum FilterDecision {
    /// Proceed to the parallel fan-out and agent stage.
    Reply,
    /// Skip straight to a contextual emoji/sticker reply.
    ShortcutSticker,
    /// Skip straight to persist with no outbound message.
    ShortcutSilent,
    /// `should_reply=false`: persist only, no outbound message.
    Silent { reason: String },
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub assistant_message: Option<String>,
    pub visual_type: VisualType,
}

impl PipelineOutcome {
    pub fn silent() -> Self {
        Self { assistant_message: None, visual_type: VisualType::None }
    }
}
