//! Gating / filter stage (§4.6), grounded on the teacher's
//! `decision::DecisionRouter`: an ordered sequence of checks, first match
//! wins, with an explicit default at the end (`FullReasoning` there,
//! `FilterDecision::Reply` or `Silent` here).

use crate::pipeline::{FilterDecision, PipelineInput};
use nyx_onebot::MessageKind;
use rand::Rng;

/// §4.6: "respond with a contextually chosen stored emoji or a default
/// emoji glyph". These are the defaults when no stored per-user emoji is
/// available.
pub const DEFAULT_STICKER_EMOJI: &[&str] = &["🐶", "🐱", "💖", "💕", "💝", "🤗", "👻", "👽"];

const STICKER_SHORTCUT_PROBABILITY: f64 = 0.6;
const STICKER_TEXT_LEN_THRESHOLD: usize = 2;

pub struct FilterStage;

impl FilterStage {
    /// `group_policy_allows` covers the policy-defined condition that can
    /// admit a non-mention group message (e.g. a direct reply to the
    /// bot's own prior message) — callers compute this from history.
    pub fn evaluate(input: &PipelineInput, group_policy_allows: bool) -> FilterDecision {
        Self::evaluate_with_rng(input, group_policy_allows, &mut rand::thread_rng())
    }

    pub fn evaluate_with_rng(input: &PipelineInput, group_policy_allows: bool, rng: &mut impl Rng) -> FilterDecision {
        let cleaned_text_len = input.combined_text().trim().chars().count();

        if input.lone_image_url().is_some() && cleaned_text_len < STICKER_TEXT_LEN_THRESHOLD {
            return if rng.gen_bool(STICKER_SHORTCUT_PROBABILITY) {
                FilterDecision::ShortcutSticker
            } else {
                FilterDecision::ShortcutSilent
            };
        }

        if input.session_kind == MessageKind::Group && !input.is_mentioned && !group_policy_allows {
            return FilterDecision::Silent { reason: "group message without mention".to_string() };
        }

        if input.messages.is_empty() && !input.is_proactive {
            return FilterDecision::Silent { reason: "empty batch".to_string() };
        }

        FilterDecision::Reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nyx_core::{SessionId, UserId};
    use nyx_onebot::Segment;
    use rand::rngs::mock::StepRng;

    fn base_input() -> PipelineInput {
        PipelineInput {
            session_id: SessionId::from("s1"),
            user_id: UserId::from("u1"),
            session_kind: MessageKind::Private,
            sender_display_name: "alice".to_string(),
            group_id: None,
            messages: vec![crate::pipeline::InboundText { text: "hello".to_string(), segments: vec![] }],
            is_mentioned: false,
            is_proactive: false,
        }
    }

    #[test]
    fn private_message_always_replies() {
        let input = base_input();
        assert_eq!(FilterStage::evaluate(&input, false), FilterDecision::Reply);
    }

    #[test]
    fn group_message_without_mention_is_silent() {
        let mut input = base_input();
        input.session_kind = MessageKind::Group;
        input.group_id = Some(1);
        assert!(matches!(FilterStage::evaluate(&input, false), FilterDecision::Silent { .. }));
    }

    #[test]
    fn group_message_with_mention_replies() {
        let mut input = base_input();
        input.session_kind = MessageKind::Group;
        input.is_mentioned = true;
        assert_eq!(FilterStage::evaluate(&input, false), FilterDecision::Reply);
    }

    #[test]
    fn group_policy_condition_admits_without_mention() {
        let mut input = base_input();
        input.session_kind = MessageKind::Group;
        assert_eq!(FilterStage::evaluate(&input, true), FilterDecision::Reply);
    }

    #[test]
    fn lone_sticker_with_short_text_shortcuts() {
        let mut input = base_input();
        input.messages = vec![crate::pipeline::InboundText {
            text: String::new(),
            segments: vec![Segment::Image { url: Some("http://x/sticker.png".to_string()), is_sticker_hint: true }],
        }];
        // StepRng always yields the same value; with gen_bool(0.6) a low
        // starting value is "true" (below the threshold).
        let mut always_low = StepRng::new(0, 1);
        assert_eq!(FilterStage::evaluate_with_rng(&input, false, &mut always_low), FilterDecision::ShortcutSticker);
    }

    #[test]
    fn lone_sticker_with_high_roll_goes_silent() {
        let mut input = base_input();
        input.messages = vec![crate::pipeline::InboundText {
            text: String::new(),
            segments: vec![Segment::Image { url: Some("http://x/sticker.png".to_string()), is_sticker_hint: true }],
        }];
        let mut always_high = StepRng::new(u64::MAX, 1);
        assert_eq!(FilterStage::evaluate_with_rng(&input, false, &mut always_high), FilterDecision::ShortcutSilent);
    }
}
