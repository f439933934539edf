//! Proactive Scheduler (C7, §4.7): a single long-lived ticker that scans
//! the sessions the Ingress has recently seen and, per session, evaluates a
//! time-of-day gate, a stamina gate, and a silence-window gate before
//! sampling a fire probability and driving the orchestrator down its
//! proactive path. Grounded on the teacher's `PresenceScheduler` for the
//! "state-aware interval" shape and `SocialTriggerEvaluator` for the
//! gate-then-sample-then-fire structure, generalized here from a single
//! social trigger to the full per-session-kind/intimacy-tier rule set in
//! §4.7. The per-session mutex gate ("if the session mutex is held, skip")
//! is enforced by `SessionOrchestrator::try_run_proactive`'s `try_lock`,
//! not here.

use crate::active_sessions::SessionMeta;
use crate::pipeline::{PipelineInput, PipelineOutcome};
use crate::session::SessionOrchestrator;
use chrono::{DateTime, Datelike, Timelike, Utc};
use nyx_affect::AffectStore;
use nyx_memory::RelationshipStore;
use nyx_onebot::MessageKind;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// §4.7 "Stamina gate": `stamina < 20 -> skip`.
const STAMINA_GATE: f32 = 20.0;
/// §4.7 "Time-of-day gate: active windows [09-12, 14-17, 19-22]".
const DAYTIME_WINDOWS: &[(u32, u32)] = &[(9, 12), (14, 17), (19, 22)];
const BASE_PROBABILITY: f64 = 0.3;
const PROBABILITY_MIN: f64 = 0.03;
const PROBABILITY_MAX: f64 = 0.85;

/// §4.7's per-session-kind, per-intimacy-tier silence bucket. Group
/// sessions don't have an intimacy dimension of their own, so they get a
/// single tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceTier {
    Group,
    PrivateHighIntimacy,
    PrivateMidIntimacy,
    PrivateLowIntimacy,
}

pub fn silence_tier(kind: MessageKind, intimacy: i32) -> SilenceTier {
    match kind {
        MessageKind::Group => SilenceTier::Group,
        MessageKind::Private if intimacy > 70 => SilenceTier::PrivateHighIntimacy,
        MessageKind::Private if intimacy >= 30 => SilenceTier::PrivateMidIntimacy,
        MessageKind::Private => SilenceTier::PrivateLowIntimacy,
    }
}

/// §4.7 silence-window bounds in minutes, before the weekend adjustment:
/// "Group: [10 min, 2h]... Private, intimacy>70: [5 min, 120 min];
/// intimacy 30-70: [15 min, 360 min]; intimacy<30: [30 min, 720 min]".
fn base_silence_bounds_minutes(tier: SilenceTier) -> (i64, i64) {
    match tier {
        SilenceTier::Group => (10, 120),
        SilenceTier::PrivateHighIntimacy => (5, 120),
        SilenceTier::PrivateMidIntimacy => (15, 360),
        SilenceTier::PrivateLowIntimacy => (30, 720),
    }
}

/// §4.7: "weekends widen the [group] window slightly"; "Weekend tightens
/// [private] `min` by factor 0.7".
pub fn silence_bounds_minutes(tier: SilenceTier, is_weekend: bool) -> (i64, i64) {
    let (min, max) = base_silence_bounds_minutes(tier);
    if !is_weekend {
        return (min, max);
    }
    match tier {
        SilenceTier::Group => (min, (max as f64 * 1.2).round() as i64),
        _ => (((min as f64) * 0.7).round() as i64, max),
    }
}

fn is_daytime_window(hour: u32) -> bool {
    DAYTIME_WINDOWS.iter().any(|&(start, end)| hour >= start && hour < end)
}

/// §4.7 time-of-day gate: only group sessions are restricted to the
/// daytime windows; private sessions are gated purely by their silence
/// window.
pub fn time_of_day_gate(tier: SilenceTier, local_hour: u32) -> bool {
    match tier {
        SilenceTier::Group => is_daytime_window(local_hour),
        _ => true,
    }
}

/// §4.7 silence gate: `silence_hours ∈ [min, max]` (expressed in minutes
/// internally since the tightest bound, 5 minutes, doesn't divide evenly
/// into whole hours).
pub fn silence_gate(tier: SilenceTier, silence: chrono::Duration, is_weekend: bool) -> bool {
    let (min, max) = silence_bounds_minutes(tier, is_weekend);
    let minutes = silence.num_minutes();
    minutes >= min && minutes <= max
}

/// §4.7: "base 0.3 scaled by intimacy/familiarity/trust/interest factors
/// and a silence curve (rises linearly to 6h, plateaus to 12h, decays
/// after)".
fn silence_curve(silence_hours: f64) -> f64 {
    if silence_hours <= 6.0 {
        (silence_hours / 6.0).clamp(0.0, 1.0)
    } else if silence_hours <= 12.0 {
        1.0
    } else {
        (1.0 - (silence_hours - 12.0) / 12.0).max(0.1)
    }
}

/// §4.7: "Feedback score (±1) from prior proactive outcomes multiplies by
/// `1 + 1.5·feedback_factor`. Cap at [0.03, 0.85]." The relation factor
/// scales the base rate by how close the relationship is; `feedback_factor`
/// is supplied by the caller (this module doesn't decide how outcomes are
/// scored, only how the score feeds back into the rate — see
/// `ProactiveScheduler::record_feedback`).
pub fn fire_probability(intimacy: i32, familiarity: i32, trust: i32, interest_match: i32, silence: chrono::Duration, feedback_factor: f64) -> f64 {
    let relation_factor = ((intimacy + familiarity + trust + interest_match) as f64 / 400.0).clamp(0.0, 1.0);
    let silence_hours = silence.num_minutes() as f64 / 60.0;
    let base = BASE_PROBABILITY * (0.5 + 0.5 * relation_factor) * silence_curve(silence_hours);
    let adjusted = base * (1.0 + 1.5 * feedback_factor.clamp(-1.0, 1.0));
    adjusted.clamp(PROBABILITY_MIN, PROBABILITY_MAX)
}

/// §4.7 post-processing: "post-processed to strip AI-artifactual phrasing
/// and to fit the persona's short-sentence style (≤ 25 chars typical)".
const AI_ARTIFACT_PREFIXES: &[&str] =
    &["as an ai", "as an ai assistant", "i am an ai", "i'm an ai", "as a language model", "作为一个ai", "作为一个人工智能"];
/// Typical target length in characters; not a hard truncation limit, just
/// where the first-sentence cut stops reaching further.
const TYPICAL_LEN: usize = 25;

pub fn humanize_proactive_message(raw: &str) -> String {
    let trimmed = raw.trim();
    let lower = trimmed.to_lowercase();
    let mut text = trimmed.to_string();
    for prefix in AI_ARTIFACT_PREFIXES {
        if lower.starts_with(prefix) {
            text = trimmed[prefix.len()..].trim_start_matches([',', '.', ':', '-', '，', '：']).trim().to_string();
            break;
        }
    }

    if let Some((idx, ch)) = text.char_indices().find(|&(_, c)| matches!(c, '。' | '.' | '!' | '?' | '！' | '？')) {
        text.truncate(idx + ch.len_utf8());
    }

    if text.chars().count() > TYPICAL_LEN * 2 {
        text = text.chars().take(TYPICAL_LEN * 2).collect();
    }

    if text.trim().is_empty() {
        trimmed.to_string()
    } else {
        text
    }
}

/// Per-session feedback accumulator (§4.7: "Feedback score (±1) from prior
/// proactive outcomes"). How this signal is scored is left open, so this
/// engine exposes `record_feedback` for an external caller (e.g. the wire
/// adapter noticing a reply or a block) to set it; it defaults to neutral.
#[derive(Default)]
struct FeedbackTable {
    scores: HashMap<String, f64>,
}

pub struct ProactiveScheduler {
    orchestrator: Arc<SessionOrchestrator>,
    relationships: Arc<RelationshipStore>,
    affect: AffectStore,
    active_window: chrono::Duration,
    feedback: Mutex<FeedbackTable>,
}

impl ProactiveScheduler {
    pub fn new(orchestrator: Arc<SessionOrchestrator>, relationships: Arc<RelationshipStore>, affect: AffectStore, active_session_window_hours: i64) -> Self {
        Self {
            orchestrator,
            relationships,
            affect,
            active_window: chrono::Duration::hours(active_session_window_hours),
            feedback: Mutex::new(FeedbackTable::default()),
        }
    }

    /// Records a ±1-scaled outcome score for a session's last proactive
    /// message (e.g. the user replied warmly vs. ignored/complained),
    /// feeding §4.7's feedback multiplier on the next tick.
    pub async fn record_feedback(&self, sanitized_session_id: &str, score: f64) {
        self.feedback.lock().await.scores.insert(sanitized_session_id.to_string(), score.clamp(-1.0, 1.0));
    }

    async fn feedback_factor(&self, sanitized_session_id: &str) -> f64 {
        *self.feedback.lock().await.scores.get(sanitized_session_id).unwrap_or(&0.0)
    }

    /// One scan of every recently active session. Returns the sessions that
    /// actually fired, paired with their outcome, for the caller to route
    /// to the wire. The stamina gate is process-wide and checked once up
    /// front rather than per session.
    pub async fn tick(&self) -> Vec<(SessionMeta, PipelineOutcome)> {
        let affect = self.affect.snapshot().await;
        if affect.stamina < STAMINA_GATE {
            tracing::debug!(stamina = affect.stamina, "proactive tick skipped: stamina gate");
            return Vec::new();
        }

        let now = Utc::now();
        let sessions = self.orchestrator.active_sessions().active_within(self.active_window).await;
        let mut fired = Vec::new();
        for meta in sessions {
            if let Some(outcome) = self.evaluate_and_fire(&meta, now).await {
                fired.push((meta, outcome));
            }
        }
        fired
    }

    async fn evaluate_and_fire(&self, meta: &SessionMeta, now: DateTime<Utc>) -> Option<PipelineOutcome> {
        let profile = match self.relationships.get(meta.user_id.0.as_str(), Some(&meta.sender_display_name)).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, session = %meta.session_id, "proactive scan: relationship lookup failed, skipping session");
                return None;
            }
        };

        let tier = silence_tier(meta.session_kind, profile.intimacy);
        let local_now = chrono::Local::now();
        let is_weekend = matches!(local_now.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun);

        if !time_of_day_gate(tier, local_now.hour()) {
            return None;
        }

        let silence = now - profile.last_interaction_time;
        if !silence_gate(tier, silence, is_weekend) {
            return None;
        }

        let feedback = self.feedback_factor(&meta.session_id.sanitized()).await;
        let probability = fire_probability(profile.intimacy, profile.familiarity, profile.trust, profile.interest_match, silence, feedback);
        let draw: f64 = rand::thread_rng().gen_range(0.0..1.0);
        if draw >= probability {
            return None;
        }

        let input = PipelineInput {
            session_id: meta.session_id.clone(),
            user_id: meta.user_id.clone(),
            session_kind: meta.session_kind,
            sender_display_name: meta.sender_display_name.clone(),
            group_id: meta.group_id,
            messages: Vec::new(),
            is_mentioned: false,
            is_proactive: true,
        };
        self.orchestrator.try_run_proactive(input).await.filter(|outcome| outcome.assistant_message.is_some())
    }

    /// Spawns the ticker (§4.7 default every 60s) with cooperative
    /// cancellation (§5: "the ticker exits on next loop, in-flight
    /// pipelines run to completion"). `on_fire` routes each produced
    /// outbound message to the wire.
    pub fn spawn<F, Fut>(self: Arc<Self>, tick_interval: Duration, cancel: CancellationToken, on_fire: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(SessionMeta, PipelineOutcome) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("proactive scheduler shutting down");
                        return;
                    }
                    _ = interval.tick() => {
                        for (meta, outcome) in self.tick().await {
                            on_fire(meta, outcome).await;
                        }
                    }
                }
            }
        })
    }
}
