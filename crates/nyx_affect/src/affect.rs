//! The affect snapshot (§3, §4.1): a process-wide mood vector with inertia.
//!
//! Unlike a discrete emotion enum, the numeric fields are continuous so mood
//! can drift smoothly; `primary_emotion`/`secondary_emotion` are opaque
//! labels derived from (or overridden on top of) the numeric state for
//! display and prompt injection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Process-wide mood vector. All numeric fields are guaranteed to stay
/// within their declared ranges by construction — every mutation goes
/// through [`Affect::apply_update`], which clamps rather than rejects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Affect {
    /// -1.0 (very negative) .. 1.0 (very positive)
    pub valence: f32,
    /// 0.0 (calm) .. 1.0 (activated)
    pub arousal: f32,
    /// 0.0 .. 1.0
    pub stress: f32,
    /// 0.0 .. 1.0
    pub fatigue: f32,
    /// 0.0 .. 100.0
    pub stamina: f32,
    pub primary_emotion: String,
    pub secondary_emotion: Option<String>,
    pub last_updated: DateTime<Utc>,
    /// Fixed at construction; EMA smoothing factor for §4.1 step 3.
    pub mood_inertia: f32,
}

/// A bounded nudge to the affect vector. Each field is clipped to its
/// declared range *before* being applied (§4.1 step 1) — callers cannot
/// force a discontinuous jump by passing an extreme delta.
#[derive(Debug, Clone, Default)]
pub struct AffectDelta {
    pub valence: f32,
    pub arousal: f32,
    pub stress: f32,
    pub fatigue: f32,
    pub stamina: f32,
    pub new_primary: Option<String>,
    pub new_secondary: Option<String>,
}

const VALENCE_AROUSAL_DELTA_CLAMP: f32 = 0.4;
const STRESS_FATIGUE_DELTA_CLAMP: f32 = 0.2;
const DEFAULT_MOOD_INERTIA: f32 = 0.75;

impl Default for Affect {
    fn default() -> Self {
        Self {
            valence: 0.0,
            arousal: 0.2,
            stress: 0.1,
            fatigue: 0.1,
            stamina: 80.0,
            primary_emotion: "平静".to_string(),
            secondary_emotion: None,
            last_updated: Utc::now(),
            mood_inertia: DEFAULT_MOOD_INERTIA,
        }
    }
}

impl Affect {
    pub fn new(mood_inertia: f32) -> Self {
        Self {
            mood_inertia: mood_inertia.clamp(0.0, 1.0),
            ..Self::default()
        }
    }

    /// Apply a delta per §4.1's six-step algorithm. Never fails; always
    /// leaves every field within its declared range.
    pub fn apply_update(&mut self, delta: &AffectDelta) {
        let dv = delta.valence.clamp(-VALENCE_AROUSAL_DELTA_CLAMP, VALENCE_AROUSAL_DELTA_CLAMP);
        let da = delta.arousal.clamp(-VALENCE_AROUSAL_DELTA_CLAMP, VALENCE_AROUSAL_DELTA_CLAMP);
        let ds = delta.stress.clamp(-STRESS_FATIGUE_DELTA_CLAMP, STRESS_FATIGUE_DELTA_CLAMP);
        let df = delta.fatigue.clamp(-STRESS_FATIGUE_DELTA_CLAMP, STRESS_FATIGUE_DELTA_CLAMP);

        let target_v = (self.valence + dv).clamp(-1.0, 1.0);
        let target_a = (self.arousal + da).clamp(0.0, 1.0);
        let target_s = (self.stress + ds).clamp(0.0, 1.0);
        let target_f = (self.fatigue + df).clamp(0.0, 1.0);

        let i = self.mood_inertia;
        self.valence = (self.valence * i + target_v * (1.0 - i)).clamp(-1.0, 1.0);
        self.arousal = (self.arousal * i + target_a * (1.0 - i)).clamp(0.0, 1.0);
        self.stress = (self.stress * i + target_s * (1.0 - i)).clamp(0.0, 1.0);
        self.fatigue = (self.fatigue * i + target_f * (1.0 - i)).clamp(0.0, 1.0);

        self.stamina = (self.stamina + delta.stamina).clamp(0.0, 100.0);

        match &delta.new_primary {
            Some(label) => self.primary_emotion = label.clone(),
            None => self.primary_emotion = derive_primary_emotion(self.valence, self.arousal).to_string(),
        }
        if delta.new_secondary.is_some() {
            self.secondary_emotion = delta.new_secondary.clone();
        }

        self.last_updated = Utc::now();
    }
}

/// Quadrant-based label derivation, first match wins (§4.1).
pub fn derive_primary_emotion(v: f32, a: f32) -> &'static str {
    if v > 0.6 && a > 0.6 {
        "兴高采烈"
    } else if v > 0.3 && a > 0.3 {
        "开心"
    } else if v > 0.2 && a <= 0.3 {
        "惬意"
    } else if v < -0.6 && a > 0.6 {
        "愤怒"
    } else if v < -0.3 && a > 0.3 {
        "烦躁"
    } else if v < -0.3 && a <= 0.3 {
        "沮丧"
    } else if v.abs() < 0.2 && a < 0.2 {
        "困倦/发呆"
    } else {
        "平静"
    }
}
