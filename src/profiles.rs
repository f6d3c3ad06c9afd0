//! Escalation profiles: how quickly a struggling learner is moved up the
//! guidance ladder, and the strategies for assigning one to a learner.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileId {
    Fast,
    Slow,
    Adaptive,
    ExplanationFirst,
}

impl ProfileId {
    pub const ALL: [ProfileId; 4] = [
        ProfileId::Fast,
        ProfileId::Slow,
        ProfileId::Adaptive,
        ProfileId::ExplanationFirst,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Slow => "slow",
            Self::Adaptive => "adaptive",
            Self::ExplanationFirst => "explanation-first",
        }
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(Self::Fast),
            "slow" => Ok(Self::Slow),
            "adaptive" => Ok(Self::Adaptive),
            "explanation-first" => Ok(Self::ExplanationFirst),
            other => Err(format!("unknown escalation profile: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileThresholds {
    /// Struggle score at which a learner moves from hint to explanation.
    pub escalate: u32,
    /// Struggle score at which an explanation is aggregated into a note.
    pub aggregate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileTriggers {
    pub time_stuck_ms: i64,
    pub rung_exhausted: u32,
    pub repeated_error: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationProfile {
    pub id: ProfileId,
    pub name: &'static str,
    pub description: &'static str,
    pub thresholds: ProfileThresholds,
    pub triggers: ProfileTriggers,
}

const FAST: EscalationProfile = EscalationProfile {
    id: ProfileId::Fast,
    name: "Fast Escalation",
    description: "Moves to explanations quickly for learners who stall early",
    thresholds: ProfileThresholds { escalate: 2, aggregate: 4 },
    triggers: ProfileTriggers {
        time_stuck_ms: 30_000,
        rung_exhausted: 2,
        repeated_error: 1,
    },
};

const ADAPTIVE: EscalationProfile = EscalationProfile {
    id: ProfileId::Adaptive,
    name: "Adaptive Escalation",
    description: "Balanced pacing; thresholds are tuned from the learner's recovery history",
    thresholds: ProfileThresholds { escalate: 3, aggregate: 6 },
    triggers: ProfileTriggers {
        time_stuck_ms: 60_000,
        rung_exhausted: 3,
        repeated_error: 2,
    },
};

const SLOW: EscalationProfile = EscalationProfile {
    id: ProfileId::Slow,
    name: "Slow Escalation",
    description: "Leaves room for productive struggle before explaining",
    thresholds: ProfileThresholds { escalate: 5, aggregate: 10 },
    triggers: ProfileTriggers {
        time_stuck_ms: 120_000,
        rung_exhausted: 4,
        repeated_error: 3,
    },
};

const EXPLANATION_FIRST: EscalationProfile = EscalationProfile {
    id: ProfileId::ExplanationFirst,
    name: "Explanation First",
    description: "Skips hint-level guidance and leads with a full explanation",
    thresholds: ProfileThresholds { escalate: 1, aggregate: 3 },
    triggers: ProfileTriggers {
        time_stuck_ms: 15_000,
        rung_exhausted: 1,
        repeated_error: 1,
    },
};

const PROFILES: [EscalationProfile; 4] = [FAST, SLOW, ADAPTIVE, EXPLANATION_FIRST];

pub fn all_profiles() -> &'static [EscalationProfile] {
    &PROFILES
}

/// Returns an owned copy; the canonical definitions cannot be mutated.
pub fn get_profile(id: ProfileId) -> EscalationProfile {
    match id {
        ProfileId::Fast => FAST,
        ProfileId::Slow => SLOW,
        ProfileId::Adaptive => ADAPTIVE,
        ProfileId::ExplanationFirst => EXPLANATION_FIRST,
    }
}

pub fn get_profile_by_id(id: &str) -> Option<EscalationProfile> {
    id.parse().ok().map(get_profile)
}

pub fn get_profile_thresholds(id: &str) -> Option<ProfileThresholds> {
    get_profile_by_id(id).map(|p| p.thresholds)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStrategy {
    Static,
    Diagnostic,
    Bandit,
}

impl AssignmentStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Diagnostic => "diagnostic",
            Self::Bandit => "bandit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "static" => Some(Self::Static),
            "diagnostic" => Some(Self::Diagnostic),
            "bandit" => Some(Self::Bandit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentContext {
    pub learner_id: String,
    /// Diagnostic persistence score; 0.5 when not yet measured.
    pub persistence_score: Option<f64>,
    /// Diagnostic recovery rate; 0.5 when not yet measured.
    pub recovery_rate: Option<f64>,
}

impl AssignmentContext {
    pub fn new(learner_id: impl Into<String>) -> Self {
        Self {
            learner_id: learner_id.into(),
            ..Default::default()
        }
    }
}

pub fn assign_profile(context: &AssignmentContext, strategy: AssignmentStrategy) -> EscalationProfile {
    let id = match strategy {
        AssignmentStrategy::Static => static_bucket(static_hash(&context.learner_id)),
        AssignmentStrategy::Diagnostic => diagnostic_bucket(
            context.persistence_score.unwrap_or(0.5),
            context.recovery_rate.unwrap_or(0.5),
        ),
        // Per-learner selection happens in the learner bandit manager.
        AssignmentStrategy::Bandit => ProfileId::Adaptive,
    };
    debug!(
        learner_id = %context.learner_id,
        strategy = strategy.as_str(),
        profile = id.as_str(),
        "escalation profile assigned"
    );
    get_profile(id)
}

/// String-keyed entry point; unrecognized strategies get the adaptive profile.
pub fn assign_profile_by_name(context: &AssignmentContext, strategy: &str) -> EscalationProfile {
    match AssignmentStrategy::parse(strategy) {
        Some(strategy) => assign_profile(context, strategy),
        None => {
            debug!(strategy, "unknown assignment strategy, using adaptive");
            get_profile(ProfileId::Adaptive)
        }
    }
}

/// 32-bit rolling hash over UTF-16 code units, normalized to roughly [0, 1).
pub fn static_hash(learner_id: &str) -> f64 {
    let mut hash: i32 = 0;
    for unit in learner_id.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(unit as i32);
    }
    (hash as f64).abs() / 2_147_483_647.0
}

fn static_bucket(value: f64) -> ProfileId {
    if value < 0.33 {
        ProfileId::Fast
    } else if value < 0.67 {
        ProfileId::Adaptive
    } else {
        ProfileId::Slow
    }
}

/// Scores are averaged without clamping; out-of-range inputs still fall into
/// one of the three buckets.
fn diagnostic_bucket(persistence_score: f64, recovery_rate: f64) -> ProfileId {
    let score = (persistence_score + recovery_rate) / 2.0;
    if score > 0.7 {
        ProfileId::Slow
    } else if score < 0.3 {
        ProfileId::Fast
    } else {
        ProfileId::Adaptive
    }
}
