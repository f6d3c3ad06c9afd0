use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Execution,
    Error,
    CodeChange,
    HintRequest,
    HintView,
    ExplanationView,
    GuidanceRequest,
    GuidanceView,
    GuidanceEscalate,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Execution => "execution",
            Self::Error => "error",
            Self::CodeChange => "code_change",
            Self::HintRequest => "hint_request",
            Self::HintView => "hint_view",
            Self::ExplanationView => "explanation_view",
            Self::GuidanceRequest => "guidance_request",
            Self::GuidanceView => "guidance_view",
            Self::GuidanceEscalate => "guidance_escalate",
        }
    }

    /// Requests for help initiated by the learner.
    pub fn is_help_request(&self) -> bool {
        matches!(self, Self::HintRequest | Self::GuidanceRequest)
    }

    /// Any event that exposed the learner to hint or guidance content.
    pub fn is_hint_like(&self) -> bool {
        matches!(
            self,
            Self::HintRequest | Self::HintView | Self::GuidanceRequest | Self::GuidanceView
        )
    }

    /// Hint-like events plus explanation views.
    pub fn is_assistance(&self) -> bool {
        self.is_hint_like() || matches!(self, Self::ExplanationView)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "execution" => Ok(Self::Execution),
            "error" => Ok(Self::Error),
            "code_change" => Ok(Self::CodeChange),
            "hint_request" => Ok(Self::HintRequest),
            "hint_view" => Ok(Self::HintView),
            "explanation_view" => Ok(Self::ExplanationView),
            "guidance_request" => Ok(Self::GuidanceRequest),
            "guidance_view" => Ok(Self::GuidanceView),
            "guidance_escalate" => Ok(Self::GuidanceEscalate),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// A single learner interaction as recorded by the external event log.
///
/// Timestamps are epoch milliseconds. Streams are not guaranteed to be
/// sorted; every sequential analysis sorts a copy first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEvent {
    pub id: String,
    pub learner_id: String,
    pub problem_id: String,
    pub timestamp: i64,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_subtype_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,
}

impl InteractionEvent {
    pub fn new(
        learner_id: impl Into<String>,
        problem_id: impl Into<String>,
        event_type: EventType,
        timestamp: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            learner_id: learner_id.into(),
            problem_id: problem_id.into(),
            timestamp,
            event_type,
            error_subtype_id: None,
            hint_level: None,
            successful: None,
        }
    }

    pub fn with_error_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.error_subtype_id = Some(subtype.into());
        self
    }

    pub fn with_hint_level(mut self, level: u8) -> Self {
        self.hint_level = Some(level);
        self
    }

    pub fn with_success(mut self, successful: bool) -> Self {
        self.successful = Some(successful);
        self
    }

    pub fn is_successful_execution(&self) -> bool {
        self.event_type == EventType::Execution && self.successful == Some(true)
    }
}

/// Returns a timestamp-ordered copy of the stream. Ties keep insertion order.
pub fn sorted_by_time(interactions: &[InteractionEvent]) -> Vec<&InteractionEvent> {
    let mut sorted: Vec<&InteractionEvent> = interactions.iter().collect();
    sorted.sort_by_key(|e| e.timestamp);
    sorted
}

/// Outcome of one completed problem, consumed once by the reward calculator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningOutcome {
    pub solved: bool,
    pub used_explanation: bool,
    pub error_count: u32,
    pub baseline_errors: u32,
    pub time_spent_ms: i64,
    pub median_time_ms: i64,
    pub hdi_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Rung {
    MicroHint,
    Explanation,
    ReflectiveNote,
}

impl Rung {
    pub const ALL: [Rung; 3] = [Rung::MicroHint, Rung::Explanation, Rung::ReflectiveNote];

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::MicroHint => 1,
            Self::Explanation => 2,
            Self::ReflectiveNote => 3,
        }
    }

    pub fn next(&self) -> Option<Rung> {
        match self {
            Self::MicroHint => Some(Self::Explanation),
            Self::Explanation => Some(Self::ReflectiveNote),
            Self::ReflectiveNote => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ReflectiveNote)
    }

    pub(crate) fn index(&self) -> usize {
        self.as_u8() as usize - 1
    }
}

impl TryFrom<u8> for Rung {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::MicroHint),
            2 => Ok(Self::Explanation),
            3 => Ok(Self::ReflectiveNote),
            other => Err(format!("rung out of range: {other}")),
        }
    }
}

impl From<Rung> for u8 {
    fn from(rung: Rung) -> Self {
        rung.as_u8()
    }
}

impl fmt::Display for Rung {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rung {}", self.as_u8())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProblemDifficulty {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

impl ProblemDifficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "beginner" => Self::Beginner,
            "advanced" => Self::Advanced,
            _ => Self::Intermediate,
        }
    }
}
