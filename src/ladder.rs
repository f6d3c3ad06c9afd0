//! Guidance ladder: the per (learner, problem) escalation state machine.
//!
//! Rung 1 is a micro-hint, rung 2 a grounded explanation and rung 3 a
//! reflective note. States are values: every transition returns a new state.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::LadderError;
use crate::profiles::{get_profile, EscalationProfile, ProfileId, ProfileTriggers};
use crate::types::{sorted_by_time, EventType, InteractionEvent, Rung};

/// How many of the problem's latest errors are inspected for repeats.
const RECENT_ERROR_LOOKBACK: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    RungExhausted,
    RepeatedError,
    TimeStuck,
    LearnerRequest,
    HintReopened,
    AutoEscalationEligible,
}

impl EscalationTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RungExhausted => "rung_exhausted",
            Self::RepeatedError => "repeated_error",
            Self::TimeStuck => "time_stuck",
            Self::LearnerRequest => "learner_request",
            Self::HintReopened => "hint_reopened",
            Self::AutoEscalationEligible => "auto_escalation_eligible",
        }
    }

    /// Learner-initiated triggers skip the counters.
    pub fn is_learner_initiated(&self) -> bool {
        matches!(
            self,
            Self::LearnerRequest | Self::HintReopened | Self::AutoEscalationEligible
        )
    }
}

impl fmt::Display for EscalationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EscalationTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rung_exhausted" => Ok(Self::RungExhausted),
            "repeated_error" => Ok(Self::RepeatedError),
            "time_stuck" => Ok(Self::TimeStuck),
            "learner_request" => Ok(Self::LearnerRequest),
            "hint_reopened" => Ok(Self::HintReopened),
            "auto_escalation_eligible" => Ok(Self::AutoEscalationEligible),
            other => Err(format!("unknown escalation trigger: {other}")),
        }
    }
}

/// What was observed when an escalation was evaluated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationEvidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rung_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_subtype_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_stuck_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationRecord {
    pub from_rung: Rung,
    pub to_rung: Rung,
    pub trigger: EscalationTrigger,
    pub timestamp: i64,
    pub evidence: EscalationEvidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationDecision {
    pub allowed: bool,
    pub reason: String,
    pub evidence: EscalationEvidence,
    /// True when a supplied profile's triggers drove the decision.
    pub profile_aware: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidanceLadderState {
    pub learner_id: String,
    pub problem_id: String,
    pub current_rung: Rung,
    pub rung_attempts: [u32; 3],
    pub escalation_history: Vec<EscalationRecord>,
    pub current_concept_ids: Vec<String>,
    pub grounded_in_sources: bool,
    pub started_at: i64,
}

impl GuidanceLadderState {
    pub fn new(learner_id: impl Into<String>, problem_id: impl Into<String>, started_at: i64) -> Self {
        Self {
            learner_id: learner_id.into(),
            problem_id: problem_id.into(),
            current_rung: Rung::MicroHint,
            rung_attempts: [0; 3],
            escalation_history: Vec::new(),
            current_concept_ids: Vec::new(),
            grounded_in_sources: false,
            started_at,
        }
    }

    pub fn attempts_at(&self, rung: Rung) -> u32 {
        self.rung_attempts[rung.index()]
    }

    pub fn is_terminal(&self) -> bool {
        self.current_rung.is_terminal()
    }

    pub fn record_rung_attempt(&self) -> Self {
        let mut next = self.clone();
        next.rung_attempts[self.current_rung.index()] += 1;
        next
    }

    pub fn with_grounding(&self, grounded: bool) -> Self {
        let mut next = self.clone();
        next.grounded_in_sources = grounded;
        next
    }

    /// Moves one rung up. Rejected without changes at the top rung.
    pub fn escalate(
        &self,
        trigger: EscalationTrigger,
        evidence: EscalationEvidence,
        concept_ids: &[String],
        timestamp: i64,
    ) -> Result<Self, LadderError> {
        let to_rung = self.current_rung.next().ok_or(LadderError::MaxRungReached {
            rung: self.current_rung,
        })?;

        let mut next = self.clone();
        next.escalation_history.push(EscalationRecord {
            from_rung: self.current_rung,
            to_rung,
            trigger,
            timestamp,
            evidence,
        });
        next.current_rung = to_rung;
        for id in concept_ids {
            if !next.current_concept_ids.contains(id) {
                next.current_concept_ids.push(id.clone());
            }
        }

        info!(
            learner_id = %self.learner_id,
            problem_id = %self.problem_id,
            from = self.current_rung.as_u8(),
            to = to_rung.as_u8(),
            trigger = trigger.as_str(),
            "guidance escalated"
        );
        Ok(next)
    }
}

pub fn can_escalate(
    state: &GuidanceLadderState,
    trigger: EscalationTrigger,
    interactions: &[InteractionEvent],
    profile: Option<&EscalationProfile>,
) -> EscalationDecision {
    can_escalate_at(
        state,
        trigger,
        interactions,
        profile,
        chrono::Utc::now().timestamp_millis(),
    )
}

/// Same as [`can_escalate`] with an explicit clock for time-based triggers.
pub fn can_escalate_at(
    state: &GuidanceLadderState,
    trigger: EscalationTrigger,
    interactions: &[InteractionEvent],
    profile: Option<&EscalationProfile>,
    now_ms: i64,
) -> EscalationDecision {
    if state.is_terminal() {
        return EscalationDecision {
            allowed: false,
            reason: "maximum rung reached".to_string(),
            evidence: EscalationEvidence::default(),
            profile_aware: false,
        };
    }

    let triggers = effective_triggers(profile);
    let profile_aware = profile.is_some() && !trigger.is_learner_initiated();

    let (allowed, reason, evidence) = match trigger {
        EscalationTrigger::RungExhausted => {
            let attempts = state.attempts_at(state.current_rung);
            let limit = triggers.rung_exhausted;
            (
                attempts >= limit,
                format!("{attempts} attempts at {} (limit {limit})", state.current_rung),
                EscalationEvidence {
                    rung_attempts: Some(attempts),
                    threshold: Some(limit as i64),
                    ..Default::default()
                },
            )
        }
        EscalationTrigger::RepeatedError => {
            let required = triggers.repeated_error + 1;
            match most_repeated_error(state, interactions) {
                Some((subtype, count)) => (
                    count >= required,
                    format!("{subtype} seen {count}x (needs {required})"),
                    EscalationEvidence {
                        error_subtype_id: Some(subtype),
                        error_count: Some(count),
                        threshold: Some(required as i64),
                        ..Default::default()
                    },
                ),
                None => (
                    false,
                    "no recent errors".to_string(),
                    EscalationEvidence {
                        threshold: Some(required as i64),
                        ..Default::default()
                    },
                ),
            }
        }
        EscalationTrigger::TimeStuck => {
            let since = last_success_at(state, interactions).unwrap_or(state.started_at);
            let stuck = (now_ms - since).max(0);
            let limit = triggers.time_stuck_ms;
            (
                stuck >= limit,
                format!("stuck for {stuck}ms (limit {limit}ms)"),
                EscalationEvidence {
                    time_stuck_ms: Some(stuck),
                    threshold: Some(limit),
                    ..Default::default()
                },
            )
        }
        EscalationTrigger::LearnerRequest
        | EscalationTrigger::HintReopened
        | EscalationTrigger::AutoEscalationEligible => (
            true,
            format!("{trigger} permits escalation"),
            EscalationEvidence::default(),
        ),
    };

    debug!(
        learner_id = %state.learner_id,
        trigger = trigger.as_str(),
        allowed,
        profile_aware,
        "escalation evaluated"
    );

    EscalationDecision {
        allowed,
        reason,
        evidence,
        profile_aware,
    }
}

fn effective_triggers(profile: Option<&EscalationProfile>) -> ProfileTriggers {
    profile
        .map(|p| p.triggers)
        .unwrap_or_else(|| get_profile(ProfileId::Adaptive).triggers)
}

fn belongs_to(state: &GuidanceLadderState, event: &InteractionEvent) -> bool {
    event.problem_id == state.problem_id && event.learner_id == state.learner_id
}

/// Most frequent subtype among the problem's latest errors; ties go to the
/// subtype seen most recently.
fn most_repeated_error(
    state: &GuidanceLadderState,
    interactions: &[InteractionEvent],
) -> Option<(String, u32)> {
    let errors: Vec<&str> = sorted_by_time(interactions)
        .into_iter()
        .filter(|e| belongs_to(state, e) && e.event_type == EventType::Error)
        .filter_map(|e| e.error_subtype_id.as_deref())
        .collect();
    let recent = &errors[errors.len().saturating_sub(RECENT_ERROR_LOOKBACK)..];

    let mut counts: HashMap<&str, u32> = HashMap::new();
    let mut best: Option<(&str, u32)> = None;
    for &subtype in recent {
        let count = counts.entry(subtype).or_insert(0);
        *count += 1;
        let count = *count;
        if best.map_or(true, |(_, c)| count >= c) {
            best = Some((subtype, count));
        }
    }
    best.map(|(s, c)| (s.to_string(), c))
}

fn last_success_at(state: &GuidanceLadderState, interactions: &[InteractionEvent]) -> Option<i64> {
    interactions
        .iter()
        .filter(|e| belongs_to(state, e) && e.is_successful_execution())
        .map(|e| e.timestamp)
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> GuidanceLadderState {
        GuidanceLadderState::new("learner", "p1", 0)
    }

    fn at_rung(rung: Rung) -> GuidanceLadderState {
        let mut s = state();
        s.current_rung = rung;
        s
    }

    fn error(subtype: &str, ts: i64) -> InteractionEvent {
        InteractionEvent::new("learner", "p1", EventType::Error, ts).with_error_subtype(subtype)
    }

    const ALL_TRIGGERS: [EscalationTrigger; 6] = [
        EscalationTrigger::RungExhausted,
        EscalationTrigger::RepeatedError,
        EscalationTrigger::TimeStuck,
        EscalationTrigger::LearnerRequest,
        EscalationTrigger::HintReopened,
        EscalationTrigger::AutoEscalationEligible,
    ];

    #[test]
    fn new_state_starts_at_micro_hint() {
        let s = state();
        assert_eq!(s.current_rung, Rung::MicroHint);
        assert_eq!(s.rung_attempts, [0, 0, 0]);
        assert!(s.escalation_history.is_empty());
    }

    #[test]
    fn recording_attempts_returns_new_value() {
        let s = state();
        let next = s.record_rung_attempt().record_rung_attempt();
        assert_eq!(s.attempts_at(Rung::MicroHint), 0);
        assert_eq!(next.attempts_at(Rung::MicroHint), 2);
    }

    #[test]
    fn top_rung_never_escalates() {
        let s = at_rung(Rung::ReflectiveNote);
        let fast = get_profile(ProfileId::Fast);
        for trigger in ALL_TRIGGERS {
            for profile in [None, Some(&fast)] {
                let decision = can_escalate_at(&s, trigger, &[], profile, 1_000_000);
                assert!(!decision.allowed);
                assert_eq!(decision.reason, "maximum rung reached");
            }
        }
        assert_eq!(
            s.escalate(EscalationTrigger::LearnerRequest, EscalationEvidence::default(), &[], 5),
            Err(LadderError::MaxRungReached {
                rung: Rung::ReflectiveNote
            })
        );
    }

    #[test]
    fn learner_initiated_triggers_bypass_counters() {
        for trigger in [
            EscalationTrigger::LearnerRequest,
            EscalationTrigger::HintReopened,
            EscalationTrigger::AutoEscalationEligible,
        ] {
            assert!(can_escalate_at(&state(), trigger, &[], None, 0).allowed);
        }
    }

    #[test]
    fn rung_exhausted_defaults_to_three_attempts() {
        let two = state().record_rung_attempt().record_rung_attempt();
        let decision = can_escalate_at(&two, EscalationTrigger::RungExhausted, &[], None, 0);
        assert!(!decision.allowed);
        assert!(!decision.profile_aware);

        let three = two.record_rung_attempt();
        assert!(can_escalate_at(&three, EscalationTrigger::RungExhausted, &[], None, 0).allowed);
    }

    #[test]
    fn rung_exhausted_uses_profile_threshold() {
        let fast = get_profile(ProfileId::Fast);
        let two = state().record_rung_attempt().record_rung_attempt();
        let decision = can_escalate_at(&two, EscalationTrigger::RungExhausted, &[], Some(&fast), 0);
        assert!(decision.allowed);
        assert!(decision.profile_aware);
        assert_eq!(decision.evidence.rung_attempts, Some(2));
    }

    #[test]
    fn repeated_error_needs_one_more_than_profile_setting() {
        let slow = get_profile(ProfileId::Slow);
        let mut events = vec![
            error("missing-join", 1),
            error("missing-join", 2),
            error("missing-join", 3),
            // other problems are ignored
            InteractionEvent::new("learner", "p2", EventType::Error, 4).with_error_subtype("missing-join"),
        ];
        let decision = can_escalate_at(&state(), EscalationTrigger::RepeatedError, &events, Some(&slow), 0);
        assert!(!decision.allowed);
        assert_eq!(decision.evidence.error_count, Some(3));

        events.push(error("missing-join", 5));
        let decision = can_escalate_at(&state(), EscalationTrigger::RepeatedError, &events, Some(&slow), 0);
        assert!(decision.allowed);
        assert_eq!(decision.evidence.error_subtype_id.as_deref(), Some("missing-join"));
    }

    #[test]
    fn other_learners_events_are_ignored() {
        let fast = get_profile(ProfileId::Fast);
        let events = vec![
            InteractionEvent::new("someone-else", "p1", EventType::Error, 1).with_error_subtype("missing-join"),
            InteractionEvent::new("someone-else", "p1", EventType::Error, 2).with_error_subtype("missing-join"),
            InteractionEvent::new("someone-else", "p1", EventType::Error, 3).with_error_subtype("missing-join"),
            InteractionEvent::new("someone-else", "p1", EventType::Execution, 55_000).with_success(true),
        ];

        let decision = can_escalate_at(&state(), EscalationTrigger::RepeatedError, &events, Some(&fast), 0);
        assert!(!decision.allowed);

        let decision = can_escalate_at(&state(), EscalationTrigger::TimeStuck, &events, Some(&fast), 60_000);
        assert!(decision.allowed);
        assert_eq!(decision.evidence.time_stuck_ms, Some(60_000));
    }

    #[test]
    fn repeated_error_without_errors_is_denied() {
        let decision = can_escalate_at(&state(), EscalationTrigger::RepeatedError, &[], None, 0);
        assert!(!decision.allowed);
    }

    #[test]
    fn time_stuck_measures_from_last_success() {
        let fast = get_profile(ProfileId::Fast);
        let events = vec![InteractionEvent::new("learner", "p1", EventType::Execution, 50_000).with_success(true)];

        let decision = can_escalate_at(&state(), EscalationTrigger::TimeStuck, &events, Some(&fast), 70_000);
        assert!(!decision.allowed);
        assert_eq!(decision.evidence.time_stuck_ms, Some(20_000));

        let decision = can_escalate_at(&state(), EscalationTrigger::TimeStuck, &events, Some(&fast), 80_000);
        assert!(decision.allowed);

        // falls back to the problem start
        let decision = can_escalate_at(&state(), EscalationTrigger::TimeStuck, &[], None, 60_000);
        assert!(decision.allowed);
    }

    #[test]
    fn escalate_appends_history_and_merges_concepts() {
        let mut s = state();
        s.current_concept_ids = vec!["joins".to_string()];
        let next = s
            .escalate(
                EscalationTrigger::RungExhausted,
                EscalationEvidence {
                    rung_attempts: Some(3),
                    ..Default::default()
                },
                &["joins".to_string(), "aliases".to_string()],
                42,
            )
            .unwrap();

        assert_eq!(s.current_rung, Rung::MicroHint);
        assert_eq!(next.current_rung, Rung::Explanation);
        assert_eq!(next.current_concept_ids, vec!["joins", "aliases"]);
        assert_eq!(next.escalation_history.len(), 1);
        let record = &next.escalation_history[0];
        assert_eq!(record.from_rung, Rung::MicroHint);
        assert_eq!(record.to_rung, Rung::Explanation);
        assert_eq!(record.timestamp, 42);
    }
}
