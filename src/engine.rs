//! Orchestration of one tutoring session per (learner, problem): profile
//! selection, ladder transitions, grounded generation and bandit feedback.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PolicyConfig;
use crate::decision::{BanditArmId, LearnerBanditManager, RewardRecord};
use crate::error::PolicyError;
use crate::events::{
    BanditUpdatedPayload, EventBus, GuidanceEscalatePayload, GuidanceEvent,
    GuidanceRequestPayload, GuidanceViewPayload,
};
use crate::generation::{generate_guidance, LlmGuidanceOutput, RetrievalBundle};
use crate::ladder::{can_escalate_at, EscalationDecision, EscalationTrigger, GuidanceLadderState};
use crate::modeling::{
    analyze_learner_history, calculate_csi, calculate_hdi, get_adaptive_profile_thresholds,
    AdaptiveThresholds, CsiResult, HdiResult, ProblemContext,
};
use crate::profiles::{assign_profile, AssignmentContext, AssignmentStrategy, EscalationProfile};
use crate::types::{InteractionEvent, LearningOutcome, Rung};

type SessionKey = (String, String);

/// Ladder state plus the escalation profile chosen when the problem started.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LadderSession {
    pub state: GuidanceLadderState,
    pub arm_id: BanditArmId,
    pub profile: EscalationProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidanceResponse {
    pub rung: Rung,
    pub output: LlmGuidanceOutput,
    pub state: GuidanceLadderState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationAttempt {
    pub decision: EscalationDecision,
    pub state: GuidanceLadderState,
    pub profile: EscalationProfile,
}

impl EscalationAttempt {
    pub fn escalated(&self) -> bool {
        self.decision.allowed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StruggleAssessment {
    pub csi: CsiResult,
    pub hdi: HdiResult,
    pub thresholds: AdaptiveThresholds,
}

pub struct GuidanceEngine {
    config: PolicyConfig,
    bandits: Arc<LearnerBanditManager>,
    events: Arc<EventBus>,
    sessions: RwLock<HashMap<SessionKey, LadderSession>>,
}

impl GuidanceEngine {
    pub fn new(config: PolicyConfig) -> Self {
        let bandits = LearnerBanditManager::new(config.bandit.clone(), config.reward.clone());
        Self::with_components(config, Arc::new(bandits), Arc::new(EventBus::new()))
    }

    pub fn with_components(
        config: PolicyConfig,
        bandits: Arc<LearnerBanditManager>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            bandits,
            events,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn bandits(&self) -> &Arc<LearnerBanditManager> {
        &self.bandits
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Struggle and dependency metrics for a learner's interactions.
    pub fn assess(&self, interactions: &[InteractionEvent], problem: &ProblemContext) -> StruggleAssessment {
        let history = analyze_learner_history(interactions);
        StruggleAssessment {
            csi: calculate_csi(interactions, &self.config.csi),
            hdi: calculate_hdi(interactions, &self.config.hdi),
            thresholds: get_adaptive_profile_thresholds(&history, problem, &self.config.thresholds),
        }
    }

    fn choose_profile(
        &self,
        learner_id: &str,
        interactions: &[InteractionEvent],
    ) -> Result<(BanditArmId, EscalationProfile), PolicyError> {
        match self.config.assignment_strategy {
            AssignmentStrategy::Bandit => {
                let selection = self.bandits.select_profile_for_learner(learner_id)?;
                Ok((selection.arm_id, selection.profile))
            }
            strategy => {
                let history = analyze_learner_history(interactions);
                let context = AssignmentContext {
                    learner_id: learner_id.to_string(),
                    persistence_score: None,
                    recovery_rate: (history.total_errors > 0).then(|| history.recovery_rate()),
                };
                let profile = assign_profile(&context, strategy);
                Ok((BanditArmId::from_profile(profile.id), profile))
            }
        }
    }

    /// Returns the learner's session for this problem, starting one at rung 1
    /// with a freshly chosen profile if none exists.
    pub fn start_or_resume(
        &self,
        learner_id: &str,
        problem_id: &str,
        interactions: &[InteractionEvent],
    ) -> Result<LadderSession, PolicyError> {
        let key = (learner_id.to_string(), problem_id.to_string());
        if let Some(session) = self.sessions.read().get(&key) {
            return Ok(session.clone());
        }

        let (arm_id, profile) = self.choose_profile(learner_id, interactions)?;
        let mut sessions = self.sessions.write();
        let session = sessions.entry(key).or_insert_with(|| {
            info!(
                learner_id,
                problem_id,
                profile = profile.id.as_str(),
                "guidance session started"
            );
            LadderSession {
                state: GuidanceLadderState::new(learner_id, problem_id, Utc::now().timestamp_millis()),
                arm_id,
                profile,
            }
        });
        Ok(session.clone())
    }

    pub fn session(&self, learner_id: &str, problem_id: &str) -> Option<LadderSession> {
        self.sessions
            .read()
            .get(&(learner_id.to_string(), problem_id.to_string()))
            .cloned()
    }

    pub fn ladder_state(&self, learner_id: &str, problem_id: &str) -> Option<GuidanceLadderState> {
        self.session(learner_id, problem_id).map(|s| s.state)
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn update_state<F>(&self, learner_id: &str, problem_id: &str, update: F) -> Option<GuidanceLadderState>
    where
        F: FnOnce(&GuidanceLadderState) -> GuidanceLadderState,
    {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(&(learner_id.to_string(), problem_id.to_string()))?;
        session.state = update(&session.state);
        Some(session.state.clone())
    }

    /// Produces guidance at the current rung and counts it as an attempt.
    pub async fn request_guidance<F, Fut, E>(
        &self,
        learner_id: &str,
        problem_id: &str,
        interactions: &[InteractionEvent],
        bundle: &RetrievalBundle,
        llm_call: F,
    ) -> Result<GuidanceResponse, PolicyError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<String, E>>,
        E: fmt::Display,
    {
        let mut session = self.start_or_resume(learner_id, problem_id, interactions)?;
        if let Some(state) = self.update_state(learner_id, problem_id, GuidanceLadderState::record_rung_attempt) {
            session.state = state;
        }
        let rung = session.state.current_rung;

        self.events.publish(GuidanceEvent::GuidanceRequested(GuidanceRequestPayload {
            learner_id: learner_id.to_string(),
            problem_id: problem_id.to_string(),
            rung,
            rung_attempts: session.state.attempts_at(rung),
            timestamp: Utc::now(),
        }));

        let output = generate_guidance(rung, bundle, llm_call).await;

        let grounded = output.metadata.grounded;
        let state = self
            .update_state(learner_id, problem_id, |s| s.with_grounding(grounded))
            .unwrap_or_else(|| session.state.with_grounding(grounded));

        self.events.publish(GuidanceEvent::GuidanceViewed(GuidanceViewPayload {
            learner_id: learner_id.to_string(),
            problem_id: problem_id.to_string(),
            rung,
            grounded,
            fallback_used: output.metadata.fallback_used,
            concept_ids: output.metadata.concept_ids.clone(),
            source_ref_ids: output.metadata.source_ref_ids.clone(),
            timestamp: Utc::now(),
        }));

        debug!(
            learner_id,
            problem_id,
            rung = rung.as_u8(),
            grounded,
            fallback = output.metadata.fallback_used,
            "guidance delivered"
        );
        Ok(GuidanceResponse { rung, output, state })
    }

    pub fn try_escalate(
        &self,
        learner_id: &str,
        problem_id: &str,
        trigger: EscalationTrigger,
        interactions: &[InteractionEvent],
        concept_ids: &[String],
    ) -> Result<EscalationAttempt, PolicyError> {
        self.try_escalate_at(
            learner_id,
            problem_id,
            trigger,
            interactions,
            concept_ids,
            Utc::now().timestamp_millis(),
        )
    }

    /// Evaluates `trigger` against the session's profile and moves one rung
    /// up when it is allowed. The check and the transition happen under one
    /// write lock, so concurrent calls never escalate from the same rung.
    pub fn try_escalate_at(
        &self,
        learner_id: &str,
        problem_id: &str,
        trigger: EscalationTrigger,
        interactions: &[InteractionEvent],
        concept_ids: &[String],
        now_ms: i64,
    ) -> Result<EscalationAttempt, PolicyError> {
        let started = self.start_or_resume(learner_id, problem_id, interactions)?;

        let (decision, from_rung, state, profile) = {
            let mut sessions = self.sessions.write();
            let session = sessions
                .entry((learner_id.to_string(), problem_id.to_string()))
                .or_insert(started);
            let profile = session.profile;
            let decision = can_escalate_at(&session.state, trigger, interactions, Some(&profile), now_ms);
            let from_rung = session.state.current_rung;
            if decision.allowed {
                session.state = session
                    .state
                    .escalate(trigger, decision.evidence.clone(), concept_ids, now_ms)?;
            }
            (decision, from_rung, session.state.clone(), profile)
        };

        if !decision.allowed {
            debug!(
                learner_id,
                problem_id,
                trigger = trigger.as_str(),
                reason = %decision.reason,
                "escalation denied"
            );
            return Ok(EscalationAttempt {
                decision,
                state,
                profile,
            });
        }

        self.events.publish(GuidanceEvent::GuidanceEscalated(GuidanceEscalatePayload {
            learner_id: learner_id.to_string(),
            problem_id: problem_id.to_string(),
            from_rung,
            to_rung: state.current_rung,
            trigger,
            profile_id: profile.id,
            evidence: decision.evidence.clone(),
            timestamp: Utc::now(),
        }));

        Ok(EscalationAttempt {
            decision,
            state,
            profile,
        })
    }

    /// Closes the session. Under the bandit strategy the outcome is fed back
    /// to the learner's bandit and its reward returned. Other strategies never
    /// consult the bandit, so nothing is recorded and `None` is returned, as it
    /// is when no session was open.
    pub fn complete_problem(
        &self,
        learner_id: &str,
        problem_id: &str,
        outcome: &LearningOutcome,
    ) -> Option<RewardRecord> {
        let session = self
            .sessions
            .write()
            .remove(&(learner_id.to_string(), problem_id.to_string()));
        let Some(session) = session else {
            warn!(learner_id, problem_id, "completion for unknown guidance session");
            return None;
        };

        if self.config.assignment_strategy != AssignmentStrategy::Bandit {
            info!(
                learner_id,
                problem_id,
                profile = session.profile.id.as_str(),
                final_rung = session.state.current_rung.as_u8(),
                "guidance session completed without bandit feedback"
            );
            return None;
        }

        let record = self.bandits.record_outcome(learner_id, session.arm_id, outcome);
        self.events.publish(GuidanceEvent::BanditUpdated(BanditUpdatedPayload {
            learner_id: learner_id.to_string(),
            arm_id: record.arm_id,
            reward: record.reward,
            timestamp: Utc::now(),
        }));

        info!(
            learner_id,
            problem_id,
            arm = record.arm_id.as_str(),
            reward = record.reward,
            final_rung = session.state.current_rung.as_u8(),
            "guidance session completed"
        );
        Some(record)
    }
}
