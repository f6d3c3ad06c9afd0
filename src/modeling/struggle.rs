use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ThresholdConfig;
use crate::types::{sorted_by_time, EventType, InteractionEvent, ProblemDifficulty};

const RECENT_ERROR_WINDOW: usize = 5;
const DEFAULT_RECOVERY_RATE: f64 = 0.5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerHistory {
    pub total_errors: u32,
    pub errors_recovered_independently: u32,
    /// Up to five most recent error subtypes, oldest first.
    pub recent_errors: Vec<String>,
    pub avg_recovery_time_ms: f64,
}

impl LearnerHistory {
    pub fn recovery_rate(&self) -> f64 {
        if self.total_errors == 0 {
            return DEFAULT_RECOVERY_RATE;
        }
        self.errors_recovered_independently as f64 / self.total_errors as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrugglePattern {
    Persistent,
    Oscillatory,
    Improving,
}

impl StrugglePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Persistent => "persistent",
            Self::Oscillatory => "oscillatory",
            Self::Improving => "improving",
        }
    }
}

/// Counts subtype-tagged errors and how many were fixed without help.
///
/// After each error the stream is scanned forward: a successful execution
/// first is an independent recovery, an assistance event first is not, and
/// another error first ends the search.
pub fn analyze_learner_history(interactions: &[InteractionEvent]) -> LearnerHistory {
    let sorted = sorted_by_time(interactions);

    let mut total_errors = 0u32;
    let mut recovered = 0u32;
    let mut recovery_times: Vec<i64> = Vec::new();
    let mut subtypes: Vec<String> = Vec::new();

    for (idx, event) in sorted.iter().enumerate() {
        if event.event_type != EventType::Error {
            continue;
        }
        let Some(subtype) = event.error_subtype_id.as_ref() else {
            continue;
        };
        total_errors += 1;
        subtypes.push(subtype.clone());

        for later in &sorted[idx + 1..] {
            if later.event_type == EventType::Error {
                break;
            }
            if later.event_type.is_assistance() {
                break;
            }
            if later.is_successful_execution() {
                recovered += 1;
                recovery_times.push(later.timestamp - event.timestamp);
                break;
            }
        }
    }

    let avg_recovery_time_ms = if recovery_times.is_empty() {
        0.0
    } else {
        recovery_times.iter().sum::<i64>() as f64 / recovery_times.len() as f64
    };

    let skip = subtypes.len().saturating_sub(RECENT_ERROR_WINDOW);
    LearnerHistory {
        total_errors,
        errors_recovered_independently: recovered,
        recent_errors: subtypes.split_off(skip),
        avg_recovery_time_ms,
    }
}

pub fn detect_struggle_pattern(recent_errors: &[String]) -> StrugglePattern {
    if recent_errors.len() <= 1 {
        return StrugglePattern::Improving;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for error in recent_errors {
        *counts.entry(error.as_str()).or_insert(0) += 1;
    }

    if counts.len() == 1 {
        return StrugglePattern::Persistent;
    }

    if (2..=3).contains(&counts.len()) && recent_errors.len() >= 4 {
        let max = counts.values().copied().max().unwrap_or(0);
        let min = counts.values().copied().min().unwrap_or(0);
        if max - min <= 1 {
            return StrugglePattern::Oscillatory;
        }
    }

    StrugglePattern::Improving
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentFactors {
    pub recovery_rate: f64,
    pub pattern: StrugglePattern,
    pub difficulty: Option<ProblemDifficulty>,
    pub csi: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Adjustment {
    pub delta: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentResult {
    pub base: u32,
    pub threshold: u32,
    pub adjustments: Vec<Adjustment>,
}

impl AdjustmentResult {
    pub fn reasons(&self) -> Vec<String> {
        self.adjustments.iter().map(|a| a.reason.clone()).collect()
    }
}

/// Floor for every adaptive threshold, whatever the configured minimum.
pub const HARD_MINIMUM_THRESHOLD: u32 = 2;

/// Shifts `base` by percentage adjustments that are summed before rounding,
/// so their order never matters. The result is never below `minimum` and
/// never below [`HARD_MINIMUM_THRESHOLD`].
pub fn calculate_adaptive_threshold(base: u32, factors: &AdjustmentFactors, minimum: u32) -> AdjustmentResult {
    let b = base as f64;
    let mut adjustments = Vec::new();
    let mut push = |delta: f64, reason: &str| {
        adjustments.push(Adjustment {
            delta,
            reason: reason.to_string(),
        })
    };

    if factors.recovery_rate > 0.7 {
        push(0.3 * b, "high independent recovery rate");
    } else if factors.recovery_rate < 0.3 {
        push(-0.3 * b, "low independent recovery rate");
    }

    match factors.pattern {
        StrugglePattern::Persistent => push(-0.2 * b, "persistent error pattern"),
        StrugglePattern::Improving => push(0.2 * b, "improving error pattern"),
        StrugglePattern::Oscillatory => {}
    }

    match factors.difficulty {
        Some(ProblemDifficulty::Advanced) => push(-0.1 * b, "advanced problem"),
        Some(ProblemDifficulty::Beginner) => push(0.1 * b, "beginner problem"),
        Some(ProblemDifficulty::Intermediate) | None => {}
    }

    if let Some(csi) = factors.csi {
        if csi > 0.7 {
            push(-0.2 * b, "high cognitive strain");
        } else if csi < 0.3 {
            push(0.2 * b, "low cognitive strain");
        }
    }

    let total: f64 = adjustments.iter().map(|a| a.delta).sum();
    let floor = minimum.max(HARD_MINIMUM_THRESHOLD);
    let threshold = ((b + total).round().max(floor as f64)) as u32;

    debug!(base, threshold, adjustments = adjustments.len(), "adaptive threshold computed");
    AdjustmentResult {
        base,
        threshold,
        adjustments,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemContext {
    pub difficulty: ProblemDifficulty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveThresholds {
    pub escalate: u32,
    pub aggregate: u32,
    pub recovery_rate: f64,
    pub pattern: StrugglePattern,
    pub reasons: Vec<String>,
}

/// Thresholds for the adaptive profile, tuned to one learner and problem.
/// Cognitive strain is not part of this calculation.
pub fn get_adaptive_profile_thresholds(
    history: &LearnerHistory,
    problem: &ProblemContext,
    config: &ThresholdConfig,
) -> AdaptiveThresholds {
    let factors = AdjustmentFactors {
        recovery_rate: history.recovery_rate(),
        pattern: detect_struggle_pattern(&history.recent_errors),
        difficulty: Some(problem.difficulty),
        csi: None,
    };

    let escalate = calculate_adaptive_threshold(config.base_escalate, &factors, config.minimum);
    let aggregate = calculate_adaptive_threshold(config.base_aggregate, &factors, config.minimum);

    let mut reasons = escalate.reasons();
    for reason in aggregate.reasons() {
        if !reasons.contains(&reason) {
            reasons.push(reason);
        }
    }

    AdaptiveThresholds {
        escalate: escalate.threshold,
        aggregate: aggregate.threshold,
        recovery_rate: factors.recovery_rate,
        pattern: factors.pattern,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(ts: i64, subtype: &str) -> InteractionEvent {
        InteractionEvent::new("l", "p", EventType::Error, ts).with_error_subtype(subtype)
    }

    fn success(ts: i64) -> InteractionEvent {
        InteractionEvent::new("l", "p", EventType::Execution, ts).with_success(true)
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn factors(recovery_rate: f64, pattern: StrugglePattern) -> AdjustmentFactors {
        AdjustmentFactors {
            recovery_rate,
            pattern,
            difficulty: None,
            csi: None,
        }
    }

    #[test]
    fn empty_history_is_neutral() {
        let history = analyze_learner_history(&[]);
        assert_eq!(history.total_errors, 0);
        assert_eq!(history.avg_recovery_time_ms, 0.0);
        assert_eq!(history.recovery_rate(), 0.5);
    }

    #[test]
    fn independent_recovery_is_measured_after_sorting() {
        let events = vec![
            success(4_000),
            error(1_000, "missing-where"),
            error(10_000, "ambiguous-column"),
            InteractionEvent::new("l", "p", EventType::HintRequest, 11_000),
            success(12_000),
        ];
        let history = analyze_learner_history(&events);
        assert_eq!(history.total_errors, 2);
        assert_eq!(history.errors_recovered_independently, 1);
        assert_eq!(history.avg_recovery_time_ms, 3_000.0);
        assert_eq!(history.recent_errors, strings(&["missing-where", "ambiguous-column"]));
    }

    #[test]
    fn following_error_ends_the_search() {
        let events = vec![error(0, "a"), error(1_000, "b"), success(2_000)];
        let history = analyze_learner_history(&events);
        assert_eq!(history.errors_recovered_independently, 1);
        assert_eq!(history.avg_recovery_time_ms, 1_000.0);
    }

    #[test]
    fn untagged_errors_are_not_counted() {
        let events = vec![InteractionEvent::new("l", "p", EventType::Error, 0), success(10)];
        assert_eq!(analyze_learner_history(&events).total_errors, 0);
    }

    #[test]
    fn recent_errors_keep_last_five_in_order() {
        let events: Vec<_> = (0..7).map(|i| error(i * 100, &format!("e{i}"))).collect();
        let history = analyze_learner_history(&events);
        assert_eq!(history.recent_errors, strings(&["e2", "e3", "e4", "e5", "e6"]));
    }

    #[test]
    fn struggle_patterns() {
        assert_eq!(detect_struggle_pattern(&[]), StrugglePattern::Improving);
        assert_eq!(detect_struggle_pattern(&strings(&["a"])), StrugglePattern::Improving);
        assert_eq!(detect_struggle_pattern(&strings(&["a", "a", "a"])), StrugglePattern::Persistent);
        assert_eq!(
            detect_struggle_pattern(&strings(&["a", "b", "a", "b"])),
            StrugglePattern::Oscillatory
        );
        assert_eq!(
            detect_struggle_pattern(&strings(&["a", "b", "c", "a", "b"])),
            StrugglePattern::Oscillatory
        );
        // too few samples
        assert_eq!(detect_struggle_pattern(&strings(&["a", "b", "a"])), StrugglePattern::Improving);
        // uneven
        assert_eq!(
            detect_struggle_pattern(&strings(&["a", "a", "a", "b"])),
            StrugglePattern::Improving
        );
        // four distinct
        assert_eq!(
            detect_struggle_pattern(&strings(&["a", "b", "c", "d"])),
            StrugglePattern::Improving
        );
    }

    #[test]
    fn adjustments_are_additive() {
        let result = calculate_adaptive_threshold(
            10,
            &AdjustmentFactors {
                recovery_rate: 0.9,
                pattern: StrugglePattern::Persistent,
                difficulty: Some(ProblemDifficulty::Advanced),
                csi: Some(0.2),
            },
            2,
        );
        // 10 + 3 - 2 - 1 + 2
        assert_eq!(result.threshold, 12);
        assert_eq!(result.adjustments.len(), 4);
    }

    #[test]
    fn oscillatory_and_mid_recovery_leave_base_unchanged() {
        let result = calculate_adaptive_threshold(4, &factors(0.5, StrugglePattern::Oscillatory), 2);
        assert_eq!(result.threshold, 4);
        assert!(result.adjustments.is_empty());
    }

    #[test]
    fn threshold_never_drops_below_minimum() {
        let result = calculate_adaptive_threshold(
            2,
            &AdjustmentFactors {
                recovery_rate: 0.0,
                pattern: StrugglePattern::Persistent,
                difficulty: Some(ProblemDifficulty::Advanced),
                csi: Some(0.95),
            },
            2,
        );
        assert_eq!(result.threshold, 2);
    }

    #[test]
    fn configured_minimum_below_two_is_ignored() {
        let result = calculate_adaptive_threshold(
            3,
            &AdjustmentFactors {
                recovery_rate: 0.0,
                pattern: StrugglePattern::Persistent,
                difficulty: Some(ProblemDifficulty::Advanced),
                csi: Some(0.9),
            },
            0,
        );
        assert_eq!(result.threshold, HARD_MINIMUM_THRESHOLD);
    }

    #[test]
    fn adaptive_profile_thresholds_from_history() {
        let history = LearnerHistory {
            total_errors: 4,
            errors_recovered_independently: 0,
            recent_errors: strings(&["a", "a", "a", "a"]),
            avg_recovery_time_ms: 0.0,
        };
        let result = get_adaptive_profile_thresholds(
            &history,
            &ProblemContext {
                difficulty: ProblemDifficulty::Advanced,
            },
            &ThresholdConfig::default(),
        );
        // escalate: 4 - 1.2 - 0.8 - 0.4 = 1.6 -> 2; aggregate: 8 - 2.4 - 1.6 - 0.8 = 3.2 -> 3
        assert_eq!(result.escalate, 2);
        assert_eq!(result.aggregate, 3);
        assert_eq!(result.pattern, StrugglePattern::Persistent);
        assert_eq!(result.reasons.len(), 3);
    }

    #[test]
    fn adaptive_profile_defaults_for_new_learner() {
        let result = get_adaptive_profile_thresholds(
            &LearnerHistory::default(),
            &ProblemContext::default(),
            &ThresholdConfig::default(),
        );
        // recovery 0.5 (no change), improving +20%
        assert_eq!(result.escalate, 5);
        assert_eq!(result.aggregate, 10);
        assert_eq!(result.recovery_rate, 0.5);
    }
}
