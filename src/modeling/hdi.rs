//! Hint Dependency Index over a learner's full interaction history.
//!
//! Components:
//! - HPA: hints per attempt
//! - AED: average escalation depth of viewed hints
//! - ER: explanation views per attempt
//! - REAE: share of errors made after the first explanation
//! - IWH: share of solved problems solved without any hint (inverted in the score)

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::HdiWeights;
use crate::types::{sorted_by_time, EventType, InteractionEvent};

const TREND_BAND: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyLevel {
    Low,
    Medium,
    High,
}

impl DependencyLevel {
    pub fn from_score(score: f64) -> Self {
        if score < 0.3 {
            Self::Low
        } else if score <= 0.6 {
            Self::Medium
        } else {
            Self::High
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HdiComponents {
    pub hpa: f64,
    pub aed: f64,
    pub er: f64,
    pub reae: f64,
    pub iwh: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HdiResult {
    pub hdi: f64,
    pub level: DependencyLevel,
    pub components: HdiComponents,
}

pub fn calculate_hdi(interactions: &[InteractionEvent], weights: &HdiWeights) -> HdiResult {
    let components = HdiComponents {
        hpa: calculate_hpa(interactions),
        aed: calculate_aed(interactions),
        er: calculate_er(interactions),
        reae: calculate_reae(interactions),
        iwh: calculate_iwh(interactions),
    };

    let hdi = (components.hpa * weights.hpa
        + components.aed * weights.aed
        + components.er * weights.er
        + components.reae * weights.reae
        + (1.0 - components.iwh) * weights.iwh)
        .clamp(0.0, 1.0);

    HdiResult {
        hdi,
        level: DependencyLevel::from_score(hdi),
        components,
    }
}

fn count(interactions: &[InteractionEvent], pred: impl Fn(&InteractionEvent) -> bool) -> usize {
    interactions.iter().filter(|e| pred(*e)).count()
}

fn per_execution(numerator: usize, interactions: &[InteractionEvent]) -> f64 {
    let executions = count(interactions, |e| e.event_type == EventType::Execution);
    if executions == 0 {
        return 0.0;
    }
    (numerator as f64 / executions as f64).min(1.0)
}

pub fn calculate_hpa(interactions: &[InteractionEvent]) -> f64 {
    let requests = count(interactions, |e| e.event_type.is_help_request());
    per_execution(requests, interactions)
}

pub fn calculate_aed(interactions: &[InteractionEvent]) -> f64 {
    let levels: Vec<f64> = interactions
        .iter()
        .filter(|e| e.event_type.is_hint_like())
        .filter_map(|e| e.hint_level)
        .map(f64::from)
        .collect();
    if levels.is_empty() {
        return 0.0;
    }
    let mean = levels.iter().sum::<f64>() / levels.len() as f64;
    ((mean - 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Only full explanation views count; guidance views are hint-level.
pub fn calculate_er(interactions: &[InteractionEvent]) -> f64 {
    let views = count(interactions, |e| e.event_type == EventType::ExplanationView);
    per_execution(views, interactions)
}

pub fn calculate_reae(interactions: &[InteractionEvent]) -> f64 {
    let mut seen_explanation = false;
    let mut total_errors = 0usize;
    let mut errors_after = 0usize;

    for event in sorted_by_time(interactions) {
        match event.event_type {
            EventType::ExplanationView => seen_explanation = true,
            EventType::Error => {
                total_errors += 1;
                if seen_explanation {
                    errors_after += 1;
                }
            }
            _ => {}
        }
    }

    if total_errors == 0 {
        return 0.0;
    }
    errors_after as f64 / total_errors as f64
}

pub fn calculate_iwh(interactions: &[InteractionEvent]) -> f64 {
    // problem -> (hint seen so far, solved, hint seen before first success)
    let mut problems: HashMap<&str, (bool, bool, bool)> = HashMap::new();

    for event in sorted_by_time(interactions) {
        let entry = problems.entry(event.problem_id.as_str()).or_default();
        if entry.1 {
            continue;
        }
        if event.event_type.is_hint_like() {
            entry.0 = true;
        } else if event.is_successful_execution() {
            entry.1 = true;
            entry.2 = entry.0;
        }
    }

    let solved = problems.values().filter(|p| p.1).count();
    if solved == 0 {
        return 0.0;
    }
    let with_hint = problems.values().filter(|p| p.1 && p.2).count();
    (solved - with_hint) as f64 / solved as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HdiTrend {
    Increasing,
    Stable,
    Decreasing,
}

pub fn hdi_trend(previous: f64, current: f64) -> HdiTrend {
    let delta = current - previous;
    if delta > TREND_BAND {
        HdiTrend::Increasing
    } else if delta < -TREND_BAND {
        HdiTrend::Decreasing
    } else {
        HdiTrend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ty: EventType, ts: i64) -> InteractionEvent {
        InteractionEvent::new("l", "p", ty, ts)
    }

    fn on(problem: &str, ty: EventType, ts: i64) -> InteractionEvent {
        InteractionEvent::new("l", problem, ty, ts)
    }

    #[test]
    fn empty_history_has_baseline_score() {
        let result = calculate_hdi(&[], &HdiWeights::default());
        assert_eq!(result.hdi, 0.134);
        assert_eq!(result.level, DependencyLevel::Low);
    }

    #[test]
    fn hpa_ratio_and_cap() {
        let mut events = vec![
            event(EventType::HintRequest, 0),
            event(EventType::GuidanceRequest, 1),
        ];
        events.extend((0..4).map(|i| event(EventType::Execution, 10 + i)));
        assert_eq!(calculate_hpa(&events), 0.5);

        let capped = vec![
            event(EventType::HintRequest, 0),
            event(EventType::HintRequest, 1),
            event(EventType::HintRequest, 2),
            event(EventType::Execution, 3),
            event(EventType::Execution, 4),
        ];
        assert_eq!(calculate_hpa(&capped), 1.0);
        assert_eq!(calculate_hpa(&[event(EventType::HintRequest, 0)]), 0.0);
    }

    #[test]
    fn aed_normalizes_mean_level() {
        let events = vec![
            event(EventType::HintView, 0).with_hint_level(3),
            event(EventType::GuidanceView, 1).with_hint_level(2),
            event(EventType::HintRequest, 2),
        ];
        assert_eq!(calculate_aed(&events), 0.75);
        assert_eq!(calculate_aed(&[]), 0.0);
    }

    #[test]
    fn er_ignores_guidance_views() {
        let events = vec![
            event(EventType::ExplanationView, 0),
            event(EventType::GuidanceView, 1),
            event(EventType::Execution, 2),
            event(EventType::Execution, 3),
        ];
        assert_eq!(calculate_er(&events), 0.5);
    }

    #[test]
    fn reae_counts_errors_after_first_explanation() {
        let events = vec![
            event(EventType::Error, 30),
            event(EventType::ExplanationView, 10),
            event(EventType::Error, 20),
        ];
        assert_eq!(calculate_reae(&events), 1.0);

        let mixed = vec![
            event(EventType::Error, 0),
            event(EventType::ExplanationView, 10),
            event(EventType::Error, 20),
        ];
        assert_eq!(calculate_reae(&mixed), 0.5);
    }

    #[test]
    fn iwh_per_problem() {
        let events = vec![
            on("p1", EventType::Execution, 0).with_success(true),
            on("p2", EventType::HintView, 0),
            on("p2", EventType::Execution, 5).with_success(true),
            // hint after success does not matter
            on("p1", EventType::HintRequest, 10),
            on("p3", EventType::Execution, 1).with_success(false),
        ];
        assert_eq!(calculate_iwh(&events), 0.5);
    }

    #[test]
    fn heavy_dependence_is_high() {
        let events = vec![
            event(EventType::HintRequest, 0).with_hint_level(3),
            event(EventType::ExplanationView, 1),
            event(EventType::Error, 2),
            event(EventType::HintView, 3).with_hint_level(3),
            event(EventType::Execution, 4).with_success(true),
        ];
        let result = calculate_hdi(&events, &HdiWeights::default());
        assert_eq!(result.level, DependencyLevel::High);
        assert!(result.hdi <= 1.0);
    }

    #[test]
    fn trend_band() {
        assert_eq!(hdi_trend(0.4, 0.5), HdiTrend::Increasing);
        assert_eq!(hdi_trend(0.5, 0.52), HdiTrend::Stable);
        assert_eq!(hdi_trend(0.5, 0.3), HdiTrend::Decreasing);
    }
}
