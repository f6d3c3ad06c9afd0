use serde::{Deserialize, Serialize};

use crate::config::RewardConfig;
use crate::types::LearningOutcome;

/// Per-outcome reward signals before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardComponents {
    /// -1 unsolved, 0.5 solved with an explanation, 1 solved alone.
    pub independent_success: f64,
    pub error_reduction: f64,
    pub time_efficiency: f64,
    /// Negated HDI score.
    pub dependency_penalty: f64,
    /// Always 0: retention is only observable in a later session.
    pub delayed_retention: f64,
}

impl RewardComponents {
    pub fn from_outcome(outcome: &LearningOutcome) -> Self {
        Self {
            independent_success: independent_success(outcome.solved, outcome.used_explanation),
            error_reduction: error_reduction(outcome.error_count, outcome.baseline_errors),
            time_efficiency: time_efficiency(outcome.time_spent_ms, outcome.median_time_ms),
            dependency_penalty: -outcome.hdi_score,
            delayed_retention: 0.0,
        }
    }
}

pub fn independent_success(solved: bool, used_explanation: bool) -> f64 {
    match (solved, used_explanation) {
        (false, _) => -1.0,
        (true, false) => 1.0,
        (true, true) => 0.5,
    }
}

pub fn error_reduction(error_count: u32, baseline_errors: u32) -> f64 {
    if baseline_errors == 0 {
        return if error_count == 0 { 1.0 } else { 0.0 };
    }
    let baseline = baseline_errors as f64;
    (baseline - error_count as f64).max(0.0) / baseline
}

pub fn time_efficiency(time_spent_ms: i64, median_time_ms: i64) -> f64 {
    if median_time_ms <= 0 {
        return 0.5;
    }
    let ratio = time_spent_ms.max(0) as f64 / median_time_ms as f64;
    if ratio < 0.5 {
        0.5 + ratio
    } else if ratio <= 2.0 {
        1.0 - (ratio - 1.0).abs() * 0.5
    } else {
        (1.0 - (ratio - 2.0) * 0.3).max(0.0)
    }
}

/// Weighted sum of the components, rescaled from [-1, 1] to [0, 1].
pub fn calculate_reward(components: &RewardComponents, config: &RewardConfig) -> f64 {
    let raw = config.independent_success_weight * components.independent_success
        + config.error_reduction_weight * components.error_reduction
        + config.time_efficiency_weight * components.time_efficiency
        + config.dependency_penalty_weight * components.dependency_penalty
        + config.delayed_retention_weight * components.delayed_retention;

    if !raw.is_finite() {
        return 0.5;
    }
    ((raw + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome() -> LearningOutcome {
        LearningOutcome {
            solved: true,
            used_explanation: false,
            error_count: 1,
            baseline_errors: 4,
            time_spent_ms: 60_000,
            median_time_ms: 60_000,
            hdi_score: 0.2,
        }
    }

    #[test]
    fn independent_success_values() {
        assert_eq!(independent_success(false, true), -1.0);
        assert_eq!(independent_success(false, false), -1.0);
        assert_eq!(independent_success(true, false), 1.0);
        assert_eq!(independent_success(true, true), 0.5);
    }

    #[test]
    fn error_reduction_handles_zero_baseline() {
        assert_eq!(error_reduction(0, 0), 1.0);
        assert_eq!(error_reduction(2, 0), 0.0);
        assert_eq!(error_reduction(1, 4), 0.75);
        assert_eq!(error_reduction(6, 4), 0.0);
    }

    #[test]
    fn time_efficiency_piecewise() {
        assert!((time_efficiency(20, 100) - 0.7).abs() < 1e-12);
        assert!((time_efficiency(100, 100) - 1.0).abs() < 1e-12);
        assert!((time_efficiency(200, 100) - 0.5).abs() < 1e-12);
        assert!((time_efficiency(300, 100) - 0.7).abs() < 1e-12);
        assert_eq!(time_efficiency(10_000, 100), 0.0);
        assert_eq!(time_efficiency(50, 0), 0.5);
    }

    #[test]
    fn components_from_outcome() {
        let c = RewardComponents::from_outcome(&outcome());
        assert_eq!(c.independent_success, 1.0);
        assert_eq!(c.error_reduction, 0.75);
        assert_eq!(c.time_efficiency, 1.0);
        assert_eq!(c.dependency_penalty, -0.2);
        assert_eq!(c.delayed_retention, 0.0);
    }

    #[test]
    fn better_outcomes_earn_more() {
        let config = RewardConfig::default();
        let good = calculate_reward(&RewardComponents::from_outcome(&outcome()), &config);
        let failed = calculate_reward(
            &RewardComponents::from_outcome(&LearningOutcome {
                solved: false,
                error_count: 9,
                hdi_score: 0.9,
                ..outcome()
            }),
            &config,
        );
        assert!(good > failed);
        assert!((0.0..=1.0).contains(&good));
        assert!((0.0..=1.0).contains(&failed));
    }
}
