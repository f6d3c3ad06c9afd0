use serde::{Deserialize, Serialize};

use crate::profiles::AssignmentStrategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditConfig {
    pub prior_alpha: f64,
    pub prior_beta: f64,
    /// Fixed seed for reproducible sampling; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            prior_alpha: 1.0,
            prior_beta: 1.0,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    pub independent_success_weight: f64,
    pub error_reduction_weight: f64,
    pub time_efficiency_weight: f64,
    pub dependency_penalty_weight: f64,
    pub delayed_retention_weight: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            independent_success_weight: 0.35,
            error_reduction_weight: 0.2,
            time_efficiency_weight: 0.15,
            dependency_penalty_weight: 0.2,
            delayed_retention_weight: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsiWeights {
    pub rapid_resubmission: f64,
    pub short_interval_errors: f64,
    pub long_pause_before_help: f64,
    pub burst_error_clusters: f64,
    pub escalation_density: f64,
}

impl Default for CsiWeights {
    fn default() -> Self {
        Self {
            rapid_resubmission: 0.25,
            short_interval_errors: 0.25,
            long_pause_before_help: 0.15,
            burst_error_clusters: 0.2,
            escalation_density: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HdiWeights {
    pub hpa: f64,
    pub aed: f64,
    pub er: f64,
    pub reae: f64,
    pub iwh: f64,
}

impl Default for HdiWeights {
    fn default() -> Self {
        Self {
            hpa: 0.3,
            aed: 0.133,
            er: 0.3,
            reae: 0.133,
            iwh: 0.134,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub base_escalate: u32,
    pub base_aggregate: u32,
    pub minimum: u32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            base_escalate: 4,
            base_aggregate: 8,
            minimum: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub bandit: BanditConfig,
    pub reward: RewardConfig,
    pub csi: CsiWeights,
    pub hdi: HdiWeights,
    pub thresholds: ThresholdConfig,
    pub assignment_strategy: AssignmentStrategy,
    pub log_level: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            bandit: BanditConfig::default(),
            reward: RewardConfig::default(),
            csi: CsiWeights::default(),
            hdi: HdiWeights::default(),
            thresholds: ThresholdConfig::default(),
            assignment_strategy: AssignmentStrategy::Bandit,
            log_level: "info".to_string(),
        }
    }
}

impl PolicyConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(seed) = env_string("GUIDANCE_BANDIT_SEED").and_then(|v| v.parse().ok()) {
            config.bandit.seed = Some(seed);
        }
        if let Some(strategy) = env_string("GUIDANCE_ASSIGNMENT_STRATEGY") {
            config.assignment_strategy =
                AssignmentStrategy::parse(&strategy).unwrap_or(AssignmentStrategy::Bandit);
        }
        if let Some(val) = env_f64("GUIDANCE_REWARD_DEPENDENCY_WEIGHT") {
            config.reward.dependency_penalty_weight = val;
        }
        if let Some(val) = env_string("RUST_LOG") {
            config.log_level = val;
        }

        config
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_f64(key: &str) -> Option<f64> {
    env_string(key)?.parse().ok()
}
