pub mod csi;
pub mod hdi;
pub mod struggle;

pub use csi::{calculate_csi, CsiComponents, CsiResult, StrainLevel};
pub use hdi::{calculate_hdi, hdi_trend, DependencyLevel, HdiComponents, HdiResult, HdiTrend};
pub use struggle::{
    analyze_learner_history, calculate_adaptive_threshold, detect_struggle_pattern,
    get_adaptive_profile_thresholds, AdaptiveThresholds, AdjustmentFactors, AdjustmentResult,
    LearnerHistory, ProblemContext, StrugglePattern,
};
