pub mod learner_bandit;
pub mod reward;
pub mod thompson;

pub use learner_bandit::{BanditArmId, LearnerBanditManager, ProfileSelection, RewardRecord};
pub use reward::{calculate_reward, RewardComponents};
pub use thompson::{ArmStats, BanditArm, BanditSnapshot, ThompsonBandit};
