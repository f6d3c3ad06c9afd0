use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{BanditConfig, RewardConfig};
use crate::decision::reward::{calculate_reward, RewardComponents};
use crate::decision::thompson::{ArmStats, BanditSnapshot, ThompsonBandit};
use crate::error::PolicyError;
use crate::profiles::{get_profile, EscalationProfile, ProfileId};
use crate::types::LearningOutcome;

/// Arms of the per-learner escalation bandit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BanditArmId {
    Aggressive,
    Conservative,
    ExplanationFirst,
    Adaptive,
}

impl BanditArmId {
    pub const ALL: [BanditArmId; 4] = [
        BanditArmId::Aggressive,
        BanditArmId::Conservative,
        BanditArmId::ExplanationFirst,
        BanditArmId::Adaptive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aggressive => "aggressive",
            Self::Conservative => "conservative",
            Self::ExplanationFirst => "explanation-first",
            Self::Adaptive => "adaptive",
        }
    }

    pub fn profile_id(&self) -> ProfileId {
        match self {
            Self::Aggressive => ProfileId::Fast,
            Self::Conservative => ProfileId::Slow,
            Self::ExplanationFirst => ProfileId::ExplanationFirst,
            Self::Adaptive => ProfileId::Adaptive,
        }
    }

    pub fn profile(&self) -> EscalationProfile {
        get_profile(self.profile_id())
    }

    pub fn from_profile(id: ProfileId) -> Self {
        match id {
            ProfileId::Fast => Self::Aggressive,
            ProfileId::Slow => Self::Conservative,
            ProfileId::ExplanationFirst => Self::ExplanationFirst,
            ProfileId::Adaptive => Self::Adaptive,
        }
    }
}

impl fmt::Display for BanditArmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BanditArmId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aggressive" => Ok(Self::Aggressive),
            "conservative" => Ok(Self::Conservative),
            "explanation-first" => Ok(Self::ExplanationFirst),
            "adaptive" => Ok(Self::Adaptive),
            other => Err(format!("unknown bandit arm: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSelection {
    pub arm_id: BanditArmId,
    pub profile: EscalationProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardRecord {
    pub arm_id: BanditArmId,
    pub reward: f64,
    pub components: RewardComponents,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerBanditStats {
    pub learner_id: String,
    pub arms: Vec<ArmStats<BanditArmId>>,
    pub best_arm: Option<BanditArmId>,
    pub total_pulls: u64,
}

type LearnerBandit = ThompsonBandit<BanditArmId>;

/// One Thompson bandit per learner, created on first use.
///
/// The outer map lock is only held to look up or insert an entry; sampling
/// and updates lock the learner's own bandit, so different learners never
/// wait on each other.
pub struct LearnerBanditManager {
    config: BanditConfig,
    reward_config: RewardConfig,
    bandits: RwLock<HashMap<String, Arc<Mutex<LearnerBandit>>>>,
}

impl LearnerBanditManager {
    pub fn new(config: BanditConfig, reward_config: RewardConfig) -> Self {
        Self {
            config,
            reward_config,
            bandits: RwLock::new(HashMap::new()),
        }
    }

    fn create_bandit(&self, learner_id: &str) -> LearnerBandit {
        let bandit = match self.config.seed {
            Some(seed) => ThompsonBandit::with_seed(BanditArmId::ALL, seed ^ learner_hash(learner_id)),
            None => ThompsonBandit::new(BanditArmId::ALL),
        };
        bandit.with_prior(self.config.prior_alpha, self.config.prior_beta)
    }

    fn bandit_for(&self, learner_id: &str) -> Arc<Mutex<LearnerBandit>> {
        if let Some(existing) = self.bandits.read().get(learner_id) {
            return Arc::clone(existing);
        }
        let mut map = self.bandits.write();
        let entry = map.entry(learner_id.to_string()).or_insert_with(|| {
            debug!(learner_id, "creating learner bandit");
            Arc::new(Mutex::new(self.create_bandit(learner_id)))
        });
        Arc::clone(entry)
    }

    fn existing(&self, learner_id: &str) -> Option<Arc<Mutex<LearnerBandit>>> {
        self.bandits.read().get(learner_id).map(Arc::clone)
    }

    pub fn select_profile_for_learner(&self, learner_id: &str) -> Result<ProfileSelection, PolicyError> {
        let bandit = self.bandit_for(learner_id);
        let arm_id = bandit.lock().select_arm()?;
        debug!(learner_id, arm = arm_id.as_str(), "escalation profile selected");
        Ok(ProfileSelection {
            arm_id,
            profile: arm_id.profile(),
        })
    }

    pub fn record_outcome(
        &self,
        learner_id: &str,
        arm_id: BanditArmId,
        outcome: &LearningOutcome,
    ) -> RewardRecord {
        let components = RewardComponents::from_outcome(outcome);
        let reward = calculate_reward(&components, &self.reward_config);

        let bandit = self.bandit_for(learner_id);
        bandit.lock().update_arm(&arm_id, reward);

        debug!(learner_id, arm = arm_id.as_str(), reward, "learner bandit updated");
        RewardRecord {
            arm_id,
            reward,
            components,
        }
    }

    pub fn get_learner_stats(&self, learner_id: &str) -> Option<LearnerBanditStats> {
        let bandit = self.existing(learner_id)?;
        let guard = bandit.lock();
        Some(LearnerBanditStats {
            learner_id: learner_id.to_string(),
            arms: guard.all_arm_stats(),
            best_arm: guard.get_best_arm(),
            total_pulls: guard.total_pulls(),
        })
    }

    /// Drops the learner's bandit; the next call recreates it from the prior.
    pub fn reset_learner(&self, learner_id: &str) -> bool {
        let removed = self.bandits.write().remove(learner_id).is_some();
        if removed {
            info!(learner_id, "learner bandit reset");
        }
        removed
    }

    pub fn get_learner_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.bandits.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn has_bandit(&self, learner_id: &str) -> bool {
        self.bandits.read().contains_key(learner_id)
    }

    pub fn get_learner_count(&self) -> usize {
        self.bandits.read().len()
    }

    pub fn clear_all(&self) {
        self.bandits.write().clear();
    }

    pub fn export_learner(&self, learner_id: &str) -> Option<BanditSnapshot<BanditArmId>> {
        self.existing(learner_id).map(|b| b.lock().serialize())
    }

    pub fn import_learner(&self, learner_id: &str, snapshot: BanditSnapshot<BanditArmId>) {
        let bandit = self.bandit_for(learner_id);
        bandit.lock().deserialize(snapshot);
    }
}

impl Default for LearnerBanditManager {
    fn default() -> Self {
        Self::new(BanditConfig::default(), RewardConfig::default())
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over the id's bytes. Seeded streams depend on it, so it must not
/// change between builds.
fn learner_hash(learner_id: &str) -> u64 {
    learner_id.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
    })
}
