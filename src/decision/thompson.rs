//! Thompson Sampling bandit over a fixed set of named arms.
//!
//! Each arm keeps a Beta(alpha, beta) posterior over its reward. Selection
//! draws one sample per arm and picks the largest; updates accept fractional
//! rewards in [0, 1] so the posterior moves toward the observed reward.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PolicyError;

const MAX_GAMMA_ITERATIONS: usize = 10_000;
const Z_95: f64 = 1.96;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditArm<A> {
    pub id: A,
    pub alpha: f64,
    pub beta: f64,
    pub pull_count: u64,
    pub cumulative_reward: f64,
}

impl<A> BanditArm<A> {
    pub fn new(id: A, prior_alpha: f64, prior_beta: f64) -> Self {
        Self {
            id,
            alpha: prior_alpha,
            beta: prior_beta,
            pull_count: 0,
            cumulative_reward: 0.0,
        }
    }

    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    pub fn variance(&self) -> f64 {
        let sum = self.alpha + self.beta;
        self.alpha * self.beta / (sum * sum * (sum + 1.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmStats<A> {
    pub id: A,
    pub mean: f64,
    pub variance: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub pull_count: u64,
    pub cumulative_reward: f64,
}

/// Opaque persisted form of a bandit's arms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditSnapshot<A> {
    pub arms: Vec<BanditArm<A>>,
}

#[derive(Debug, Clone)]
pub struct ThompsonBandit<A> {
    arms: Vec<BanditArm<A>>,
    rng: StdRng,
}

impl<A> ThompsonBandit<A>
where
    A: Clone + PartialEq + std::fmt::Debug,
{
    pub fn new(arm_ids: impl IntoIterator<Item = A>) -> Self {
        Self::with_rng(arm_ids, StdRng::from_os_rng())
    }

    pub fn with_seed(arm_ids: impl IntoIterator<Item = A>, seed: u64) -> Self {
        Self::with_rng(arm_ids, StdRng::seed_from_u64(seed))
    }

    fn with_rng(arm_ids: impl IntoIterator<Item = A>, rng: StdRng) -> Self {
        Self {
            arms: arm_ids
                .into_iter()
                .map(|id| BanditArm::new(id, 1.0, 1.0))
                .collect(),
            rng,
        }
    }

    /// Replaces the uniform prior on every arm that has not been pulled yet.
    pub fn with_prior(mut self, prior_alpha: f64, prior_beta: f64) -> Self {
        let alpha = prior_alpha.max(1.0);
        let beta = prior_beta.max(1.0);
        for arm in self.arms.iter_mut().filter(|a| a.pull_count == 0) {
            arm.alpha = alpha;
            arm.beta = beta;
        }
        self
    }

    pub fn arms(&self) -> &[BanditArm<A>] {
        &self.arms
    }

    pub fn arm(&self, arm_id: &A) -> Option<&BanditArm<A>> {
        self.arms.iter().find(|a| &a.id == arm_id)
    }

    pub fn select_arm(&mut self) -> Result<A, PolicyError> {
        if self.arms.is_empty() {
            return Err(PolicyError::NoArms);
        }

        let mut best_sample = f64::NEG_INFINITY;
        let mut best_idx = 0;
        for idx in 0..self.arms.len() {
            let (alpha, beta) = (self.arms[idx].alpha, self.arms[idx].beta);
            let sample = sample_beta(&mut self.rng, alpha, beta);
            if sample > best_sample {
                best_sample = sample;
                best_idx = idx;
            }
        }

        let chosen = self.arms[best_idx].id.clone();
        debug!(arm = ?chosen, sample = best_sample, "thompson arm selected");
        Ok(chosen)
    }

    /// Unknown arms are ignored.
    pub fn update_arm(&mut self, arm_id: &A, reward: f64) {
        let Some(arm) = self.arms.iter_mut().find(|a| &a.id == arm_id) else {
            debug!(arm = ?arm_id, "update for unknown arm ignored");
            return;
        };

        let reward = if reward.is_finite() { reward.clamp(0.0, 1.0) } else { 0.0 };
        arm.alpha += reward;
        arm.beta += 1.0 - reward;
        arm.pull_count += 1;
        arm.cumulative_reward += reward;
    }

    pub fn get_arm_stats(&self, arm_id: &A) -> Option<ArmStats<A>> {
        self.arm(arm_id).map(arm_stats)
    }

    pub fn all_arm_stats(&self) -> Vec<ArmStats<A>> {
        self.arms.iter().map(arm_stats).collect()
    }

    /// Exploitative pick by posterior mean; ties go to the first arm.
    pub fn get_best_arm(&self) -> Option<A> {
        let mut best: Option<&BanditArm<A>> = None;
        for arm in &self.arms {
            if best.map_or(true, |b| arm.mean() > b.mean()) {
                best = Some(arm);
            }
        }
        best.map(|a| a.id.clone())
    }

    pub fn total_pulls(&self) -> u64 {
        self.arms.iter().map(|a| a.pull_count).sum()
    }

    pub fn serialize(&self) -> BanditSnapshot<A> {
        BanditSnapshot {
            arms: self.arms.clone(),
        }
    }

    pub fn deserialize(&mut self, snapshot: BanditSnapshot<A>) {
        self.arms = snapshot.arms;
    }
}

impl<A> ThompsonBandit<A>
where
    A: Clone + PartialEq + std::fmt::Debug + Serialize + for<'de> Deserialize<'de>,
{
    pub fn to_json(&self) -> Result<String, PolicyError> {
        Ok(serde_json::to_string(&self.serialize())?)
    }

    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let snapshot: BanditSnapshot<A> = serde_json::from_str(json)?;
        let mut bandit = Self::with_rng(Vec::new(), StdRng::from_os_rng());
        bandit.deserialize(snapshot);
        Ok(bandit)
    }
}

fn arm_stats<A: Clone>(arm: &BanditArm<A>) -> ArmStats<A> {
    let mean = arm.mean();
    let variance = arm.variance();
    let half_width = Z_95 * variance.sqrt();
    ArmStats {
        id: arm.id.clone(),
        mean,
        variance,
        ci_lower: (mean - half_width).clamp(0.0, 1.0),
        ci_upper: (mean + half_width).clamp(0.0, 1.0),
        pull_count: arm.pull_count,
        cumulative_reward: arm.cumulative_reward,
    }
}

/// Beta(alpha, beta) via the ratio of two Gamma(shape, 1) draws.
pub fn sample_beta<R: Rng>(rng: &mut R, alpha: f64, beta: f64) -> f64 {
    let x = sample_gamma(rng, alpha, 1.0);
    let y = sample_gamma(rng, beta, 1.0);
    let sum = x + y;
    if sum <= 0.0 || !sum.is_finite() {
        return 0.5;
    }
    (x / sum).clamp(0.0, 1.0)
}

/// Marsaglia-Tsang rejection sampler. Shapes below 1 are boosted by one and
/// corrected with `u^(1/shape)`; the bandit never goes there because its
/// parameters start at 1 and only grow.
pub fn sample_gamma<R: Rng>(rng: &mut R, shape: f64, scale: f64) -> f64 {
    if shape < 1.0 {
        let u: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
        return sample_gamma(rng, shape + 1.0, scale) * u.powf(1.0 / shape.max(1e-10));
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();

    for _ in 0..MAX_GAMMA_ITERATIONS {
        let z = standard_normal(rng);
        if z <= -1.0 / c {
            continue;
        }
        let v = (1.0 + c * z).powi(3);
        let u: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
        if u.ln() < 0.5 * z * z + d - d * v + d * v.ln() {
            return d * v * scale;
        }
    }

    d * scale
}

/// Box-Muller draw, taking the sine or cosine branch at random.
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.random::<f64>().max(1e-12);
    let u2: f64 = rng.random();
    let radius = (-2.0 * u1.ln()).sqrt();
    let theta = 2.0 * std::f64::consts::PI * u2;
    if rng.random_bool(0.5) {
        radius * theta.sin()
    } else {
        radius * theta.cos()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(ids: &[&'static str]) -> ThompsonBandit<&'static str> {
        ThompsonBandit::with_seed(ids.iter().copied(), 42)
    }

    #[test]
    fn new_arms_start_with_uniform_prior() {
        let bandit = seeded(&["a", "b"]);
        for arm in bandit.arms() {
            assert_eq!(arm.alpha, 1.0);
            assert_eq!(arm.beta, 1.0);
            assert_eq!(arm.pull_count, 0);
        }
    }

    #[test]
    fn select_arm_fails_without_arms() {
        let mut bandit: ThompsonBandit<&str> = ThompsonBandit::with_seed(Vec::new(), 1);
        assert!(matches!(bandit.select_arm(), Err(PolicyError::NoArms)));
    }

    #[test]
    fn beta_samples_stay_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(7);
        for &(a, b) in &[(1.0, 1.0), (1.0, 50.0), (50.0, 1.0), (3.5, 2.25)] {
            for _ in 0..200 {
                let s = sample_beta(&mut rng, a, b);
                assert!((0.0..=1.0).contains(&s), "sample {s} out of range for ({a}, {b})");
            }
        }
    }

    #[test]
    fn skewed_posteriors_produce_skewed_samples() {
        let mut rng = StdRng::seed_from_u64(11);
        let high: f64 = (0..500).map(|_| sample_beta(&mut rng, 20.0, 2.0)).sum::<f64>() / 500.0;
        let low: f64 = (0..500).map(|_| sample_beta(&mut rng, 2.0, 20.0)).sum::<f64>() / 500.0;
        assert!(high > 0.8, "mean {high}");
        assert!(low < 0.2, "mean {low}");
    }

    #[test]
    fn update_clamps_reward_and_moves_mean() {
        let mut bandit = seeded(&["a"]);
        bandit.update_arm(&"a", 3.0);
        let arm = bandit.arm(&"a").unwrap();
        assert_eq!(arm.alpha, 2.0);
        assert_eq!(arm.beta, 1.0);
        assert_eq!(arm.cumulative_reward, 1.0);

        let before = bandit.get_arm_stats(&"a").unwrap().mean;
        bandit.update_arm(&"a", 0.0);
        let after = bandit.get_arm_stats(&"a").unwrap().mean;
        assert!(after < before);
        assert_eq!(bandit.arm(&"a").unwrap().pull_count, 2);
    }

    #[test]
    fn unknown_arm_update_is_ignored() {
        let mut bandit = seeded(&["a"]);
        let before = bandit.serialize();
        bandit.update_arm(&"missing", 1.0);
        assert_eq!(bandit.serialize(), before);
        assert!(bandit.get_arm_stats(&"missing").is_none());
    }

    #[test]
    fn stats_confidence_interval_is_clipped() {
        let bandit = seeded(&["a"]);
        let stats = bandit.get_arm_stats(&"a").unwrap();
        assert!((stats.mean - 0.5).abs() < 1e-12);
        // Beta(1,1): variance = 1 / (4 * 3)
        assert!((stats.variance - 1.0 / 12.0).abs() < 1e-12);
        assert!(stats.ci_lower >= 0.0);
        assert!(stats.ci_upper <= 1.0);
    }

    #[test]
    fn rewarded_arm_is_selected_more_often() {
        let mut bandit = seeded(&["good", "bad"]);
        for _ in 0..60 {
            bandit.update_arm(&"good", 0.9);
            bandit.update_arm(&"bad", 0.1);
        }
        let good_picks = (0..300)
            .filter(|_| bandit.select_arm().unwrap() == "good")
            .count();
        assert!(good_picks > 240, "good picked {good_picks} / 300");
        assert_eq!(bandit.get_best_arm(), Some("good"));
    }

    #[test]
    fn best_arm_is_none_without_arms() {
        let bandit: ThompsonBandit<&str> = ThompsonBandit::with_seed(Vec::new(), 1);
        assert!(bandit.get_best_arm().is_none());
    }

    #[test]
    fn snapshot_restores_arm_values() {
        let mut bandit = seeded(&["a", "b"]);
        bandit.update_arm(&"b", 0.75);
        let snapshot = bandit.serialize();

        let mut restored = seeded(&["a", "b"]);
        restored.deserialize(snapshot.clone());
        assert_eq!(restored.arms(), snapshot.arms.as_slice());
    }

    #[test]
    fn json_round_trip_keeps_pull_counts() {
        let mut bandit: ThompsonBandit<String> =
            ThompsonBandit::with_seed(vec!["x".to_string()], 3);
        bandit.update_arm(&"x".to_string(), 0.4);
        let json = bandit.to_json().unwrap();
        let restored: ThompsonBandit<String> = ThompsonBandit::from_json(&json).unwrap();
        assert_eq!(restored.arm(&"x".to_string()).unwrap().pull_count, 1);
        assert!(ThompsonBandit::<String>::from_json("{not json").is_err());
    }
}
