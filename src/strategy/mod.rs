//! Strategy engine: edge classification, bandit mode selection, reward
//! shaping, and launch gating.

pub mod bandit;
pub mod edge;
pub mod reward;
pub mod risk;

use tracing::info;

use crate::types::{Bucket, MarketSignals, Mode};
use bandit::{BanditTable, LearningUpdate, DEFAULT_EXPLORATION_C};

// ---------------------------------------------------------------------------
// Policy decision
// ---------------------------------------------------------------------------

/// The mode chosen for this cycle and the economic policy it carries.
/// Transient: logged, never persisted as-is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyDecision {
    pub mode: Mode,
    pub bucket: Bucket,
    pub edge: f64,
    /// UCB score of the winning mode; +inf while it is unexplored.
    pub score: f64,
    /// Bucket pull count plus one at selection time.
    pub t: u64,
    pub buyback_pct: f64,
    pub burn_pct: f64,
}

impl PolicyDecision {
    /// Score suitable for JSON (which has no infinity).
    pub fn finite_score(&self) -> Option<f64> {
        self.score.is_finite().then_some(self.score)
    }
}

// ---------------------------------------------------------------------------
// Policy engine
// ---------------------------------------------------------------------------

/// Pipelines signals → edge → bucket → UCB selection, and feeds rewards
/// back into the bandit.
pub struct PolicyEngine {
    exploration_c: f64,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(DEFAULT_EXPLORATION_C)
    }
}

impl PolicyEngine {
    pub fn new(exploration_c: f64) -> Self {
        Self { exploration_c }
    }

    pub fn exploration_c(&self) -> f64 {
        self.exploration_c
    }

    /// Pick this cycle's mode.
    pub fn decide(&self, signals: &MarketSignals, bandit: &BanditTable) -> PolicyDecision {
        let edge = edge::compute_edge(signals);
        let bucket = edge::bucket_for(edge);
        let sel = bandit.select(bucket, self.exploration_c);

        let decision = PolicyDecision {
            mode: sel.mode,
            bucket,
            edge,
            score: sel.score,
            t: sel.t,
            buyback_pct: sel.mode.buyback_pct(),
            burn_pct: sel.mode.burn_pct(),
        };

        info!(
            mode = %decision.mode,
            bucket = %decision.bucket,
            edge = format!("{:.3}", decision.edge),
            score = ?decision.finite_score(),
            t = decision.t,
            "Policy chosen"
        );

        decision
    }

    /// Turn a realized payout into a reward and fold it into the bandit.
    pub fn learn(
        &self,
        bandit: &mut BanditTable,
        bucket: Bucket,
        mode: Mode,
        payout: f64,
        stake: f64,
        edge: f64,
    ) -> LearningUpdate {
        let reward = reward::compute_reward(payout, stake, mode, edge);
        let update = bandit.update(bucket, mode, reward);
        info!(
            %bucket,
            %mode,
            reward = format!("{:.4}", reward),
            pulls = update.pulls,
            mean = format!("{:.4}", update.mean_reward),
            "Bandit updated"
        );
        update
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_carries_mode_policy() {
        let engine = PolicyEngine::default();
        let bandit = BanditTable::seeded();
        let d = engine.decide(&MarketSignals::default(), &bandit);
        assert_eq!(d.bucket, Bucket::Neutral);
        assert_eq!(d.mode, Mode::Conservative);
        assert_eq!(d.buyback_pct, 0.80);
        assert_eq!(d.burn_pct, 0.0);
        assert!(d.finite_score().is_none());
    }

    #[test]
    fn test_decide_uses_bucket_from_signals() {
        let engine = PolicyEngine::default();
        let bandit = BanditTable::seeded();
        let hot = MarketSignals {
            trend: 1.0,
            sentiment: 1.0,
            novelty: 1.0,
            liquidity: 1.0,
            competition: 0.0,
        };
        assert_eq!(engine.decide(&hot, &bandit).bucket, Bucket::Good);
    }

    #[test]
    fn test_learn_updates_only_target_pair() {
        let engine = PolicyEngine::default();
        let mut bandit = BanditTable::seeded();
        let u = engine.learn(&mut bandit, Bucket::Good, Mode::Growth, 15.0, 5.0, 0.5);
        assert_eq!(u.pulls, 1);
        assert!((u.reward - 1.99).abs() < 1e-12);
        assert_eq!(bandit.bucket_pulls(Bucket::Good), 1);
        assert_eq!(bandit.bucket_pulls(Bucket::Neutral), 0);
    }

    #[test]
    fn test_no_launch_learns_zero() {
        let engine = PolicyEngine::default();
        let mut bandit = BanditTable::seeded();
        let u = engine.learn(&mut bandit, Bucket::Bad, Mode::NoLaunch, 0.0, 0.0, -0.5);
        assert_eq!(u.reward, 0.0);
        assert_eq!(u.mean_reward, 0.0);
    }
}
