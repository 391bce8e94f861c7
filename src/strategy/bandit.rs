//! Contextual UCB bandit over launch modes.
//!
//! One `BucketStat` per (bucket, mode) pair. Selection is UCB1 within the
//! bucket implied by the current edge; unexplored modes score +inf so every
//! mode is tried once before scores compete. Rewards are folded in as an
//! exact running mean.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::types::{Bucket, Mode};

/// Default UCB exploration constant.
pub const DEFAULT_EXPLORATION_C: f64 = 1.5;

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketStat {
    pub pulls: u64,
    pub mean_reward: f64,
}

impl BucketStat {
    /// UCB1 score given `t` total pulls in the bucket (plus one).
    pub fn ucb_score(&self, t: u64, c: f64) -> f64 {
        if self.pulls == 0 {
            return f64::INFINITY;
        }
        let t = t.max(2) as f64;
        self.mean_reward + c * (t.ln() / self.pulls as f64).sqrt()
    }

    /// Fold one reward into the running mean.
    pub fn observe(&mut self, reward: f64) {
        self.pulls += 1;
        self.mean_reward += (reward - self.mean_reward) / self.pulls as f64;
    }
}

/// The mode picked for a bucket, with the score that won.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub mode: Mode,
    pub score: f64,
    pub t: u64,
}

/// Result of a bandit update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningUpdate {
    pub bucket: Bucket,
    pub mode: Mode,
    pub pulls: u64,
    pub mean_reward: f64,
    pub reward: f64,
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Per-bucket, per-mode statistics. Entries are never deleted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BanditTable {
    buckets: BTreeMap<Bucket, BTreeMap<Mode, BucketStat>>,
}

impl BanditTable {
    /// Every (bucket, mode) pair at zero pulls, zero mean.
    pub fn seeded() -> Self {
        let mut table = Self::default();
        for bucket in Bucket::ALL {
            let modes = table.buckets.entry(*bucket).or_default();
            for mode in Mode::ALL {
                modes.entry(*mode).or_default();
            }
        }
        table
    }

    pub fn stat(&self, bucket: Bucket, mode: Mode) -> Option<&BucketStat> {
        self.buckets.get(&bucket).and_then(|m| m.get(&mode))
    }

    /// Total pulls recorded in a bucket.
    pub fn bucket_pulls(&self, bucket: Bucket) -> u64 {
        self.buckets
            .get(&bucket)
            .map(|m| m.values().map(|s| s.pulls).sum())
            .unwrap_or(0)
    }

    /// Pick the highest-UCB mode in `bucket`.
    ///
    /// Modes are scanned in `Mode::ALL` order and only a strictly greater
    /// score replaces the incumbent, so ties go to the earlier mode. An empty
    /// bucket falls back to `Balanced`.
    pub fn select(&self, bucket: Bucket, c: f64) -> Selection {
        let t = 1 + self.bucket_pulls(bucket);

        let mut best: Option<(Mode, f64)> = None;
        if let Some(modes) = self.buckets.get(&bucket) {
            for (mode, stat) in modes {
                let score = stat.ucb_score(t, c);
                match best {
                    Some((_, best_score)) if score <= best_score => {}
                    _ => best = Some((*mode, score)),
                }
            }
        }

        let (mode, score) = best.unwrap_or((Mode::Balanced, 0.0));
        debug!(%bucket, %mode, score, t, "Bandit selection");
        Selection { mode, score, t }
    }

    /// Record `reward` for (bucket, mode), creating the entry if it is new.
    pub fn update(&mut self, bucket: Bucket, mode: Mode, reward: f64) -> LearningUpdate {
        let stat = self
            .buckets
            .entry(bucket)
            .or_default()
            .entry(mode)
            .or_default();
        stat.observe(reward);

        LearningUpdate {
            bucket,
            mode,
            pulls: stat.pulls,
            mean_reward: stat.mean_reward,
            reward,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_table_has_all_pairs() {
        let table = BanditTable::seeded();
        for b in Bucket::ALL {
            for m in Mode::ALL {
                let s = table.stat(*b, *m).unwrap();
                assert_eq!(s.pulls, 0);
                assert_eq!(s.mean_reward, 0.0);
            }
        }
    }

    #[test]
    fn test_unexplored_scores_infinite() {
        let s = BucketStat::default();
        assert!(s.ucb_score(10, DEFAULT_EXPLORATION_C).is_infinite());

        let explored = BucketStat { pulls: 1, mean_reward: 1_000.0 };
        assert!(s.ucb_score(10, 1.5) > explored.ucb_score(10, 1.5));
    }

    #[test]
    fn test_fresh_bucket_picks_first_mode() {
        let table = BanditTable::seeded();
        let sel = table.select(Bucket::Neutral, DEFAULT_EXPLORATION_C);
        assert_eq!(sel.mode, Mode::Conservative);
        assert_eq!(sel.t, 1);
    }

    #[test]
    fn test_every_mode_tried_before_scores_compete() {
        let mut table = BanditTable::seeded();
        let mut seen = Vec::new();
        for _ in 0..Mode::ALL.len() {
            let sel = table.select(Bucket::Good, DEFAULT_EXPLORATION_C);
            assert!(!seen.contains(&sel.mode));
            seen.push(sel.mode);
            // A huge reward would dominate if scores competed early.
            table.update(Bucket::Good, sel.mode, 100.0);
        }
        assert_eq!(seen, Mode::ALL.to_vec());
    }

    #[test]
    fn test_exploits_best_mean_once_explored() {
        let mut table = BanditTable::seeded();
        for m in Mode::ALL {
            let reward = if *m == Mode::Growth { 5.0 } else { -1.0 };
            table.update(Bucket::Bad, *m, reward);
        }
        let sel = table.select(Bucket::Bad, DEFAULT_EXPLORATION_C);
        assert_eq!(sel.mode, Mode::Growth);
        assert_eq!(sel.t, 7);
    }

    #[test]
    fn test_ucb_score_formula() {
        let s = BucketStat { pulls: 4, mean_reward: 0.25 };
        let expected = 0.25 + 1.5 * ((10.0f64).ln() / 4.0).sqrt();
        assert!((s.ucb_score(10, 1.5) - expected).abs() < 1e-12);
        // t below 2 is lifted to 2
        let low = 0.25 + 1.5 * ((2.0f64).ln() / 4.0).sqrt();
        assert!((s.ucb_score(1, 1.5) - low).abs() < 1e-12);
    }

    #[test]
    fn test_ties_go_to_first_mode() {
        let mut table = BanditTable::seeded();
        for m in Mode::ALL {
            table.update(Bucket::Neutral, *m, 0.5);
        }
        let sel = table.select(Bucket::Neutral, DEFAULT_EXPLORATION_C);
        assert_eq!(sel.mode, Mode::Conservative);
    }

    #[test]
    fn test_empty_bucket_falls_back_to_balanced() {
        let table = BanditTable::default();
        let sel = table.select(Bucket::Good, DEFAULT_EXPLORATION_C);
        assert_eq!(sel.mode, Mode::Balanced);
    }

    #[test]
    fn test_update_increments_pulls_by_one() {
        let mut table = BanditTable::seeded();
        for i in 1..=5u64 {
            let u = table.update(Bucket::Good, Mode::Signal, 0.1);
            assert_eq!(u.pulls, i);
        }
        assert_eq!(table.stat(Bucket::Good, Mode::Signal).unwrap().pulls, 5);
        assert_eq!(table.stat(Bucket::Bad, Mode::Signal).unwrap().pulls, 0);
    }

    #[test]
    fn test_incremental_mean_matches_batch_mean() {
        let rewards = [0.3, -1.2, 4.5, 0.0, -0.01, 2.25, -3.0, 0.7, 1e-3, 9.0];
        let mut table = BanditTable::seeded();
        for r in rewards {
            table.update(Bucket::Neutral, Mode::Aggressive, r);
        }
        let batch = rewards.iter().sum::<f64>() / rewards.len() as f64;
        let stat = table.stat(Bucket::Neutral, Mode::Aggressive).unwrap();
        assert_eq!(stat.pulls, rewards.len() as u64);
        assert!((stat.mean_reward - batch).abs() < 1e-12);
    }

    #[test]
    fn test_update_creates_missing_entry() {
        let mut table = BanditTable::default();
        let u = table.update(Bucket::Bad, Mode::NoLaunch, 0.0);
        assert_eq!(u.pulls, 1);
        assert!(table.stat(Bucket::Bad, Mode::NoLaunch).is_some());
    }

    #[test]
    fn test_table_json_roundtrip_keeps_stats() {
        let mut table = BanditTable::seeded();
        table.update(Bucket::Good, Mode::Growth, 0.42);
        let json = serde_json::to_string(&table).unwrap();
        assert!(json.contains("\"good\""));
        assert!(json.contains("\"growth\""));
        let back: BanditTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }
}
