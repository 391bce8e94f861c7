//! Reward shaping for the bandit.
//!
//! Reward is the launch ROI minus an action cost that grows as the edge
//! turns negative. It is deliberately unclamped.

use crate::types::Mode;

/// Flat cost charged on every launch.
pub const BASE_ACTION_COST: f64 = 0.01;

/// Additional cost per unit of negative edge.
pub const NEGATIVE_EDGE_COST: f64 = 0.80;

/// Hurdle a launch must clear at the given edge.
pub fn action_cost(edge: f64) -> f64 {
    BASE_ACTION_COST + NEGATIVE_EDGE_COST * (-edge).max(0.0)
}

/// `(payout - stake) / stake - action_cost(edge)`; zero for `no_launch` or
/// a non-positive stake.
pub fn compute_reward(payout: f64, stake: f64, mode: Mode, edge: f64) -> f64 {
    if !mode.is_launch() || stake <= 0.0 {
        return 0.0;
    }
    let roi = (payout - stake) / stake;
    roi - action_cost(edge)
}
