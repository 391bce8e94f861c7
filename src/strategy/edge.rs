//! Edge classifier.
//!
//! Folds the five cognition signals into a single signed edge and
//! discretises it into the bandit's context bucket. Pure and deterministic.

use tracing::debug;

use crate::types::{Bucket, MarketSignals};

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

const W_TREND: f64 = 0.35;
const W_SENTIMENT: f64 = 0.25;
const W_NOVELTY: f64 = 0.20;
const W_LIQUIDITY: f64 = 0.20;
const W_COMPETITION: f64 = 0.80;

/// Edge below this is a bad bucket.
pub const BAD_THRESHOLD: f64 = -0.2;
/// Edge above this is a good bucket.
pub const GOOD_THRESHOLD: f64 = 0.2;

fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        return 0.5;
    }
    x.clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Weighted edge in [-1, 1]. Each signal is clamped to [0, 1] first.
///
/// With all favourable signals at 1.0 and competition at 0.0 the raw value
/// is exactly 1.0; the floor in practice is -0.8.
pub fn compute_edge(signals: &MarketSignals) -> f64 {
    let raw = W_TREND * clamp01(signals.trend)
        + W_SENTIMENT * clamp01(signals.sentiment)
        + W_NOVELTY * clamp01(signals.novelty)
        + W_LIQUIDITY * clamp01(signals.liquidity)
        - W_COMPETITION * clamp01(signals.competition);

    let edge = raw.clamp(-1.0, 1.0);
    debug!(%signals, edge, "Edge computed");
    edge
}

/// Discretise an edge into its bucket.
pub fn bucket_for(edge: f64) -> Bucket {
    if edge < BAD_THRESHOLD {
        Bucket::Bad
    } else if edge > GOOD_THRESHOLD {
        Bucket::Good
    } else {
        Bucket::Neutral
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
