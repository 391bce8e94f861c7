//! Outcome simulator for simulated launches.
//!
//! Draws an outcome class from per-mode base probabilities (shifted by the
//! edge) and then a payout multiplier whose range depends on the mode.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use super::economy::round_money;
use crate::types::Mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Rug,
    Flop,
    Breakeven,
    Pump,
    Moon,
}

impl Outcome {
    pub const ALL: [Outcome; 5] = [
        Outcome::Rug,
        Outcome::Flop,
        Outcome::Breakeven,
        Outcome::Pump,
        Outcome::Moon,
    ];
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Rug => "RUG",
            Outcome::Flop => "FLOP",
            Outcome::Breakeven => "BREAKEVEN",
            Outcome::Pump => "PUMP",
            Outcome::Moon => "MOON",
        };
        write!(f, "{s}")
    }
}

/// Probabilities indexed like `Outcome::ALL`.
pub type OutcomeProbs = [f64; 5];

const RUG: usize = 0;
const FLOP: usize = 1;
const PUMP: usize = 3;
const MOON: usize = 4;

/// Base outcome distribution per mode.
pub fn base_probabilities(mode: Mode) -> OutcomeProbs {
    match mode {
        Mode::Conservative => [0.02, 0.18, 0.60, 0.20, 0.00],
        Mode::Balanced | Mode::NoLaunch => [0.20, 0.20, 0.30, 0.25, 0.05],
        Mode::Growth => [0.15, 0.15, 0.30, 0.30, 0.10],
        Mode::Signal => [0.25, 0.20, 0.20, 0.25, 0.10],
        Mode::Aggressive => [0.40, 0.10, 0.10, 0.30, 0.10],
    }
}

/// How strongly the edge reshapes a mode's distribution.
pub fn sensitivity(mode: Mode) -> f64 {
    match mode {
        Mode::Conservative => 0.2,
        Mode::Balanced => 0.8,
        Mode::Growth => 0.9,
        Mode::Signal | Mode::Aggressive => 1.0,
        Mode::NoLaunch => 0.5,
    }
}

fn shift(p: &mut OutcomeProbs, from: [usize; 2], to: [usize; 2], amount: f64) {
    let from_mass: f64 = from.iter().map(|&i| p[i]).sum();
    let to_mass: f64 = to.iter().map(|&i| p[i]).sum();
    let moved = amount.min(from_mass);

    if from_mass > 0.0 {
        for &i in &from {
            p[i] -= moved * (p[i] / from_mass);
        }
    }
    if to_mass > 0.0 {
        for &i in &to {
            p[i] += moved * (p[i] / to_mass);
        }
    } else {
        for &i in &to {
            p[i] += moved / to.len() as f64;
        }
    }
}

/// Move `|edge| · sensitivity · 0.4` of probability mass between the bad
/// (RUG, FLOP) and good (PUMP, MOON) outcomes, proportionally within each
/// group, then renormalise.
pub fn apply_edge(base: OutcomeProbs, edge: f64, sensitivity: f64) -> OutcomeProbs {
    let edge = edge.clamp(-1.0, 1.0);
    let sensitivity = sensitivity.clamp(0.0, 2.0);
    let transfer = edge.abs() * sensitivity * 0.4;

    let mut p = base;
    if edge > 0.0 {
        shift(&mut p, [RUG, FLOP], [PUMP, MOON], transfer);
    } else if edge < 0.0 {
        shift(&mut p, [PUMP, MOON], [RUG, FLOP], transfer);
    }

    let total: f64 = p.iter().sum();
    if total <= 0.0 {
        return base;
    }
    for v in p.iter_mut() {
        *v /= total;
    }
    p
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedOutcome {
    pub outcome: Outcome,
    pub multiplier: f64,
    pub payout_mon: f64,
    pub probs: OutcomeProbs,
}

/// Seedable launch-outcome sampler.
pub struct OutcomeSimulator {
    rng: StdRng,
}

impl OutcomeSimulator {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Simulate one launch of `stake` MON.
    pub fn simulate(&mut self, stake: f64, mode: Mode, edge: f64) -> SimulatedOutcome {
        let probs = apply_edge(base_probabilities(mode), edge, sensitivity(mode));
        let outcome = self.draw_outcome(&probs);
        let multiplier = self.sample_multiplier(outcome, mode);
        let payout_mon = round_money((stake * multiplier).max(0.0));

        debug!(%mode, edge, %outcome, multiplier, payout_mon, "Simulated launch outcome");

        SimulatedOutcome {
            outcome,
            multiplier: (multiplier * 1e4).round() / 1e4,
            payout_mon,
            probs,
        }
    }

    fn draw_outcome(&mut self, probs: &OutcomeProbs) -> Outcome {
        let roll: f64 = self.rng.gen();
        let mut acc = 0.0;
        for (outcome, p) in Outcome::ALL.iter().zip(probs.iter()) {
            acc += p;
            if roll < acc {
                return *outcome;
            }
        }
        // floating slack: fall back to the last outcome with mass
        Outcome::ALL
            .iter()
            .zip(probs.iter())
            .rev()
            .find(|(_, p)| **p > 0.0)
            .map(|(o, _)| *o)
            .unwrap_or(Outcome::Breakeven)
    }

    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        self.rng.gen_range(lo..hi)
    }

    fn lognormal(&mut self, mu: f64, sigma: f64) -> f64 {
        match LogNormal::new(mu, sigma) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(e) => {
                warn!(mu, sigma, error = %e, "Invalid log-normal parameters, using the median");
                mu.exp()
            }
        }
    }

    fn sample_multiplier(&mut self, outcome: Outcome, mode: Mode) -> f64 {
        match outcome {
            Outcome::Rug => 0.0,
            Outcome::Breakeven => self.uniform(0.9, 1.1),
            Outcome::Flop => match mode {
                Mode::Conservative => self.uniform(0.5, 0.9),
                Mode::Aggressive => self.uniform(0.01, 0.5),
                _ => self.uniform(0.3, 0.7),
            },
            Outcome::Pump => match mode {
                Mode::Conservative => self.uniform(1.1, 1.8),
                Mode::Aggressive => self.lognormal(0.7, 0.4).clamp(1.1, 8.0),
                _ => self.lognormal(0.35, 0.3).clamp(1.1, 4.0),
            },
            Outcome::Moon => match mode {
                Mode::Conservative => 2.0,
                Mode::Aggressive => self.lognormal(1.8, 0.6).clamp(3.0, 50.0),
                _ => self.lognormal(1.5, 0.5).clamp(3.0, 15.0),
            },
        }
    }
}
