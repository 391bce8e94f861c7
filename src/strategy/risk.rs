//! Launch gates.
//!
//! Every reason a chosen launch may not go ahead: the policy itself said
//! `no_launch`, the SEER reserve is too thin, the portfolio is full, the
//! cognition service declined, the loss-streak guard is active, another
//! launch holds the lock, or the cooldown has not elapsed. Gates never
//! mutate state; they only explain why the cycle short-circuits.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::PolicyDecision;
use crate::types::{AgentState, Mode};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Maximum EARLY/ACTIVE/EXITING positions before launches pause.
    pub max_active_positions: usize,
    /// Minimum seconds between two launches.
    pub launch_cooldown_secs: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_active_positions: 3,
            launch_cooldown_secs: 24 * 60 * 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

/// Why a launch was not attempted. All variants are non-fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GateRejection {
    #[error("Policy gate: no_launch selected")]
    NoLaunchPolicy,

    #[error("Insufficient reserve: SEER {seer:.4} < min_seer_to_live {min:.4}")]
    InsufficientReserve { seer: f64, min: f64 },

    #[error("Portfolio full: {active} active positions (max {max})")]
    PortfolioFull { active: usize, max: usize },

    #[error("Cognition declined launch: {reason}")]
    CognitionDeclined { reason: String },

    #[error("Core guard active until {until}")]
    RiskGuardBlocked { until: DateTime<Utc> },

    #[error("Launch already in progress")]
    LaunchInProgress,

    #[error("Launch cooldown active ({remaining_secs}s remaining)")]
    CooldownActive { remaining_secs: i64 },

    #[error("Insufficient MON after funding: {mon:.4} < {needed:.4}")]
    InsufficientFunding { mon: f64, needed: f64 },
}

impl GateRejection {
    /// Short machine-readable gate name for the event log.
    pub fn gate(&self) -> &'static str {
        match self {
            GateRejection::NoLaunchPolicy => "policy",
            GateRejection::InsufficientReserve { .. } => "economy",
            GateRejection::PortfolioFull { .. } => "portfolio",
            GateRejection::CognitionDeclined { .. } => "cognition",
            GateRejection::RiskGuardBlocked { .. } => "core_guard",
            GateRejection::LaunchInProgress => "launch_lock",
            GateRejection::CooldownActive { .. } => "cooldown",
            GateRejection::InsufficientFunding { .. } => "funding",
        }
    }

    /// Whether the chosen arm is still charged a zero-reward pull.
    pub fn charges_bandit(&self) -> bool {
        !matches!(
            self,
            GateRejection::LaunchInProgress | GateRejection::CooldownActive { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

pub struct LaunchGate {
    config: RiskConfig,
}

impl LaunchGate {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Run every pre-launch gate in order and stop at the first rejection.
    pub fn check(
        &self,
        decision: &PolicyDecision,
        state: &AgentState,
        cognition_launch: bool,
        cognition_reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), GateRejection> {
        if decision.mode == Mode::NoLaunch {
            return Err(GateRejection::NoLaunchPolicy);
        }

        if let Err(e) = state.economy.can_launch() {
            debug!(error = %e, "Economy gate");
            let b = &state.economy.balances;
            return Err(GateRejection::InsufficientReserve {
                seer: b.seer,
                min: state.economy.params.min_seer_to_live,
            });
        }

        let active = state.portfolio.blocking_count();
        if active >= self.config.max_active_positions {
            return Err(GateRejection::PortfolioFull {
                active,
                max: self.config.max_active_positions,
            });
        }

        if !cognition_launch {
            return Err(GateRejection::CognitionDeclined {
                reason: cognition_reason.unwrap_or("no reason given").to_string(),
            });
        }

        if state.core_guard.is_blocked(now) {
            if let Some(until) = state.core_guard.launch_blocked_until {
                return Err(GateRejection::RiskGuardBlocked { until });
            }
        }

        if state.launch_control.launch_in_progress {
            return Err(GateRejection::LaunchInProgress);
        }

        if let Some(last) = state.launch_control.last_launch_at {
            let cooldown = Duration::seconds(self.config.launch_cooldown_secs);
            let elapsed = now - last;
            if elapsed < cooldown {
                return Err(GateRejection::CooldownActive {
                    remaining_secs: (cooldown - elapsed).num_seconds(),
                });
            }
        }

        info!(mode = %decision.mode, bucket = %decision.bucket, "All launch gates passed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::economy::EconomyParams;
    use crate::types::{Bucket, Position, PositionStatus};

    fn make_state() -> AgentState {
        AgentState::new("test", 1000.0, EconomyParams::default(), 1.0, 100)
    }

    fn decision(mode: Mode) -> PolicyDecision {
        PolicyDecision {
            mode,
            bucket: Bucket::Neutral,
            edge: 0.1,
            score: 1.0,
            t: 1,
            buyback_pct: mode.buyback_pct(),
            burn_pct: mode.burn_pct(),
        }
    }

    fn gate() -> LaunchGate {
        LaunchGate::new(RiskConfig::default())
    }

    #[test]
    fn test_all_clear() {
        let state = make_state();
        assert!(gate().check(&decision(Mode::Balanced), &state, true, None, Utc::now()).is_ok());
    }

    #[test]
    fn test_no_launch_policy_first() {
        let mut state = make_state();
        state.economy.balances.seer = 0.0;
        let err = gate().check(&decision(Mode::NoLaunch), &state, true, None, Utc::now()).unwrap_err();
        assert_eq!(err, GateRejection::NoLaunchPolicy);
        assert!(err.charges_bandit());
    }

    #[test]
    fn test_reserve_gate() {
        let mut state = make_state();
        state.economy.balances.seer = 0.5;
        let err = gate().check(&decision(Mode::Growth), &state, true, None, Utc::now()).unwrap_err();
        assert!(matches!(err, GateRejection::InsufficientReserve { .. }));
        assert_eq!(err.gate(), "economy");
    }

    #[test]
    fn test_portfolio_gate_ignores_moon_bags() {
        let mut state = make_state();
        let now = Utc::now();
        for i in 0..3 {
            let mut p = Position::open(format!("0x{i}"), format!("T{i}"), 100.0, 1.0, now);
            p.status = PositionStatus::MoonBag;
            state.portfolio.active_positions.push(p);
        }
        assert!(gate().check(&decision(Mode::Balanced), &state, true, None, now).is_ok());

        for i in 0..3 {
            state
                .portfolio
                .active_positions
                .push(Position::open(format!("0xb{i}"), format!("B{i}"), 100.0, 1.0, now));
        }
        let err = gate().check(&decision(Mode::Balanced), &state, true, None, now).unwrap_err();
        assert_eq!(err, GateRejection::PortfolioFull { active: 3, max: 3 });
    }

    #[test]
    fn test_cognition_decline() {
        let state = make_state();
        let err = gate()
            .check(&decision(Mode::Signal), &state, false, Some("meh"), Utc::now())
            .unwrap_err();
        assert_eq!(err, GateRejection::CognitionDeclined { reason: "meh".into() });
    }

    #[test]
    fn test_guard_block() {
        let mut state = make_state();
        let now = Utc::now();
        state.core_guard.launch_blocked_until = Some(now + Duration::hours(1));
        let err = gate().check(&decision(Mode::Signal), &state, true, None, now).unwrap_err();
        assert!(matches!(err, GateRejection::RiskGuardBlocked { .. }));

        // expired block is ignored
        state.core_guard.launch_blocked_until = Some(now - Duration::hours(1));
        assert!(gate().check(&decision(Mode::Signal), &state, true, None, now).is_ok());
    }

    #[test]
    fn test_lock_and_cooldown_do_not_charge_bandit() {
        let mut state = make_state();
        let now = Utc::now();
        state.launch_control.launch_in_progress = true;
        let err = gate().check(&decision(Mode::Balanced), &state, true, None, now).unwrap_err();
        assert_eq!(err, GateRejection::LaunchInProgress);
        assert!(!err.charges_bandit());

        state.launch_control.launch_in_progress = false;
        state.launch_control.last_launch_at = Some(now - Duration::hours(23));
        let err = gate().check(&decision(Mode::Balanced), &state, true, None, now).unwrap_err();
        assert_eq!(err, GateRejection::CooldownActive { remaining_secs: 3600 });
        assert!(!err.charges_bandit());

        state.launch_control.last_launch_at = Some(now - Duration::hours(24));
        assert!(gate().check(&decision(Mode::Balanced), &state, true, None, now).is_ok());
    }
}
