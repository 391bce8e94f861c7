//! Cycle orchestrator.
//!
//! One tick of the agent: kill switch, price refresh, position sweep,
//! observe, decide, gate, fund, launch (simulated or live), learn, persist.
//! Gate hits and collaborator failures are recorded as events and end the
//! cycle normally; only persistence failures surface as `Err`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::economy::Balances;
use super::lifecycle::{PositionManager, SweepReport};
use super::simulator::{Outcome, OutcomeSimulator};
use crate::platforms::dry_run::DryRunVenue;
use crate::platforms::{
    CognitionInput, ExecutionError, LaunchRequest, LaunchVenue, PriceOracle, SignalSource,
    TradeExecutor,
};
use crate::storage::StateStore;
use crate::strategy::bandit::LearningUpdate;
use crate::strategy::risk::{GateRejection, LaunchGate};
use crate::strategy::{PolicyDecision, PolicyEngine};
use crate::types::{AgentEvent, AgentState, PolicyOrigin, Position};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What a launch that passes every gate actually does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Draw the payout from the outcome simulator and learn immediately.
    #[default]
    Simulated,
    /// Launch through the venue and learn when the position closes.
    Live,
}

#[derive(Debug, Clone)]
pub struct CycleConfig {
    pub agent_name: String,
    /// Token whose MON price funds launches.
    pub seer_token: String,
    pub launch_mode: LaunchMode,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            agent_name: "MemeSeer".to_string(),
            seer_token: "SEER".to_string(),
            launch_mode: LaunchMode::Simulated,
        }
    }
}

/// The external services a cycle talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn TradeExecutor>,
    pub venue: Arc<dyn LaunchVenue>,
    pub oracle: Arc<dyn PriceOracle>,
    pub signals: Arc<dyn SignalSource>,
}

impl Collaborators {
    /// Offline executor, venue and oracle sharing one `DryRunVenue`.
    pub fn dry_run(seer_price_mon: f64, signals: Arc<dyn SignalSource>) -> Self {
        let venue = Arc::new(DryRunVenue::new(seer_price_mon));
        Self {
            executor: venue.clone(),
            venue: venue.clone(),
            oracle: venue,
            signals,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Kill switch set; nothing ran.
    Halted,
    Gated(GateRejection),
    Simulated {
        outcome: Outcome,
        payout_mon: f64,
        reward: f64,
    },
    Launched {
        position_id: Uuid,
        symbol: String,
    },
    LaunchFailed {
        reason: String,
        refunded: bool,
    },
}

/// Summary of one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub decision: Option<PolicyDecision>,
    pub outcome: CycleOutcome,
    pub sweep: SweepReport,
    pub balances: Balances,
    pub treasury_mon: f64,
    pub timestamp: DateTime<Utc>,
}

impl CycleReport {
    fn new(state: &AgentState, decision: Option<PolicyDecision>, outcome: CycleOutcome, sweep: SweepReport, now: DateTime<Utc>) -> Self {
        Self {
            cycle: state.cycle_count,
            decision,
            outcome,
            sweep,
            balances: state.economy.balances,
            treasury_mon: state.economy.treasury_mon,
            timestamp: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct CycleRunner {
    config: CycleConfig,
    policy: PolicyEngine,
    gate: LaunchGate,
    lifecycle: PositionManager,
    simulator: OutcomeSimulator,
    collab: Collaborators,
}

impl CycleRunner {
    pub fn new(
        config: CycleConfig,
        policy: PolicyEngine,
        gate: LaunchGate,
        lifecycle: PositionManager,
        simulator: OutcomeSimulator,
        collab: Collaborators,
    ) -> Self {
        Self {
            config,
            policy,
            gate,
            lifecycle,
            simulator,
            collab,
        }
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    /// Run one full cycle against `state`, checkpointing through `store`.
    pub async fn run_cycle(
        &mut self,
        state: &mut AgentState,
        store: &dyn StateStore,
        now: DateTime<Utc>,
    ) -> Result<CycleReport> {
        // -- Kill switch --
        if state.system.kill_switch {
            warn!("Kill switch active, cycle halted");
            state.record(now, AgentEvent::KillSwitchActive);
            store.save(state).context("Failed to checkpoint halted cycle")?;
            return Ok(CycleReport::new(state, None, CycleOutcome::Halted, SweepReport::default(), now));
        }

        state.cycle_count += 1;
        info!(cycle = state.cycle_count, "Starting cycle");

        if state.learning.last_balances.is_none() {
            state.learning.last_balances = Some(state.economy.balances);
        }

        self.refresh_price(state).await;

        // -- Positions --
        let sweep = self
            .lifecycle
            .sweep(self.collab.executor.as_ref(), state, store, now)
            .await
            .context("Position sweep halted, skipping launch")?;
        self.credit_closed(state, &sweep, now);

        // -- Decide --
        let input = match self.collab.signals.observe().await {
            Ok(input) => input,
            Err(e) => {
                warn!(error = %e, "Signal source failed, treating as declined");
                CognitionInput::declined(format!("signal source unavailable: {e}"))
            }
        };

        let decision = self.policy.decide(&input.signals, &state.learning.bandit);
        state.record(
            now,
            AgentEvent::PolicyChosen {
                mode: decision.mode,
                bucket: decision.bucket,
                edge: decision.edge,
                score: decision.finite_score(),
                t: decision.t,
            },
        );

        // -- Gates --
        if let Err(rejection) =
            self.gate
                .check(&decision, state, input.launch, input.reason.as_deref(), now)
        {
            return self.finish_gated(state, store, decision, rejection, sweep, now);
        }

        // -- Funding --
        let funding = state.economy.fund_launch(decision.bucket);
        if funding.sold_seer > 0.0 {
            state.record(
                now,
                AgentEvent::Funding {
                    sold_seer: funding.sold_seer,
                    got_mon: funding.got_mon,
                    price: funding.price,
                    scale: funding.scale,
                },
            );
        }
        if !state.economy.has_launch_funds() {
            let rejection = GateRejection::InsufficientFunding {
                mon: state.economy.balances.mon,
                needed: state.economy.params.mon_per_launch,
            };
            return self.finish_gated(state, store, decision, rejection, sweep, now);
        }

        // -- Launch --
        let outcome = match self.config.launch_mode {
            LaunchMode::Simulated => self.launch_simulated(state, &decision, now),
            LaunchMode::Live => self.launch_live(state, store, &decision, &input, now).await?,
        };

        if matches!(
            outcome,
            CycleOutcome::Simulated { .. } | CycleOutcome::Launched { .. }
        ) {
            state.launch_control.last_launch_at = Some(now);
        }

        store.save(state).context("Failed to checkpoint cycle")?;
        Ok(CycleReport::new(state, Some(decision), outcome, sweep, now))
    }

    /// Keep the last known price when the oracle fails or returns garbage.
    async fn refresh_price(&self, state: &mut AgentState) {
        match self.collab.oracle.price(&self.config.seer_token).await {
            Ok(price) if price.is_finite() && price > 0.0 => state.economy.set_price(price),
            Ok(price) => warn!(price, "Oracle returned an unusable price, keeping last"),
            Err(e) => warn!(
                error = %e,
                last = state.economy.seer_price(),
                "Price oracle failed, keeping last price"
            ),
        }
    }

    /// Feed realized results of closed live positions back to the bandit.
    fn credit_closed(&self, state: &mut AgentState, sweep: &SweepReport, now: DateTime<Utc>) {
        for closed in &sweep.closed {
            let Some(origin) = closed.origin else {
                continue;
            };
            let update = self.policy.learn(
                &mut state.learning.bandit,
                origin.bucket,
                origin.mode,
                closed.realized_mon,
                closed.entry_cost_mon,
                origin.edge,
            );
            record_learning(state, update, now);
        }
    }

    fn finish_gated(
        &self,
        state: &mut AgentState,
        store: &dyn StateStore,
        decision: PolicyDecision,
        rejection: GateRejection,
        sweep: SweepReport,
        now: DateTime<Utc>,
    ) -> Result<CycleReport> {
        info!(
            gate = rejection.gate(),
            reason = %rejection,
            mode = %decision.mode,
            bucket = %decision.bucket,
            "Launch gated"
        );
        state.record(
            now,
            AgentEvent::Gated {
                gate: rejection.gate().to_string(),
                reason: rejection.to_string(),
                mode: decision.mode,
                bucket: decision.bucket,
                edge: decision.edge,
            },
        );

        if rejection.charges_bandit() {
            let update = state
                .learning
                .bandit
                .update(decision.bucket, decision.mode, 0.0);
            record_learning(state, update, now);
        }

        store.save(state).context("Failed to checkpoint gated cycle")?;
        Ok(CycleReport::new(
            state,
            Some(decision),
            CycleOutcome::Gated(rejection),
            sweep,
            now,
        ))
    }

    fn launch_simulated(
        &mut self,
        state: &mut AgentState,
        decision: &PolicyDecision,
        now: DateTime<Utc>,
    ) -> CycleOutcome {
        let spend = state.economy.spend_for_launch();
        state.record(
            now,
            AgentEvent::LaunchSpend {
                spent_mon: spend.spent_mon,
                mon_after: spend.mon_after,
            },
        );

        let sim = self
            .simulator
            .simulate(spend.spent_mon, decision.mode, decision.edge);
        info!(
            mode = %decision.mode,
            outcome = %sim.outcome,
            multiplier = format!("{:.4}", sim.multiplier),
            payout = format!("{:.4}", sim.payout_mon),
            "Simulated launch"
        );
        state.record(
            now,
            AgentEvent::SimulatedOutcome {
                outcome: sim.outcome.to_string(),
                multiplier: sim.multiplier,
                payout_mon: sim.payout_mon,
            },
        );

        let fw = state.economy.apply_flywheel(
            sim.payout_mon,
            spend.spent_mon,
            decision.buyback_pct,
            decision.burn_pct,
        );
        state.record(
            now,
            AgentEvent::Flywheel {
                payout_mon: fw.payout_mon,
                stake_mon: fw.stake_mon,
                profit: fw.profit,
                treasury_take: fw.treasury_take,
                buyback_budget: fw.buyback_budget,
                bought_seer: fw.bought_seer,
            },
        );

        let update = self.policy.learn(
            &mut state.learning.bandit,
            decision.bucket,
            decision.mode,
            sim.payout_mon,
            spend.spent_mon,
            decision.edge,
        );
        let reward = update.reward;
        record_learning(state, update, now);

        CycleOutcome::Simulated {
            outcome: sim.outcome,
            payout_mon: sim.payout_mon,
            reward,
        }
    }

    /// Hold the launch lock (persisted first) around the venue call.
    async fn launch_live(
        &self,
        state: &mut AgentState,
        store: &dyn StateStore,
        decision: &PolicyDecision,
        input: &CognitionInput,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome> {
        state.launch_control.launch_in_progress = true;
        if let Err(e) = store.save(state) {
            state.launch_control.launch_in_progress = false;
            return Err(e.context("Failed to persist launch lock"));
        }

        let spend = state.economy.spend_for_launch();
        state.record(
            now,
            AgentEvent::LaunchSpend {
                spent_mon: spend.spent_mon,
                mon_after: spend.mon_after,
            },
        );

        let request = self.launch_request(state.cycle_count, input, spend.spent_mon);
        info!(
            symbol = %request.symbol,
            stake = spend.spent_mon,
            mode = %decision.mode,
            "Launching token"
        );

        let outcome = match self.collab.venue.launch(&request).await {
            Ok(receipt) => {
                let origin = PolicyOrigin {
                    bucket: decision.bucket,
                    mode: decision.mode,
                    edge: decision.edge,
                };
                let position = Position::open(
                    receipt.token.clone(),
                    request.symbol.clone(),
                    receipt.token_amount,
                    spend.spent_mon,
                    now,
                )
                .with_origin(origin);
                let position_id = position.id;

                info!(
                    symbol = %request.symbol,
                    token = %receipt.token,
                    tx = %receipt.tx_hash,
                    tokens = receipt.token_amount,
                    "Launch confirmed, position opened"
                );
                state.portfolio.active_positions.push(position);
                state.record(
                    now,
                    AgentEvent::LaunchSucceeded {
                        position_id,
                        symbol: request.symbol.clone(),
                        token: receipt.token,
                        tx_hash: receipt.tx_hash,
                    },
                );
                CycleOutcome::Launched {
                    position_id,
                    symbol: request.symbol,
                }
            }
            Err(e) => {
                // Only a rejected or rate-limited launch provably kept the stake.
                let refunded = matches!(e, ExecutionError::Rejected(_) | ExecutionError::RateLimited);
                if refunded {
                    state.economy.refund_launch(spend.spent_mon);
                }
                warn!(error = %e, refunded, "Launch failed");
                state.record(now, AgentEvent::LaunchFailed { reason: e.to_string() });
                CycleOutcome::LaunchFailed {
                    reason: e.to_string(),
                    refunded,
                }
            }
        };

        state.launch_control.launch_in_progress = false;
        Ok(outcome)
    }

    fn launch_request(&self, cycle: u64, input: &CognitionInput, stake_mon: f64) -> LaunchRequest {
        match &input.token {
            Some(idea) => LaunchRequest {
                name: idea.name.clone(),
                symbol: idea.symbol.clone(),
                description: idea.description.clone(),
                stake_mon,
            },
            None => LaunchRequest {
                name: format!("{} #{cycle}", self.config.agent_name),
                symbol: format!("SEER{cycle}"),
                description: String::new(),
                stake_mon,
            },
        }
    }
}

fn record_learning(state: &mut AgentState, update: LearningUpdate, now: DateTime<Utc>) {
    state.record(
        now,
        AgentEvent::LearningUpdate {
            bucket: update.bucket,
            mode: update.mode,
            pulls: update.pulls,
            mean_reward: update.mean_reward,
            reward: update.reward,
        },
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
