//! Position lifecycle manager.
//!
//! Once per cycle every open position is valued and pushed through the exit
//! rules, in order: profit ladder, dead-position decay, moon-bag activation,
//! moon-bag trailing stop, closure. All sells share one execution contract:
//! mark `tx_pending` and checkpoint, submit, await the receipt, then either
//! commit (token amount, sold share, trigger bookkeeping, flywheel) or roll
//! the position back to its pre-attempt snapshot. Nothing economic happens
//! for a sell that is not confirmed.
//!
//! A checkpoint that cannot be written halts the sweep with
//! `LifecycleError::Checkpoint`. The in-memory document stays authoritative
//! (a submitted sell keeps its tx hash) so the next sweep reconciles it
//! instead of selling again.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::economy::round_money;
use crate::platforms::{ExecutionError, Receipt, TradeExecutor, TxHandle};
use crate::storage::StateStore;
use crate::types::{
    AgentEvent, AgentState, LadderRung, MoonBag, PendingSell, PolicyOrigin, Position,
    PositionStatus, SellTrigger,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Share of the remaining tokens sold at each ladder rung.
    pub ladder_sell_frac: f64,
    pub dead_after_days: i64,
    pub dead_sell_frac: f64,
    pub moonbag_min_sold_pct: f64,
    pub moonbag_min_multiple: f64,
    /// Trailing stop fires below `ath · trailing_factor`.
    pub trailing_factor: f64,
    /// Repeat trailing sells need the multiple this far below the last one.
    pub trailing_step: f64,
    pub trailing_sell_frac: f64,
    pub close_sold_pct: f64,
    pub loss_streak_limit: u32,
    pub guard_block_hours: i64,
    /// Buyback share applied to profit from position sells.
    pub sell_buyback_pct: f64,
    pub sell_burn_pct: f64,
    /// A pending sell with no transaction hash is released after this long.
    pub pending_timeout_secs: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            ladder_sell_frac: 0.20,
            dead_after_days: 4,
            dead_sell_frac: 0.15,
            moonbag_min_sold_pct: 60.0,
            moonbag_min_multiple: 7.0,
            trailing_factor: 0.7,
            trailing_step: 0.95,
            trailing_sell_frac: 0.20,
            close_sold_pct: 99.0,
            loss_streak_limit: 3,
            guard_block_hours: 48,
            sell_buyback_pct: 0.5,
            sell_burn_pct: 0.0,
            pending_timeout_secs: 3600,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Receipt reported failure for {0}")]
    ReceiptFailed(String),

    #[error("Checkpoint failed: {0}")]
    Checkpoint(String),

    #[error("Position {0} is closed")]
    PositionClosed(Uuid),
}

/// Result of one sell attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SellOutcome {
    Confirmed { amount: f64, payout_mon: f64 },
    Skipped(&'static str),
    Failed(LifecycleError),
}

/// A position that closed during the sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub id: Uuid,
    pub symbol: String,
    /// ROI from the closing valuation.
    pub roi: f64,
    pub entry_cost_mon: f64,
    pub realized_mon: f64,
    pub origin: Option<PolicyOrigin>,
}

#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub evaluated: usize,
    pub sells_confirmed: usize,
    pub sells_failed: usize,
    pub stuck: usize,
    pub reconciled: usize,
    pub closed: Vec<ClosedPosition>,
}

/// Multiple on the original position size: the remainder's value is scaled
/// up by the unsold share before dividing by entry cost. Rounded to 4 dp.
pub fn current_multiple(value_mon: f64, sold_pct_total: f64, entry_cost_mon: f64) -> f64 {
    let denominator = 1.0 - sold_pct_total / 100.0;
    if denominator <= 0.0 || entry_cost_mon <= 0.0 {
        return 0.0;
    }
    round4((value_mon / denominator) / entry_cost_mon)
}

fn round4(x: f64) -> f64 {
    (x * 1e4).round() / 1e4
}

fn checkpoint(store: &dyn StateStore, state: &AgentState) -> Result<(), LifecycleError> {
    store.save(state).map_err(|e| {
        warn!(error = %e, "Checkpoint failed");
        LifecycleError::Checkpoint(e.to_string())
    })
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct PositionManager {
    config: LifecycleConfig,
}

impl Default for PositionManager {
    fn default() -> Self {
        Self::new(LifecycleConfig::default())
    }
}

impl PositionManager {
    pub fn new(config: LifecycleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Value every open position and apply the exit rules, sequentially.
    pub async fn sweep(
        &self,
        executor: &dyn TradeExecutor,
        state: &mut AgentState,
        store: &dyn StateStore,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, LifecycleError> {
        let mut report = SweepReport::default();

        self.sweep_closed_leftovers(state);

        let ids: Vec<Uuid> = state
            .portfolio
            .active_positions
            .iter()
            .filter(|p| p.status.is_open())
            .map(|p| p.id)
            .collect();

        if ids.is_empty() {
            return Ok(report);
        }
        info!(positions = ids.len(), "Sweeping open positions");

        for id in ids {
            self.manage(executor, state, store, id, now, &mut report).await?;
        }

        info!(
            evaluated = report.evaluated,
            confirmed = report.sells_confirmed,
            failed = report.sells_failed,
            stuck = report.stuck,
            closed = report.closed.len(),
            "Sweep complete"
        );
        Ok(report)
    }

    /// Move CLOSED entries still sitting in the open list, without
    /// duplicating any already in the closed list.
    fn sweep_closed_leftovers(&self, state: &mut AgentState) {
        let portfolio = &mut state.portfolio;
        let (closed, open): (Vec<Position>, Vec<Position>) = portfolio
            .active_positions
            .drain(..)
            .partition(|p| p.status == PositionStatus::Closed);
        portfolio.active_positions = open;
        for pos in closed {
            if !portfolio.is_closed(pos.id) {
                portfolio.closed_positions.push(pos);
            }
        }
    }

    async fn manage(
        &self,
        executor: &dyn TradeExecutor,
        state: &mut AgentState,
        store: &dyn StateStore,
        id: Uuid,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<(), LifecycleError> {
        // -- In-flight sell from a previous run --
        if state.portfolio.find(id).is_some_and(|p| p.tx_pending)
            && !self.reconcile(executor, state, store, id, now, report).await?
        {
            return Ok(());
        }

        // -- Valuation --
        let (token, symbol, token_amount, sold_pct, entry_cost) = match state.portfolio.find(id) {
            Some(p) => (
                p.token.clone(),
                p.symbol.clone(),
                p.token_amount,
                p.sold_pct_total,
                p.entry_cost_mon,
            ),
            None => return Ok(()),
        };

        let value_mon = if token_amount > 0.0 {
            match executor.quote(&token, token_amount, false).await {
                Ok(q) => q.amount.max(0.0),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Valuation failed, skipping position");
                    state.record(
                        now,
                        AgentEvent::ValuationFailed {
                            position_id: id,
                            symbol,
                            reason: e.to_string(),
                        },
                    );
                    return Ok(());
                }
            }
        } else {
            0.0
        };

        let multiple = current_multiple(value_mon, sold_pct, entry_cost);
        let roi = multiple - 1.0;
        report.evaluated += 1;

        let status = match state.portfolio.find_mut(id) {
            Some(p) => {
                p.last_multiple = Some(multiple);
                p.status
            }
            None => return Ok(()),
        };

        info!(
            symbol = %symbol,
            %status,
            multiple = format!("{:.2}x", multiple),
            roi = format!("{:.1}%", roi * 100.0),
            "Position valued"
        );

        match status {
            PositionStatus::Early | PositionStatus::Active | PositionStatus::Exiting => {
                self.apply_ladder(executor, state, store, id, roi, value_mon, now, report)
                    .await?;
                self.apply_dead_rule(executor, state, store, id, value_mon, now, report)
                    .await?;
                self.check_moonbag_activation(state, id, multiple, now);
            }
            PositionStatus::MoonBag => {
                self.apply_trailing_stop(executor, state, store, id, multiple, value_mon, now, report)
                    .await?;
            }
            PositionStatus::Closed => {}
        }

        // -- Closure --
        let ready = state
            .portfolio
            .find(id)
            .is_some_and(|p| p.sold_pct_total >= self.config.close_sold_pct && !p.tx_pending);
        if ready {
            if let Some(closed) = self.close(state, id, roi, now) {
                report.closed.push(closed);
            }
        }

        checkpoint(store, state)
    }

    // -- Rules ---------------------------------------------------------------

    /// Fire at most one ladder rung: the lowest crossed and not yet hit.
    #[allow(clippy::too_many_arguments)]
    async fn apply_ladder(
        &self,
        executor: &dyn TradeExecutor,
        state: &mut AgentState,
        store: &dyn StateStore,
        id: Uuid,
        roi: f64,
        value_mon: f64,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<(), LifecycleError> {
        let rung = match state.portfolio.find(id) {
            Some(p) => LadderRung::ALL
                .iter()
                .copied()
                .find(|r| roi >= r.roi_threshold() && !p.ladder_hits.contains(r)),
            None => None,
        };

        if let Some(rung) = rung {
            info!(position = %id, %rung, "Ladder rung crossed");
            let trigger = SellTrigger::Ladder { rung };
            let outcome = self
                .execute_sell(executor, state, store, id, trigger, self.config.ladder_sell_frac, value_mon, now)
                .await?;
            tally(report, &outcome);
        }
        Ok(())
    }

    async fn apply_dead_rule(
        &self,
        executor: &dyn TradeExecutor,
        state: &mut AgentState,
        store: &dyn StateStore,
        id: Uuid,
        value_mon: f64,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<(), LifecycleError> {
        let dead_after = Duration::days(self.config.dead_after_days);
        let is_dead = state
            .portfolio
            .find(id)
            .is_some_and(|p| p.age(now) >= dead_after && p.ladder_hits.is_empty());
        if !is_dead {
            return Ok(());
        }

        if let Some(pos) = state.portfolio.find_mut(id) {
            if pos.status != PositionStatus::Exiting {
                if let Err(e) = pos.transition(PositionStatus::Exiting) {
                    warn!(symbol = %pos.symbol, error = %e, "Cannot start dead exit");
                    return Ok(());
                }
                info!(symbol = %pos.symbol, "Dead position, exiting");
            }
        }

        let outcome = self
            .execute_sell(executor, state, store, id, SellTrigger::DeadExit, self.config.dead_sell_frac, value_mon, now)
            .await?;
        tally(report, &outcome);
        Ok(())
    }

    fn check_moonbag_activation(&self, state: &mut AgentState, id: Uuid, multiple: f64, now: DateTime<Utc>) {
        let Some(pos) = state.portfolio.find_mut(id) else {
            return;
        };
        if pos.status != PositionStatus::Active
            || !pos.ladder_complete()
            || pos.sold_pct_total < self.config.moonbag_min_sold_pct
            || multiple < self.config.moonbag_min_multiple
        {
            return;
        }
        if pos.transition(PositionStatus::MoonBag).is_err() {
            return;
        }

        pos.moonbag = Some(MoonBag {
            ath_multiple: multiple,
            last_trailing_sell_multiple: None,
            activated_at: now,
        });
        let symbol = pos.symbol.clone();
        info!(symbol = %symbol, multiple, "Moon bag activated");
        state.record(
            now,
            AgentEvent::MoonBagActivated {
                position_id: id,
                symbol,
                multiple,
            },
        );
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_trailing_stop(
        &self,
        executor: &dyn TradeExecutor,
        state: &mut AgentState,
        store: &dyn StateStore,
        id: Uuid,
        multiple: f64,
        value_mon: f64,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<(), LifecycleError> {
        let fire = {
            let Some(pos) = state.portfolio.find_mut(id) else {
                return Ok(());
            };
            let mb = pos.moonbag.get_or_insert_with(|| MoonBag {
                ath_multiple: multiple,
                last_trailing_sell_multiple: None,
                activated_at: now,
            });
            if multiple > mb.ath_multiple {
                mb.ath_multiple = multiple;
            }

            let threshold = round4(mb.ath_multiple * self.config.trailing_factor);
            let below = multiple < threshold;
            let further = match mb.last_trailing_sell_multiple {
                None => true,
                Some(last) => multiple < round4(last * self.config.trailing_step),
            };
            debug!(symbol = %pos.symbol, ath = mb.ath_multiple, threshold, multiple, "Trailing check");
            below && further
        };

        if fire {
            let trigger = SellTrigger::TrailingStop { multiple };
            let outcome = self
                .execute_sell(executor, state, store, id, trigger, self.config.trailing_sell_frac, value_mon, now)
                .await?;
            tally(report, &outcome);
        }
        Ok(())
    }

    // -- Sell contract -------------------------------------------------------

    /// Sell `frac` of the remaining tokens.
    ///
    /// `valuation_mon` is this sweep's value of the full remainder, used as
    /// the payout estimate when the receipt carries no amount.
    ///
    /// `Err` only when a checkpoint fails; every other failure is reported
    /// as `SellOutcome::Failed` after rolling back. When the checkpoint that
    /// follows submission fails, the position keeps `tx_pending` and the tx
    /// hash in memory and the receipt is not awaited.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_sell(
        &self,
        executor: &dyn TradeExecutor,
        state: &mut AgentState,
        store: &dyn StateStore,
        id: Uuid,
        trigger: SellTrigger,
        frac: f64,
        valuation_mon: f64,
        now: DateTime<Utc>,
    ) -> Result<SellOutcome, LifecycleError> {
        // -- Guard and mark pending --
        let (snapshot, token, symbol, amount) = {
            let Some(pos) = state.portfolio.find_mut(id) else {
                return Ok(SellOutcome::Skipped("position not found"));
            };
            if pos.status == PositionStatus::Closed {
                return Ok(SellOutcome::Failed(LifecycleError::PositionClosed(id)));
            }
            if pos.tx_pending {
                debug!(symbol = %pos.symbol, "Sell skipped: transaction already pending");
                return Ok(SellOutcome::Skipped("tx pending"));
            }

            let amount = (pos.token_amount * frac.clamp(0.0, 1.0)).floor().min(pos.token_amount);
            if amount <= 0.0 {
                return Ok(SellOutcome::Skipped("nothing to sell"));
            }

            let snapshot = pos.clone();
            pos.tx_pending = true;
            pos.pending_sell = Some(PendingSell {
                trigger: trigger.clone(),
                amount,
                token_amount_before: pos.token_amount,
                valuation_mon,
                tx_hash: None,
                started_at: now,
            });
            (snapshot, pos.token.clone(), pos.symbol.clone(), amount)
        };

        if let Err(e) = checkpoint(store, state) {
            // nothing was submitted
            self.rollback(state, snapshot, &trigger, &e, now);
            return Err(e);
        }

        info!(symbol = %symbol, %trigger, amount, "Executing sell");

        // -- Submit --
        let tx = match executor.sell(&token, amount).await {
            Ok(tx) => tx,
            Err(e) => {
                let err = LifecycleError::from(e);
                self.rollback(state, snapshot, &trigger, &err, now);
                checkpoint(store, state)?;
                return Ok(SellOutcome::Failed(err));
            }
        };

        if let Some(pending) = state
            .portfolio
            .find_mut(id)
            .and_then(|p| p.pending_sell.as_mut())
        {
            pending.tx_hash = Some(tx.to_string());
        }
        state.record(
            now,
            AgentEvent::SellSent {
                position_id: id,
                symbol: symbol.clone(),
                trigger: trigger.to_string(),
                tx_hash: tx.to_string(),
            },
        );
        if let Err(e) = checkpoint(store, state) {
            warn!(symbol = %symbol, tx = %tx, "Sell submitted but not persisted, halting sweep");
            return Err(e);
        }

        // -- Confirm --
        let receipt = match executor.await_receipt(&tx).await {
            Ok(r) if r.is_success() => r,
            Ok(_) => {
                let err = LifecycleError::ReceiptFailed(tx.to_string());
                self.rollback(state, snapshot, &trigger, &err, now);
                checkpoint(store, state)?;
                return Ok(SellOutcome::Failed(err));
            }
            Err(e) => {
                let err = LifecycleError::from(e);
                self.rollback(state, snapshot, &trigger, &err, now);
                checkpoint(store, state)?;
                return Ok(SellOutcome::Failed(err));
            }
        };

        let outcome = self.commit(state, id, &receipt, now);
        checkpoint(store, state)?;
        Ok(outcome)
    }

    /// Restore the pre-attempt snapshot (which has `tx_pending` clear) and
    /// record the failure.
    fn rollback(
        &self,
        state: &mut AgentState,
        snapshot: Position,
        trigger: &SellTrigger,
        err: &LifecycleError,
        now: DateTime<Utc>,
    ) {
        let id = snapshot.id;
        let symbol = snapshot.symbol.clone();
        if let Some(pos) = state.portfolio.find_mut(id) {
            *pos = snapshot;
            pos.tx_pending = false;
            pos.pending_sell = None;
        }
        warn!(symbol = %symbol, %trigger, error = %err, "Sell failed, position rolled back");
        state.record(
            now,
            AgentEvent::SellFailed {
                position_id: id,
                symbol,
                trigger: trigger.to_string(),
                reason: err.to_string(),
            },
        );
    }

    /// Apply a confirmed sell recorded in the position's `pending_sell`.
    fn commit(&self, state: &mut AgentState, id: Uuid, receipt: &Receipt, now: DateTime<Utc>) -> SellOutcome {
        let Some(pos) = state.portfolio.find_mut(id) else {
            return SellOutcome::Skipped("position not found");
        };
        let Some(pending) = pos.pending_sell.take() else {
            pos.tx_pending = false;
            return SellOutcome::Skipped("no pending sell");
        };

        let before = pending.token_amount_before;
        let share = if before > 0.0 {
            (pending.amount / before).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let payout_mon = round_money(
            receipt
                .amount_out_mon
                .unwrap_or(pending.valuation_mon * share)
                .max(0.0),
        );

        let added_pct = (100.0 - pos.sold_pct_total) * share;
        pos.token_amount = (before - pending.amount).max(0.0);
        pos.sold_pct_total = (pos.sold_pct_total + added_pct).min(100.0);
        pos.realized_mon = round_money(pos.realized_mon + payout_mon);
        pos.tx_pending = false;

        let symbol = pos.symbol.clone();
        let sold_pct_total = pos.sold_pct_total;
        let stake_mon = pos.entry_cost_mon * added_pct / 100.0;

        let mut trigger_event = None;
        match &pending.trigger {
            SellTrigger::Ladder { rung } => {
                pos.ladder_hits.insert(*rung);
                if pos.status == PositionStatus::Early {
                    let _ = pos.transition(PositionStatus::Active);
                }
                trigger_event = Some(AgentEvent::LadderHit {
                    position_id: id,
                    symbol: symbol.clone(),
                    rung: *rung,
                });
            }
            SellTrigger::TrailingStop { multiple } => {
                if let Some(mb) = pos.moonbag.as_mut() {
                    mb.last_trailing_sell_multiple = Some(*multiple);
                }
            }
            SellTrigger::DeadExit => {
                trigger_event = Some(AgentEvent::DeadExitStep {
                    position_id: id,
                    symbol: symbol.clone(),
                });
            }
        }

        info!(
            symbol = %symbol,
            trigger = %pending.trigger,
            amount = pending.amount,
            payout = format!("{:.4}", payout_mon),
            sold_pct = format!("{:.1}", sold_pct_total),
            "Sell confirmed"
        );

        state.record(
            now,
            AgentEvent::SellConfirmed {
                position_id: id,
                symbol,
                trigger: pending.trigger.to_string(),
                amount: pending.amount,
                payout_mon,
                sold_pct_total,
            },
        );
        if let Some(ev) = trigger_event {
            state.record(now, ev);
        }

        let fw = state.economy.apply_flywheel(
            payout_mon,
            stake_mon,
            self.config.sell_buyback_pct,
            self.config.sell_burn_pct,
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

        SellOutcome::Confirmed {
            amount: pending.amount,
            payout_mon,
        }
    }

    // -- Crash recovery ------------------------------------------------------

    /// Resolve a sell left in flight by an earlier run. Returns `true` when
    /// the position is free to be evaluated this sweep.
    async fn reconcile(
        &self,
        executor: &dyn TradeExecutor,
        state: &mut AgentState,
        store: &dyn StateStore,
        id: Uuid,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<bool, LifecycleError> {
        let Some(pos) = state.portfolio.find_mut(id) else {
            return Ok(false);
        };
        let symbol = pos.symbol.clone();

        let Some(pending) = pos.pending_sell.clone() else {
            warn!(symbol = %symbol, "tx_pending set without a pending sell record, releasing");
            pos.tx_pending = false;
            state.record(
                now,
                AgentEvent::SellReconciled {
                    position_id: id,
                    symbol,
                    confirmed: false,
                },
            );
            checkpoint(store, state)?;
            report.reconciled += 1;
            return Ok(true);
        };

        let Some(hash) = pending.tx_hash.clone() else {
            let timeout = Duration::seconds(self.config.pending_timeout_secs);
            if now - pending.started_at < timeout {
                warn!(symbol = %symbol, since = %pending.started_at, "Sell stuck without a transaction hash");
                state.record(
                    now,
                    AgentEvent::SellStuck {
                        position_id: id,
                        symbol,
                        since: pending.started_at,
                    },
                );
                report.stuck += 1;
                return Ok(false);
            }
            warn!(symbol = %symbol, "Releasing stale pending sell that was never submitted");
            pos.tx_pending = false;
            pos.pending_sell = None;
            state.record(
                now,
                AgentEvent::SellReconciled {
                    position_id: id,
                    symbol,
                    confirmed: false,
                },
            );
            checkpoint(store, state)?;
            report.reconciled += 1;
            return Ok(true);
        };

        let tx = TxHandle(hash);
        match executor.await_receipt(&tx).await {
            Ok(receipt) if receipt.is_success() => {
                info!(symbol = %symbol, tx = %tx, "Pending sell confirmed on reconciliation");
                let outcome = self.commit(state, id, &receipt, now);
                state.record(
                    now,
                    AgentEvent::SellReconciled {
                        position_id: id,
                        symbol,
                        confirmed: true,
                    },
                );
                tally(report, &outcome);
            }
            Ok(_) => {
                warn!(symbol = %symbol, tx = %tx, "Pending sell failed on chain, releasing");
                if let Some(pos) = state.portfolio.find_mut(id) {
                    pos.tx_pending = false;
                    pos.pending_sell = None;
                }
                state.record(
                    now,
                    AgentEvent::SellReconciled {
                        position_id: id,
                        symbol,
                        confirmed: false,
                    },
                );
            }
            Err(e) => {
                warn!(symbol = %symbol, tx = %tx, error = %e, "Receipt still unavailable, position stays pending");
                state.record(
                    now,
                    AgentEvent::SellStuck {
                        position_id: id,
                        symbol,
                        since: pending.started_at,
                    },
                );
                report.stuck += 1;
                return Ok(false);
            }
        }

        checkpoint(store, state)?;
        report.reconciled += 1;
        Ok(true)
    }

    // -- Closure -------------------------------------------------------------

    /// Move a fully exited position to the closed list and update the risk
    /// guard. Idempotent: a position already closed is never closed again.
    pub fn close(
        &self,
        state: &mut AgentState,
        id: Uuid,
        roi: f64,
        now: DateTime<Utc>,
    ) -> Option<ClosedPosition> {
        let idx = state.portfolio.active_positions.iter().position(|p| p.id == id)?;
        if state.portfolio.is_closed(id) {
            state.portfolio.active_positions.remove(idx);
            return None;
        }

        let mut pos = state.portfolio.active_positions.remove(idx);
        if let Err(e) = pos.transition(PositionStatus::Closed) {
            warn!(symbol = %pos.symbol, error = %e, "Unexpected state on close");
            pos.status = PositionStatus::Closed;
        }
        pos.closed_at = Some(now);

        let closed = ClosedPosition {
            id,
            symbol: pos.symbol.clone(),
            roi: round4(roi),
            entry_cost_mon: pos.entry_cost_mon,
            realized_mon: pos.realized_mon,
            origin: pos.origin,
        };

        let until = state.core_guard.record_close(
            roi,
            now,
            self.config.loss_streak_limit,
            Duration::hours(self.config.guard_block_hours),
        );

        info!(
            symbol = %closed.symbol,
            roi = format!("{:.4}", closed.roi),
            realized = format!("{:.4}", closed.realized_mon),
            loss_streak = state.core_guard.loss_streak,
            "Position closed"
        );

        state.portfolio.closed_positions.push(pos);
        state.record(
            now,
            AgentEvent::PositionClosed {
                position_id: id,
                symbol: closed.symbol.clone(),
                roi: closed.roi,
            },
        );

        if let Some(until) = until {
            warn!(loss_streak = state.core_guard.loss_streak, %until, "Loss streak limit hit, launches blocked");
            state.record(
                now,
                AgentEvent::CoreGuardBlocked {
                    loss_streak: state.core_guard.loss_streak,
                    until,
                },
            );
        }

        Some(closed)
    }
}

fn tally(report: &mut SweepReport, outcome: &SellOutcome) {
    match outcome {
        SellOutcome::Confirmed { .. } => report.sells_confirmed += 1,
        SellOutcome::Failed(_) => report.sells_failed += 1,
        SellOutcome::Skipped(_) => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
