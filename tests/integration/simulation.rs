//! Multi-cycle simulation harness.
//!
//! Drives the full cycle orchestrator over simulated and live launches
//! against the scripted market, checking the economy and lifecycle
//! invariants that must hold across many cycles and across restarts.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use memeseer::engine::cycle::{Collaborators, CycleConfig, CycleOutcome, CycleRunner, LaunchMode};
use memeseer::engine::economy::EconomyParams;
use memeseer::engine::lifecycle::PositionManager;
use memeseer::engine::simulator::OutcomeSimulator;
use memeseer::platforms::CognitionInput;
use memeseer::storage::{JsonFileStore, MemoryStore, StateStore};
use memeseer::strategy::risk::{LaunchGate, RiskConfig};
use memeseer::strategy::PolicyEngine;
use memeseer::types::{
    AgentEvent, AgentState, Bucket, LadderRung, PendingSell, PositionStatus, SellTrigger,
};

use crate::mock_executor::{ScriptedMarket, ScriptedSignals};

fn fresh_state() -> AgentState {
    AgentState::new("MemeSeer", 1000.0, EconomyParams::default(), 1.0, 500)
}

fn runner(mode: LaunchMode, market: &ScriptedMarket, signals: &ScriptedSignals, seed: u64) -> CycleRunner {
    let m = Arc::new(market.clone());
    CycleRunner::new(
        CycleConfig {
            launch_mode: mode,
            ..CycleConfig::default()
        },
        PolicyEngine::default(),
        LaunchGate::new(RiskConfig::default()),
        PositionManager::default(),
        OutcomeSimulator::new(Some(seed)),
        Collaborators {
            executor: m.clone(),
            venue: m.clone(),
            oracle: m,
            signals: Arc::new(signals.clone()),
        },
    )
}

fn temp_path() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("memeseer_sim_{}.json", uuid::Uuid::new_v4()))
}

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

// ----- Simulated launches -----

#[tokio::test]
async fn test_simulated_run_preserves_economy_invariants() {
    let market = ScriptedMarket::new(0.001, 1.0);
    let signals = ScriptedSignals::default();
    let mut r = runner(LaunchMode::Simulated, &market, &signals, 11);
    let mut state = fresh_state();
    let store = MemoryStore::new();

    let mut last_treasury = 0.0;
    for k in 0..40 {
        let now = t0() + Duration::hours(25 * k);
        r.run_cycle(&mut state, &store, now).await.unwrap();

        let b = state.economy.balances;
        assert!(b.seer >= 0.0, "cycle {k}: negative SEER");
        assert!(b.mon >= 0.0, "cycle {k}: negative MON");
        assert!(state.economy.treasury_mon >= last_treasury, "cycle {k}: treasury shrank");
        last_treasury = state.economy.treasury_mon;
    }

    assert_eq!(state.cycle_count, 40);
    // every cycle either launched or was charged at a gate
    assert_eq!(state.learning.bandit.bucket_pulls(Bucket::Neutral), 40);
    assert_eq!(state.learning.bandit.bucket_pulls(Bucket::Good), 0);
    assert!(state.portfolio.active_positions.is_empty());
    assert_eq!(store.save_count(), 40);
}

#[tokio::test]
async fn test_simulated_run_is_reproducible_with_seed() {
    let market = ScriptedMarket::new(0.001, 1.0);
    let signals = ScriptedSignals::default();

    let mut balances = Vec::new();
    for _ in 0..2 {
        let mut r = runner(LaunchMode::Simulated, &market, &signals, 99);
        let mut state = fresh_state();
        let store = MemoryStore::new();
        for k in 0..15 {
            r.run_cycle(&mut state, &store, t0() + Duration::days(k)).await.unwrap();
        }
        balances.push((state.economy.balances, state.economy.treasury_mon));
    }
    assert_eq!(balances[0], balances[1]);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let market = ScriptedMarket::new(0.001, 1.0);
    let signals = ScriptedSignals::default();
    let store = JsonFileStore::new(temp_path());

    let mut state = fresh_state();
    let mut r = runner(LaunchMode::Simulated, &market, &signals, 5);
    for k in 0..5 {
        r.run_cycle(&mut state, &store, t0() + Duration::days(k)).await.unwrap();
    }

    let mut restored = store.load().unwrap().unwrap();
    assert_eq!(restored.cycle_count, 5);
    assert_eq!(restored.learning.bandit.bucket_pulls(Bucket::Neutral), 5);
    assert_eq!(restored.events.len(), state.events.len());

    let mut r2 = runner(LaunchMode::Simulated, &market, &signals, 6);
    r2.run_cycle(&mut restored, &store, t0() + Duration::days(5)).await.unwrap();
    assert_eq!(restored.cycle_count, 6);

    store.delete().unwrap();
}

// ----- Live launches and the lifecycle -----

#[tokio::test]
async fn test_live_position_climbs_the_ladder() {
    let market = ScriptedMarket::new(0.001, 1.0);
    let signals = ScriptedSignals::default();
    let mut r = runner(LaunchMode::Live, &market, &signals, 1);
    let mut state = fresh_state();
    let store = MemoryStore::new();

    let report = r.run_cycle(&mut state, &store, t0()).await.unwrap();
    assert!(matches!(report.outcome, CycleOutcome::Launched { .. }));
    assert_eq!(state.portfolio.active_positions[0].token_amount, 5000.0);

    // 2x: first rung sells 20% of the bag
    market.set_token_price(0.002);
    let report = r.run_cycle(&mut state, &store, t0() + Duration::hours(1)).await.unwrap();
    assert_eq!(report.sweep.sells_confirmed, 1);
    match report.outcome {
        CycleOutcome::Gated(ref g) => assert_eq!(g.gate(), "cooldown"),
        ref other => panic!("expected cooldown, got {other:?}"),
    }
    {
        let pos = &state.portfolio.active_positions[0];
        assert_eq!(pos.status, PositionStatus::Active);
        assert_eq!(pos.token_amount, 4000.0);
        assert_eq!(pos.sold_pct_total, 20.0);
        assert!((pos.realized_mon - 2.0).abs() < 1e-9);
    }
    // profit 1.0 on the sold fifth, 30% to treasury
    assert!((state.economy.treasury_mon - 0.3).abs() < 1e-9);

    // 4x: second rung
    market.set_token_price(0.004);
    r.run_cycle(&mut state, &store, t0() + Duration::hours(2)).await.unwrap();
    let pos = &state.portfolio.active_positions[0];
    assert!(pos.ladder_hits.contains(&LadderRung::Roi300));
    assert_eq!(pos.token_amount, 3200.0);
    assert!((pos.sold_pct_total - 36.0).abs() < 1e-9);
    assert_eq!(market.sells().len(), 2);
}

#[tokio::test]
async fn test_kill_switch_stops_selling() {
    let market = ScriptedMarket::new(0.001, 1.0);
    let signals = ScriptedSignals::default();
    let mut r = runner(LaunchMode::Live, &market, &signals, 1);
    let mut state = fresh_state();
    let store = MemoryStore::new();
    r.run_cycle(&mut state, &store, t0()).await.unwrap();

    state.system.kill_switch = true;
    market.set_token_price(0.02);
    let report = r.run_cycle(&mut state, &store, t0() + Duration::hours(1)).await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Halted);
    assert!(market.sells().is_empty());
    assert_eq!(state.portfolio.active_positions[0].token_amount, 5000.0);
}

#[tokio::test]
async fn test_failed_receipt_rolls_back_then_retries() {
    let market = ScriptedMarket::new(0.001, 1.0);
    let signals = ScriptedSignals::default();
    let mut r = runner(LaunchMode::Live, &market, &signals, 1);
    let mut state = fresh_state();
    let store = MemoryStore::new();
    r.run_cycle(&mut state, &store, t0()).await.unwrap();
    let mon_before = state.economy.balances.mon;

    market.set_token_price(0.002);
    market.set_fail_receipts(true);
    let report = r.run_cycle(&mut state, &store, t0() + Duration::hours(1)).await.unwrap();
    assert_eq!(report.sweep.sells_failed, 1);
    {
        let pos = &state.portfolio.active_positions[0];
        assert_eq!(pos.token_amount, 5000.0);
        assert!(pos.ladder_hits.is_empty());
        assert!(!pos.tx_pending);
    }
    assert_eq!(state.economy.balances.mon, mon_before);

    market.set_fail_receipts(false);
    let report = r.run_cycle(&mut state, &store, t0() + Duration::hours(2)).await.unwrap();
    assert_eq!(report.sweep.sells_confirmed, 1);
    assert_eq!(state.portfolio.active_positions[0].token_amount, 4000.0);
}

#[tokio::test]
async fn test_in_flight_sell_reconciled_after_restart() {
    let market = ScriptedMarket::new(0.001, 1.0);
    let signals = ScriptedSignals::default();
    let store = JsonFileStore::new(temp_path());

    let mut state = fresh_state();
    runner(LaunchMode::Live, &market, &signals, 1)
        .run_cycle(&mut state, &store, t0())
        .await
        .unwrap();

    // the process died after the sell was accepted but before the receipt
    {
        let pos = &mut state.portfolio.active_positions[0];
        pos.tx_pending = true;
        pos.pending_sell = Some(PendingSell {
            trigger: SellTrigger::Ladder { rung: LadderRung::Roi100 },
            amount: 1000.0,
            token_amount_before: 5000.0,
            valuation_mon: 10.0,
            tx_hash: Some("0xinflight".to_string()),
            started_at: t0(),
        });
    }
    store.save(&state).unwrap();
    market.register_receipt("0xinflight", 2.5);

    let mut restored = store.load().unwrap().unwrap();
    assert!(restored.portfolio.active_positions[0].tx_pending);

    let report = runner(LaunchMode::Live, &market, &signals, 1)
        .run_cycle(&mut restored, &store, t0() + Duration::hours(1))
        .await
        .unwrap();

    assert_eq!(report.sweep.reconciled, 1);
    let pos = &restored.portfolio.active_positions[0];
    assert!(!pos.tx_pending);
    assert_eq!(pos.token_amount, 4000.0);
    assert_eq!(pos.realized_mon, 2.5);
    assert!(pos.ladder_hits.contains(&LadderRung::Roi100));
    // no second sell was submitted for the same trigger
    assert!(market.sells().is_empty());
    assert!(restored
        .events
        .iter()
        .any(|e| matches!(e, AgentEvent::SellReconciled { confirmed: true, .. })));

    store.delete().unwrap();
}

#[tokio::test]
async fn test_dead_positions_trip_the_loss_guard() {
    let market = ScriptedMarket::new(0.001, 1.0);
    let signals = ScriptedSignals::default();
    let mut r = runner(LaunchMode::Live, &market, &signals, 3);
    let mut state = fresh_state();
    let store = MemoryStore::new();

    // three launches on consecutive days fill the portfolio
    for k in 0..3 {
        let report = r.run_cycle(&mut state, &store, t0() + Duration::days(k)).await.unwrap();
        assert!(matches!(report.outcome, CycleOutcome::Launched { .. }), "day {k}");
    }
    assert_eq!(state.portfolio.blocking_count(), 3);

    // every bag collapses to 0.2x and never recovers
    market.set_token_price(0.0002);
    let mut blocked_at = None;
    for k in 3..80 {
        let now = t0() + Duration::days(k);
        r.run_cycle(&mut state, &store, now).await.unwrap();
        if state.core_guard.launch_blocked_until.is_some() {
            blocked_at = Some(now);
            break;
        }
    }

    let now = blocked_at.expect("loss guard never tripped");
    assert!(state.core_guard.loss_streak >= 3);
    assert!(state.core_guard.is_blocked(now));
    assert!(state.portfolio.closed_positions.len() >= 3);
    assert!(state
        .portfolio
        .closed_positions
        .iter()
        .all(|p| p.status == PositionStatus::Closed && p.sold_pct_total >= 99.0));
    assert!(state
        .events
        .iter()
        .any(|e| matches!(e, AgentEvent::CoreGuardBlocked { .. })));
}

#[tokio::test]
async fn test_declined_cognition_never_launches() {
    let market = ScriptedMarket::new(0.001, 1.0);
    let signals = ScriptedSignals::default();
    signals.set(CognitionInput::declined("market is cold"));
    let mut r = runner(LaunchMode::Live, &market, &signals, 1);
    let mut state = fresh_state();
    let store = MemoryStore::new();

    for k in 0..5 {
        r.run_cycle(&mut state, &store, t0() + Duration::days(k)).await.unwrap();
    }
    assert_eq!(market.launch_count(), 0);
    assert!(state.portfolio.active_positions.is_empty());
    assert_eq!(state.learning.bandit.bucket_pulls(Bucket::Neutral), 5);
}
