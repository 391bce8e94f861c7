//! MEMESEER: Autonomous meme-token launch agent.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores state from disk (or creates fresh), and runs the main
//! sweep→decide→launch loop with graceful shutdown.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use memeseer::config;
use memeseer::engine::cycle::{Collaborators, CycleOutcome, CycleReport, CycleRunner};
use memeseer::engine::executor::RetryingExecutor;
use memeseer::engine::lifecycle::PositionManager;
use memeseer::engine::simulator::OutcomeSimulator;
use memeseer::platforms::feed::FileSignalSource;
use memeseer::platforms::http::HttpVenueClient;
use memeseer::platforms::SignalSource;
use memeseer::storage::{JsonFileStore, StateStore};
use memeseer::strategy::risk::LaunchGate;
use memeseer::strategy::PolicyEngine;
use memeseer::types::AgentState;

const BANNER: &str = r#"
 __  __                      ____
|  \/  | ___ _ __ ___   ___ / ___|  ___  ___ _ __
| |\/| |/ _ \ '_ ` _ \ / _ \\___ \ / _ \/ _ \ '__|
| |  | |  __/ | | | | |  __/ ___) |  __/  __/ |
|_|  |_|\___|_| |_| |_|\___||____/ \___|\___|_|

  Autonomous Launch Agent
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        cycle_interval_secs = cfg.agent.cycle_interval_secs,
        launch_mode = ?cfg.agent.launch_mode,
        dry_run = cfg.agent.dry_run,
        "MEMESEER starting up"
    );

    // -- Restore or create state -----------------------------------------

    let store = JsonFileStore::new(&cfg.agent.state_path);
    let mut state = match store.load()? {
        Some(s) => {
            info!(
                cycles = s.cycle_count,
                open = s.portfolio.active_positions.len(),
                closed = s.portfolio.closed_positions.len(),
                "Resumed from saved state"
            );
            s
        }
        None => {
            let s = AgentState::new(
                cfg.agent.name.clone(),
                cfg.agent.initial_seer,
                cfg.economy.clone(),
                cfg.agent.initial_seer_price,
                cfg.agent.max_events,
            );
            info!(seer = s.economy.balances.seer, "Fresh start");
            s
        }
    };
    // Parameters always follow the config file; balances follow the document.
    state.economy.params = cfg.economy.clone();
    state.events.max_events = cfg.agent.max_events.max(1);

    if state.launch_control.launch_in_progress {
        // Nothing else runs concurrently with this process.
        warn!("Launch lock left set by a previous run, releasing; check the venue for an orphaned launch");
        state.launch_control.launch_in_progress = false;
    }

    // -- Initialise components -------------------------------------------

    let signals: Arc<dyn SignalSource> = Arc::new(FileSignalSource::new(&cfg.agent.signal_path));

    let collab = if cfg.agent.dry_run {
        warn!("Dry-run mode: no transactions will be sent");
        Collaborators::dry_run(state.economy.seer_price(), signals)
    } else {
        let client = HttpVenueClient::new(&cfg.execution.base_url, cfg.execution.api_key())?;
        info!(base_url = %client.base_url(), "Using execution service");
        let venue = Arc::new(RetryingExecutor::new(client, cfg.execution.retry));
        Collaborators {
            executor: venue.clone(),
            venue: venue.clone(),
            oracle: venue,
            signals,
        }
    };

    let mut runner = CycleRunner::new(
        cfg.cycle_config(),
        PolicyEngine::new(cfg.policy.exploration_c),
        LaunchGate::new(cfg.risk.clone()),
        PositionManager::new(cfg.lifecycle.clone()),
        OutcomeSimulator::new(cfg.agent.seed),
        collab,
    );

    // -- Main loop -------------------------------------------------------

    let cycle_interval = Duration::from_secs(cfg.agent.cycle_interval_secs);
    let mut interval = tokio::time::interval(cycle_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.agent.cycle_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match runner.run_cycle(&mut state, &store, Utc::now()).await {
                    Ok(report) => log_cycle_report(&report),
                    Err(e) => error!(error = %e, "Cycle failed, continuing to next"),
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // Save final state
    store.save(&state)?;
    info!(
        cycles = state.cycle_count,
        seer = format!("{:.4}", state.economy.balances.seer),
        mon = format!("{:.4}", state.economy.balances.mon),
        treasury = format!("{:.4}", state.economy.treasury_mon),
        "MEMESEER shut down cleanly."
    );

    Ok(())
}

/// Log a human-readable cycle summary.
fn log_cycle_report(report: &CycleReport) {
    let outcome = match &report.outcome {
        CycleOutcome::Halted => "halted".to_string(),
        CycleOutcome::Gated(g) => format!("gated:{}", g.gate()),
        CycleOutcome::Simulated { outcome, .. } => format!("simulated:{outcome}"),
        CycleOutcome::Launched { symbol, .. } => format!("launched:{symbol}"),
        CycleOutcome::LaunchFailed { .. } => "launch_failed".to_string(),
    };
    info!(
        cycle = report.cycle,
        mode = ?report.decision.map(|d| d.mode),
        outcome = %outcome,
        sells = report.sweep.sells_confirmed,
        closed = report.sweep.closed.len(),
        seer = format!("{:.4}", report.balances.seer),
        mon = format!("{:.4}", report.balances.mon),
        treasury = format!("{:.4}", report.treasury_mon),
        "Cycle complete"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("memeseer=info"));

    let json_logging = std::env::var("MEMESEER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
