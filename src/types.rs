//! Shared types for the MEMESEER agent.
//!
//! These types form the data model used across all modules: the closed
//! enums for buckets, modes and position states, the position record
//! itself, the process-wide risk guard, the bounded event log, and the
//! `AgentState` aggregate root that is persisted as one JSON document.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::engine::economy::{Balances, EconomyParams, EconomyState};
use crate::strategy::bandit::BanditTable;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Coarse discretisation of market edge, used as the bandit context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Bad,
    Neutral,
    Good,
}

impl Bucket {
    pub const ALL: &'static [Bucket] = &[Bucket::Bad, Bucket::Neutral, Bucket::Good];
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::Bad => write!(f, "bad"),
            Bucket::Neutral => write!(f, "neutral"),
            Bucket::Good => write!(f, "good"),
        }
    }
}

impl std::str::FromStr for Bucket {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bad" => Ok(Bucket::Bad),
            "neutral" => Ok(Bucket::Neutral),
            "good" => Ok(Bucket::Good),
            _ => Err(anyhow::anyhow!("Unknown bucket: {s}")),
        }
    }
}

/// Named risk profile chosen by the bandit. Declaration order is the
/// bandit's iteration order, so ties resolve to the earlier mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Conservative,
    Balanced,
    Growth,
    Signal,
    Aggressive,
    NoLaunch,
}

impl Mode {
    pub const ALL: &'static [Mode] = &[
        Mode::Conservative,
        Mode::Balanced,
        Mode::Growth,
        Mode::Signal,
        Mode::Aggressive,
        Mode::NoLaunch,
    ];

    /// Share of post-treasury profit spent on SEER buyback.
    pub fn buyback_pct(&self) -> f64 {
        match self {
            Mode::Conservative => 0.80,
            Mode::Balanced => 0.50,
            Mode::Growth => 0.65,
            Mode::Signal => 0.40,
            Mode::Aggressive => 0.30,
            Mode::NoLaunch => 0.00,
        }
    }

    /// Burn share. Carried through the flywheel but not yet applied.
    pub fn burn_pct(&self) -> f64 {
        match self {
            Mode::Conservative | Mode::Balanced | Mode::NoLaunch => 0.00,
            Mode::Growth => 0.01,
            Mode::Signal => 0.02,
            Mode::Aggressive => 0.03,
        }
    }

    pub fn is_launch(&self) -> bool {
        *self != Mode::NoLaunch
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Conservative => "conservative",
            Mode::Balanced => "balanced",
            Mode::Growth => "growth",
            Mode::Signal => "signal",
            Mode::Aggressive => "aggressive",
            Mode::NoLaunch => "no_launch",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "conservative" => Ok(Mode::Conservative),
            "balanced" => Ok(Mode::Balanced),
            "growth" => Ok(Mode::Growth),
            "signal" => Ok(Mode::Signal),
            "aggressive" => Ok(Mode::Aggressive),
            "no_launch" | "nolaunch" => Ok(Mode::NoLaunch),
            _ => Err(anyhow::anyhow!("Unknown mode: {s}")),
        }
    }
}

/// Lifecycle state of a launched position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Early,
    Active,
    Exiting,
    MoonBag,
    Closed,
}

impl PositionStatus {
    /// Still managed by the sweep.
    pub fn is_open(&self) -> bool {
        *self != PositionStatus::Closed
    }

    /// Counts toward the open-position cap. Moon bags ride free.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            PositionStatus::Early | PositionStatus::Active | PositionStatus::Exiting
        )
    }

    /// Explicit transition table. Staying in the same state is always allowed
    /// for open states.
    pub fn can_transition_to(&self, next: PositionStatus) -> bool {
        use PositionStatus::*;
        match (self, next) {
            (Closed, _) => false,
            (a, b) if *a == b => true,
            (Early, Active) | (Early, Exiting) | (Early, Closed) => true,
            (Active, Exiting) | (Active, MoonBag) | (Active, Closed) => true,
            (Exiting, Closed) => true,
            (MoonBag, Closed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionStatus::Early => write!(f, "EARLY"),
            PositionStatus::Active => write!(f, "ACTIVE"),
            PositionStatus::Exiting => write!(f, "EXITING"),
            PositionStatus::MoonBag => write!(f, "MOON_BAG"),
            PositionStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Profit-ladder milestones, keyed by ROI percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LadderRung {
    #[serde(rename = "100")]
    Roi100,
    #[serde(rename = "300")]
    Roi300,
    #[serde(rename = "600")]
    Roi600,
}

impl LadderRung {
    /// Rungs in evaluation order (lowest first).
    pub const ALL: &'static [LadderRung] = &[LadderRung::Roi100, LadderRung::Roi300, LadderRung::Roi600];

    /// ROI (not multiple) at which this rung fires.
    pub fn roi_threshold(&self) -> f64 {
        match self {
            LadderRung::Roi100 => 1.0,
            LadderRung::Roi300 => 3.0,
            LadderRung::Roi600 => 6.0,
        }
    }
}

impl fmt::Display for LadderRung {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LadderRung::Roi100 => write!(f, "100"),
            LadderRung::Roi300 => write!(f, "300"),
            LadderRung::Roi600 => write!(f, "600"),
        }
    }
}

// ---------------------------------------------------------------------------
// Market signals
// ---------------------------------------------------------------------------

fn neutral_signal() -> f64 {
    0.5
}

/// Market signals supplied by the cognition service. Each is expected in
/// [0, 1]; missing values default to 0.5 and out-of-range values are clamped
/// by the edge classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketSignals {
    #[serde(default = "neutral_signal")]
    pub trend: f64,
    #[serde(default = "neutral_signal")]
    pub sentiment: f64,
    #[serde(default = "neutral_signal")]
    pub novelty: f64,
    #[serde(default = "neutral_signal")]
    pub liquidity: f64,
    #[serde(default = "neutral_signal")]
    pub competition: f64,
}

impl Default for MarketSignals {
    fn default() -> Self {
        Self {
            trend: 0.5,
            sentiment: 0.5,
            novelty: 0.5,
            liquidity: 0.5,
            competition: 0.5,
        }
    }
}

impl fmt::Display for MarketSignals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trend={:.2} sentiment={:.2} novelty={:.2} liquidity={:.2} competition={:.2}",
            self.trend, self.sentiment, self.novelty, self.liquidity, self.competition,
        )
    }
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// The policy context a position was launched under. Used to credit the
/// bandit once the position has fully exited.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyOrigin {
    pub bucket: Bucket,
    pub mode: Mode,
    pub edge: f64,
}

/// Trailing-stop bookkeeping for a moon bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoonBag {
    pub ath_multiple: f64,
    pub last_trailing_sell_multiple: Option<f64>,
    pub activated_at: DateTime<Utc>,
}

/// What caused a sell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SellTrigger {
    Ladder { rung: LadderRung },
    DeadExit,
    TrailingStop { multiple: f64 },
}

impl fmt::Display for SellTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SellTrigger::Ladder { rung } => write!(f, "ladder_{rung}"),
            SellTrigger::DeadExit => write!(f, "dead_exit"),
            SellTrigger::TrailingStop { multiple } => write!(f, "trailing_stop@{multiple:.4}"),
        }
    }
}

/// An in-flight sell, persisted alongside `tx_pending` so a restart can
/// reconcile it instead of submitting a second sell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSell {
    pub trigger: SellTrigger,
    /// Token units submitted.
    pub amount: f64,
    /// Token amount held when the sell was started.
    pub token_amount_before: f64,
    /// Sweep valuation of the full remainder (MON) when the sell started.
    pub valuation_mon: f64,
    /// Known once the executor accepted the transaction.
    pub tx_hash: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// A launched token position managed through its exit lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    /// Token contract address.
    pub token: String,
    pub symbol: String,
    pub token_amount: f64,
    pub entry_cost_mon: f64,
    /// Percentage of the original position sold so far, in [0, 100].
    pub sold_pct_total: f64,
    pub ladder_hits: BTreeSet<LadderRung>,
    pub status: PositionStatus,
    pub moonbag: Option<MoonBag>,
    pub tx_pending: bool,
    pub pending_sell: Option<PendingSell>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    /// MON received from confirmed sells.
    pub realized_mon: f64,
    /// Multiple observed on the most recent valuation.
    pub last_multiple: Option<f64>,
    pub origin: Option<PolicyOrigin>,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} tokens={:.0} entry={:.4} MON sold={:.1}% hits={} {}",
            self.symbol,
            self.status,
            self.token_amount,
            self.entry_cost_mon,
            self.sold_pct_total,
            self.ladder_hits.len(),
            if self.tx_pending { "(tx pending)" } else { "" },
        )
    }
}

impl Position {
    /// Open a new position in the EARLY state.
    pub fn open(
        token: impl Into<String>,
        symbol: impl Into<String>,
        token_amount: f64,
        entry_cost_mon: f64,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            token: token.into(),
            symbol: symbol.into(),
            token_amount: token_amount.max(0.0),
            entry_cost_mon,
            sold_pct_total: 0.0,
            ladder_hits: BTreeSet::new(),
            status: PositionStatus::Early,
            moonbag: None,
            tx_pending: false,
            pending_sell: None,
            opened_at,
            closed_at: None,
            realized_mon: 0.0,
            last_multiple: None,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: PolicyOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Move to `next` if the transition table allows it.
    pub fn transition(&mut self, next: PositionStatus) -> Result<(), MemeSeerError> {
        if !self.status.can_transition_to(next) {
            return Err(MemeSeerError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Whether every ladder rung has been hit.
    pub fn ladder_complete(&self) -> bool {
        LadderRung::ALL.iter().all(|r| self.ladder_hits.contains(r))
    }

    /// Time since the position was opened.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.opened_at
    }
}

/// Open and closed positions. Closed positions are never mutated again.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Portfolio {
    #[serde(default)]
    pub active_positions: Vec<Position>,
    #[serde(default)]
    pub closed_positions: Vec<Position>,
}

impl Portfolio {
    /// Positions that count against the open-position cap.
    pub fn blocking_count(&self) -> usize {
        self.active_positions
            .iter()
            .filter(|p| p.status.is_blocking())
            .count()
    }

    pub fn find(&self, id: Uuid) -> Option<&Position> {
        self.active_positions.iter().find(|p| p.id == id)
    }

    pub fn find_mut(&mut self, id: Uuid) -> Option<&mut Position> {
        self.active_positions.iter_mut().find(|p| p.id == id)
    }

    pub fn is_closed(&self, id: Uuid) -> bool {
        self.closed_positions.iter().any(|p| p.id == id)
    }
}

// ---------------------------------------------------------------------------
// Guards and control flags
// ---------------------------------------------------------------------------

/// Process-wide risk limiter, updated only when a position closes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreGuard {
    pub loss_streak: u32,
    pub launch_blocked_until: Option<DateTime<Utc>>,
}

impl CoreGuard {
    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.launch_blocked_until.is_some_and(|until| now < until)
    }

    /// Record a closed position's final ROI. Returns the new block deadline
    /// when this closure trips the streak limit.
    pub fn record_close(
        &mut self,
        roi: f64,
        now: DateTime<Utc>,
        streak_limit: u32,
        block_for: Duration,
    ) -> Option<DateTime<Utc>> {
        if roi < 0.0 {
            self.loss_streak += 1;
        } else {
            self.loss_streak = 0;
        }

        if self.loss_streak >= streak_limit {
            let until = now + block_for;
            self.launch_blocked_until = Some(until);
            Some(until)
        } else {
            None
        }
    }
}

/// Launch lock and cooldown bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchControl {
    pub last_launch_at: Option<DateTime<Utc>>,
    pub launch_in_progress: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemFlags {
    /// Set externally; halts every cycle while true.
    pub kill_switch: bool,
}

/// Bandit state plus the balances seen on the first cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningState {
    pub bandit: BanditTable,
    pub last_balances: Option<Balances>,
}

impl Default for LearningState {
    fn default() -> Self {
        Self {
            bandit: BanditTable::seeded(),
            last_balances: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Everything worth remembering about a cycle, in persisted form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    KillSwitchActive,
    PolicyChosen {
        mode: Mode,
        bucket: Bucket,
        edge: f64,
        /// `None` while the chosen mode is still unexplored (infinite score).
        score: Option<f64>,
        t: u64,
    },
    Gated {
        gate: String,
        reason: String,
        mode: Mode,
        bucket: Bucket,
        edge: f64,
    },
    LearningUpdate {
        bucket: Bucket,
        mode: Mode,
        pulls: u64,
        mean_reward: f64,
        reward: f64,
    },
    Funding {
        sold_seer: f64,
        got_mon: f64,
        price: f64,
        scale: f64,
    },
    LaunchSpend {
        spent_mon: f64,
        mon_after: f64,
    },
    SimulatedOutcome {
        outcome: String,
        multiplier: f64,
        payout_mon: f64,
    },
    Flywheel {
        payout_mon: f64,
        stake_mon: f64,
        profit: f64,
        treasury_take: f64,
        buyback_budget: f64,
        bought_seer: f64,
    },
    LaunchSucceeded {
        position_id: Uuid,
        symbol: String,
        token: String,
        tx_hash: String,
    },
    LaunchFailed {
        reason: String,
    },
    ValuationFailed {
        position_id: Uuid,
        symbol: String,
        reason: String,
    },
    SellSent {
        position_id: Uuid,
        symbol: String,
        trigger: String,
        tx_hash: String,
    },
    SellConfirmed {
        position_id: Uuid,
        symbol: String,
        trigger: String,
        amount: f64,
        payout_mon: f64,
        sold_pct_total: f64,
    },
    SellFailed {
        position_id: Uuid,
        symbol: String,
        trigger: String,
        reason: String,
    },
    SellStuck {
        position_id: Uuid,
        symbol: String,
        since: DateTime<Utc>,
    },
    SellReconciled {
        position_id: Uuid,
        symbol: String,
        confirmed: bool,
    },
    LadderHit {
        position_id: Uuid,
        symbol: String,
        rung: LadderRung,
    },
    DeadExitStep {
        position_id: Uuid,
        symbol: String,
    },
    MoonBagActivated {
        position_id: Uuid,
        symbol: String,
        multiple: f64,
    },
    PositionClosed {
        position_id: Uuid,
        symbol: String,
        roi: f64,
    },
    CoreGuardBlocked {
        loss_streak: u32,
        until: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AgentEvent,
}

fn default_max_events() -> usize {
    500
}

/// Append-only event log that keeps only the most recent `max_events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    #[serde(default)]
    pub entries: Vec<EventRecord>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(default_max_events())
    }
}

impl EventLog {
    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            max_events: max_events.max(1),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, ts: DateTime<Utc>, event: AgentEvent) {
        self.entries.push(EventRecord { ts, event });
        if self.entries.len() > self.max_events {
            let excess = self.entries.len() - self.max_events;
            self.entries.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&AgentEvent> {
        self.entries.last().map(|r| &r.event)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentEvent> {
        self.entries.iter().map(|r| &r.event)
    }
}

// ---------------------------------------------------------------------------
// Agent state
// ---------------------------------------------------------------------------

/// Persistent agent document. Loaded at start-up, owned by the cycle
/// orchestrator, and replaced atomically on every checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub agent: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub cycle_count: u64,
    pub economy: EconomyState,
    #[serde(default)]
    pub learning: LearningState,
    #[serde(default)]
    pub portfolio: Portfolio,
    #[serde(default)]
    pub core_guard: CoreGuard,
    #[serde(default)]
    pub launch_control: LaunchControl,
    #[serde(default)]
    pub system: SystemFlags,
    #[serde(default)]
    pub events: EventLog,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.economy.balances;
        write!(
            f,
            "{} | cycles={} | SEER={:.4} MON={:.4} treasury={:.4} | open={} closed={} | loss_streak={}",
            self.agent,
            self.cycle_count,
            b.seer,
            b.mon,
            self.economy.treasury_mon,
            self.portfolio.active_positions.len(),
            self.portfolio.closed_positions.len(),
            self.core_guard.loss_streak,
        )
    }
}

impl AgentState {
    /// Fresh document: bootstrapped SEER holdings, zero MON, seeded bandit.
    pub fn new(
        agent: impl Into<String>,
        initial_seer: f64,
        params: EconomyParams,
        seer_price_mon: f64,
        max_events: usize,
    ) -> Self {
        Self {
            agent: agent.into(),
            created_at: Utc::now(),
            cycle_count: 0,
            economy: EconomyState::bootstrap(initial_seer, params, seer_price_mon),
            learning: LearningState::default(),
            portfolio: Portfolio::default(),
            core_guard: CoreGuard::default(),
            launch_control: LaunchControl::default(),
            system: SystemFlags::default(),
            events: EventLog::with_capacity(max_events),
        }
    }

    /// Record an event at `ts`.
    pub fn record(&mut self, ts: DateTime<Utc>, event: AgentEvent) {
        self.events.push(ts, event);
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for MEMESEER.
#[derive(Debug, thiserror::Error)]
pub enum MemeSeerError {
    #[error("Insufficient reserve: SEER below min_seer_to_live ({seer:.4} < {min:.4})")]
    InsufficientReserve { seer: f64, min: f64 },

    #[error("Illegal position transition: {from} -> {to}")]
    IllegalTransition { from: PositionStatus, to: PositionStatus },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
