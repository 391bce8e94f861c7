//! Economy and flywheel engine.
//!
//! Owns the SEER/MON balances, the treasury and the cumulative stats.
//! Funding sells SEER for launch MON, the flywheel splits realized profit
//! into a treasury skim and a SEER buyback, and the operating reserve is
//! never spent below `min_operating_mon`. Every write rounds to 8 dp.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::{Bucket, MemeSeerError};

/// Fractional precision of every persisted monetary value.
pub const MONEY_DP: u32 = 8;

/// Floor applied to any externally supplied SEER price.
pub const MIN_PRICE: f64 = 1e-9;

/// Round a monetary amount to `MONEY_DP` places. Non-finite input becomes 0.
pub fn round_money(x: f64) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    Decimal::from_f64(x)
        .map(|d| d.round_dp(MONEY_DP))
        .and_then(|d| d.to_f64())
        .unwrap_or(x)
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    pub seer: f64,
    pub mon: f64,
    #[serde(default)]
    pub seer_burned: f64,
}

impl Balances {
    fn rounded(self) -> Self {
        Self {
            seer: round_money(self.seer.max(0.0)),
            mon: round_money(self.mon.max(0.0)),
            seer_burned: round_money(self.seer_burned.max(0.0)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyParams {
    /// SEER floor below which launching is refused.
    pub min_seer_to_live: f64,
    /// Stake per launch, in MON.
    pub mon_per_launch: f64,
    /// Base fraction of SEER holdings that one funding call may sell.
    pub max_seer_sell_frac: f64,
    pub treasury_pct_of_profit: f64,
    /// Buybacks never take MON below this.
    pub min_operating_mon: f64,
    pub sell_frac_scale_bad: f64,
    pub sell_frac_scale_neutral: f64,
    pub sell_frac_scale_good: f64,
}

impl Default for EconomyParams {
    fn default() -> Self {
        Self {
            min_seer_to_live: 1.0,
            mon_per_launch: 5.0,
            max_seer_sell_frac: 0.25,
            treasury_pct_of_profit: 0.30,
            min_operating_mon: 5.0,
            sell_frac_scale_bad: 0.25,
            sell_frac_scale_neutral: 0.60,
            sell_frac_scale_good: 1.00,
        }
    }
}

impl EconomyParams {
    /// Bucket-dependent multiplier on `max_seer_sell_frac`.
    pub fn sell_frac_scale(&self, bucket: Bucket) -> f64 {
        match bucket {
            Bucket::Bad => self.sell_frac_scale_bad,
            Bucket::Neutral => self.sell_frac_scale_neutral,
            Bucket::Good => self.sell_frac_scale_good,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyStats {
    pub seer_sold_total: f64,
    pub buyback_mon_total: f64,
    pub seer_bought_total: f64,
    pub seer_burned_total: f64,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FundingNote {
    AlreadyFunded,
    SoldSeer,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FundingReport {
    pub sold_seer: f64,
    pub got_mon: f64,
    pub price: f64,
    pub mon_needed: f64,
    pub scale: f64,
    pub note: FundingNote,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpendReport {
    pub ok: bool,
    pub spent_mon: f64,
    pub mon_before: f64,
    pub mon_after: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlywheelReport {
    pub payout_mon: f64,
    pub stake_mon: f64,
    pub profit: f64,
    pub treasury_take: f64,
    pub profit_after_treasury: f64,
    pub buyback_budget_raw: f64,
    pub buyback_budget: f64,
    pub bought_seer: f64,
    pub mon_before: f64,
    pub mon_after: f64,
    pub buyback_pct: f64,
    pub burn_pct: f64,
}

// ---------------------------------------------------------------------------
// Economy state
// ---------------------------------------------------------------------------

/// The economy sub-record of the agent document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyState {
    pub balances: Balances,
    #[serde(default)]
    pub treasury_mon: f64,
    #[serde(default)]
    pub params: EconomyParams,
    #[serde(default)]
    pub stats: EconomyStats,
    #[serde(default = "default_price")]
    pub seer_price_mon: f64,
}

fn default_price() -> f64 {
    1.0
}

impl EconomyState {
    /// Starting economy: `initial_seer` SEER, no MON, empty treasury.
    pub fn bootstrap(initial_seer: f64, params: EconomyParams, seer_price_mon: f64) -> Self {
        Self {
            balances: Balances {
                seer: initial_seer,
                mon: 0.0,
                seer_burned: 0.0,
            }
            .rounded(),
            treasury_mon: 0.0,
            params,
            stats: EconomyStats::default(),
            seer_price_mon: seer_price_mon.max(MIN_PRICE),
        }
    }

    /// MON per SEER, never below `MIN_PRICE`.
    pub fn seer_price(&self) -> f64 {
        if self.seer_price_mon.is_finite() {
            self.seer_price_mon.max(MIN_PRICE)
        } else {
            MIN_PRICE
        }
    }

    pub fn set_price(&mut self, price: f64) {
        if !price.is_finite() {
            warn!(price, "Ignoring non-finite SEER price");
            return;
        }
        self.seer_price_mon = price.max(MIN_PRICE);
    }

    /// Reserve gate: launching requires `seer ≥ min_seer_to_live`.
    pub fn can_launch(&self) -> Result<(), MemeSeerError> {
        let min = self.params.min_seer_to_live;
        if self.balances.seer < min {
            return Err(MemeSeerError::InsufficientReserve {
                seer: self.balances.seer,
                min,
            });
        }
        Ok(())
    }

    /// Whether the MON balance covers one launch stake.
    pub fn has_launch_funds(&self) -> bool {
        self.balances.mon >= self.params.mon_per_launch
    }

    /// Sell SEER until MON covers one stake, bounded by the bucket-scaled
    /// sell fraction. Funding may be partial; re-check `has_launch_funds`.
    pub fn fund_launch(&mut self, bucket: Bucket) -> FundingReport {
        let price = self.seer_price();
        let mon_needed = self.params.mon_per_launch;
        let scale = self.params.sell_frac_scale(bucket);

        if self.balances.mon >= mon_needed {
            debug!(mon = self.balances.mon, mon_needed, "Launch already funded");
            return FundingReport {
                sold_seer: 0.0,
                got_mon: 0.0,
                price,
                mon_needed,
                scale,
                note: FundingNote::AlreadyFunded,
            };
        }

        let max_sell_frac = (self.params.max_seer_sell_frac * scale).clamp(0.0, 1.0);
        let seer_required = (mon_needed - self.balances.mon) / price;
        let seer_cap = self.balances.seer * max_sell_frac;
        let sold_seer = seer_required.min(seer_cap).max(0.0);
        let got_mon = sold_seer * price;

        let mut bal = self.balances;
        bal.seer -= sold_seer;
        bal.mon += got_mon;
        self.balances = bal.rounded();
        self.stats.seer_sold_total = round_money(self.stats.seer_sold_total + sold_seer);

        info!(
            %bucket,
            sold_seer = format!("{:.4}", sold_seer),
            got_mon = format!("{:.4}", got_mon),
            price,
            scale,
            partial = sold_seer < seer_required,
            "Sold SEER for launch funding"
        );

        FundingReport {
            sold_seer: round_money(sold_seer),
            got_mon: round_money(got_mon),
            price,
            mon_needed,
            scale,
            note: FundingNote::SoldSeer,
        }
    }

    /// Deduct one launch stake. Leaves balances untouched when MON is short.
    pub fn spend_for_launch(&mut self) -> SpendReport {
        let mon_needed = self.params.mon_per_launch;
        let before = self.balances.mon;
        if before < mon_needed {
            warn!(mon = before, mon_needed, "Insufficient MON for launch");
            return SpendReport {
                ok: false,
                spent_mon: 0.0,
                mon_before: before,
                mon_after: before,
            };
        }

        let mut bal = self.balances;
        bal.mon -= mon_needed;
        self.balances = bal.rounded();

        SpendReport {
            ok: true,
            spent_mon: round_money(mon_needed),
            mon_before: before,
            mon_after: self.balances.mon,
        }
    }

    /// Return a stake that provably never left, e.g. a rejected launch.
    pub fn refund_launch(&mut self, spent_mon: f64) {
        let mut bal = self.balances;
        bal.mon += spent_mon.max(0.0);
        self.balances = bal.rounded();
        debug!(refunded = spent_mon, mon = self.balances.mon, "Launch stake refunded");
    }

    /// Distribute a realized payout.
    ///
    /// The payout is credited to MON, the treasury's share of profit moves
    /// out of MON into `treasury_mon`, and a buyback of
    /// `(profit - treasury) · buyback_pct` converts MON to SEER, truncated so
    /// MON stays at or above `min_operating_mon`. `burn_pct` is clamped to
    /// [0, 0.05] and reported but not applied.
    pub fn apply_flywheel(
        &mut self,
        payout_mon: f64,
        stake_mon: f64,
        buyback_pct: f64,
        burn_pct: f64,
    ) -> FlywheelReport {
        let price = self.seer_price();
        let payout_mon = payout_mon.max(0.0);
        let stake_mon = stake_mon.max(0.0);
        let mut bal = self.balances;
        let mon_before = bal.mon;

        let profit = (payout_mon - stake_mon).max(0.0);
        let treasury_pct = self.params.treasury_pct_of_profit.clamp(0.0, 1.0);
        let treasury_take = profit * treasury_pct;
        let profit_after_treasury = profit - treasury_take;

        bal.mon += payout_mon - treasury_take;

        let buyback_pct = buyback_pct.clamp(0.0, 1.0);
        let burn_pct = burn_pct.clamp(0.0, 0.05);
        let buyback_budget_raw = profit_after_treasury * buyback_pct;

        let max_buyback = (bal.mon - self.params.min_operating_mon).max(0.0);
        let buyback_budget = buyback_budget_raw.min(max_buyback);

        let mut bought_seer = 0.0;
        if buyback_budget > 0.0 {
            bought_seer = buyback_budget / price;
            bal.mon -= buyback_budget;
            bal.seer += bought_seer;
        }

        self.balances = bal.rounded();
        self.treasury_mon = round_money(self.treasury_mon + treasury_take);
        self.stats.buyback_mon_total = round_money(self.stats.buyback_mon_total + buyback_budget);
        self.stats.seer_bought_total = round_money(self.stats.seer_bought_total + bought_seer);

        if buyback_budget < buyback_budget_raw {
            debug!(
                raw = buyback_budget_raw,
                capped = buyback_budget,
                "Buyback truncated by operating reserve"
            );
        }

        info!(
            payout = format!("{:.4}", payout_mon),
            stake = format!("{:.4}", stake_mon),
            profit = format!("{:.4}", profit),
            treasury = format!("{:.4}", treasury_take),
            buyback = format!("{:.4}", buyback_budget),
            bought_seer = format!("{:.4}", bought_seer),
            "Flywheel applied"
        );

        FlywheelReport {
            payout_mon: round_money(payout_mon),
            stake_mon: round_money(stake_mon),
            profit: round_money(profit),
            treasury_take: round_money(treasury_take),
            profit_after_treasury: round_money(profit_after_treasury),
            buyback_budget_raw: round_money(buyback_budget_raw),
            buyback_budget: round_money(buyback_budget),
            bought_seer: round_money(bought_seer),
            mon_before,
            mon_after: self.balances.mon,
            buyback_pct,
            burn_pct,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
