//! Deterministic offline collaborators.
//!
//! Every token is worth 1/1000 MON, every launch buys 1000 tokens per MON
//! staked, every sell is accepted under a fixed hash, and every receipt
//! succeeds. Positions therefore sit at a 1.0x multiple forever.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use super::{
    ExecutionError, LaunchReceipt, LaunchRequest, LaunchVenue, PriceOracle, Quote, Receipt,
    ReceiptStatus, TradeExecutor, TxHandle,
};

/// Tokens per MON in the dry-run market.
pub const TOKENS_PER_MON: f64 = 1000.0;

pub const DRY_RUN_TX: &str = "0xdry_run";

pub struct DryRunVenue {
    seer_price_mon: f64,
    launches: AtomicU64,
}

impl DryRunVenue {
    pub fn new(seer_price_mon: f64) -> Self {
        Self {
            seer_price_mon,
            launches: AtomicU64::new(0),
        }
    }
}

impl Default for DryRunVenue {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[async_trait]
impl TradeExecutor for DryRunVenue {
    async fn quote(&self, _token: &str, amount: f64, _is_buy: bool) -> Result<Quote, ExecutionError> {
        Ok(Quote {
            router: "dry_run".to_string(),
            amount: amount / TOKENS_PER_MON,
        })
    }

    async fn sell(&self, token: &str, amount: f64) -> Result<TxHandle, ExecutionError> {
        info!(token, amount, "[DRY RUN] Would sell");
        Ok(TxHandle(DRY_RUN_TX.to_string()))
    }

    async fn await_receipt(&self, tx: &TxHandle) -> Result<Receipt, ExecutionError> {
        Ok(Receipt {
            status: ReceiptStatus::Success,
            tx_hash: tx.to_string(),
            amount_out_mon: None,
        })
    }
}

#[async_trait]
impl LaunchVenue for DryRunVenue {
    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchReceipt, ExecutionError> {
        let n = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        info!(symbol = %request.symbol, stake = request.stake_mon, "[DRY RUN] Would launch");
        Ok(LaunchReceipt {
            token: format!("0xdry{n:036x}"),
            tx_hash: DRY_RUN_TX.to_string(),
            token_amount: request.stake_mon * TOKENS_PER_MON,
        })
    }
}

#[async_trait]
impl PriceOracle for DryRunVenue {
    async fn price(&self, _token: &str) -> Result<f64, ExecutionError> {
        Ok(self.seer_price_mon)
    }
}
