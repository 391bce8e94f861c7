//! Scripted market for integration testing.
//!
//! Provides a deterministic executor, launch venue, price oracle and
//! signal source. Every token trades at one controllable MON price, sells
//! are recorded, and receipts can be registered up front to replay a sell
//! that was in flight when the agent stopped.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use memeseer::platforms::{
    CognitionInput, ExecutionError, LaunchReceipt, LaunchRequest, LaunchVenue, PriceOracle, Quote,
    Receipt, ReceiptStatus, SignalSource, TradeExecutor, TxHandle,
};

/// A scripted market. Clones share state, so the test can keep a handle
/// while the agent owns another.
#[derive(Clone)]
pub struct ScriptedMarket {
    /// MON per token, for every launched token.
    token_price: Arc<Mutex<f64>>,
    seer_price: Arc<Mutex<f64>>,
    launches: Arc<Mutex<u64>>,
    sells: Arc<Mutex<Vec<(String, f64)>>>,
    /// tx hash → MON received.
    receipts: Arc<Mutex<HashMap<String, f64>>>,
    /// If set, sells and launches return this error.
    force_error: Arc<Mutex<Option<ExecutionError>>>,
    fail_receipts: Arc<Mutex<bool>>,
}

impl ScriptedMarket {
    pub fn new(token_price: f64, seer_price: f64) -> Self {
        Self {
            token_price: Arc::new(Mutex::new(token_price)),
            seer_price: Arc::new(Mutex::new(seer_price)),
            launches: Arc::new(Mutex::new(0)),
            sells: Arc::new(Mutex::new(Vec::new())),
            receipts: Arc::new(Mutex::new(HashMap::new())),
            force_error: Arc::new(Mutex::new(None)),
            fail_receipts: Arc::new(Mutex::new(false)),
        }
    }

    pub fn set_token_price(&self, price: f64) {
        *self.token_price.lock().unwrap() = price;
    }

    /// Force sells and launches to fail.
    pub fn set_error(&self, err: ExecutionError) {
        *self.force_error.lock().unwrap() = Some(err);
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Mined transactions report failure from now on.
    pub fn set_fail_receipts(&self, fail: bool) {
        *self.fail_receipts.lock().unwrap() = fail;
    }

    /// Make `tx_hash` resolve as a successful sell paying `amount_out_mon`.
    pub fn register_receipt(&self, tx_hash: &str, amount_out_mon: f64) {
        self.receipts
            .lock()
            .unwrap()
            .insert(tx_hash.to_string(), amount_out_mon);
    }

    pub fn sells(&self) -> Vec<(String, f64)> {
        self.sells.lock().unwrap().clone()
    }

    pub fn launch_count(&self) -> u64 {
        *self.launches.lock().unwrap()
    }

    fn check_error(&self) -> Result<(), ExecutionError> {
        match self.force_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TradeExecutor for ScriptedMarket {
    async fn quote(&self, _token: &str, amount: f64, _is_buy: bool) -> Result<Quote, ExecutionError> {
        let price = *self.token_price.lock().unwrap();
        Ok(Quote {
            router: "scripted".to_string(),
            amount: amount * price,
        })
    }

    async fn sell(&self, token: &str, amount: f64) -> Result<TxHandle, ExecutionError> {
        self.check_error()?;
        let price = *self.token_price.lock().unwrap();
        let mut sells = self.sells.lock().unwrap();
        sells.push((token.to_string(), amount));
        let hash = format!("0xsell{:04}", sells.len());
        self.receipts.lock().unwrap().insert(hash.clone(), amount * price);
        Ok(TxHandle(hash))
    }

    async fn await_receipt(&self, tx: &TxHandle) -> Result<Receipt, ExecutionError> {
        let amount_out = self.receipts.lock().unwrap().get(tx.as_str()).copied();
        let Some(amount_out) = amount_out else {
            return Err(ExecutionError::ReceiptUnavailable(tx.to_string()));
        };
        if *self.fail_receipts.lock().unwrap() {
            return Ok(Receipt {
                status: ReceiptStatus::Failed,
                tx_hash: tx.to_string(),
                amount_out_mon: None,
            });
        }
        Ok(Receipt {
            status: ReceiptStatus::Success,
            tx_hash: tx.to_string(),
            amount_out_mon: Some(amount_out),
        })
    }
}

#[async_trait]
impl LaunchVenue for ScriptedMarket {
    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchReceipt, ExecutionError> {
        self.check_error()?;
        let price = *self.token_price.lock().unwrap();
        let mut n = self.launches.lock().unwrap();
        *n += 1;
        Ok(LaunchReceipt {
            token: format!("0xtoken{:04}", *n),
            tx_hash: format!("0xlaunch{:04}", *n),
            token_amount: (request.stake_mon / price).floor(),
        })
    }
}

#[async_trait]
impl PriceOracle for ScriptedMarket {
    async fn price(&self, _token: &str) -> Result<f64, ExecutionError> {
        Ok(*self.seer_price.lock().unwrap())
    }
}

/// Cognition input the test can change between cycles.
#[derive(Clone, Default)]
pub struct ScriptedSignals {
    input: Arc<Mutex<CognitionInput>>,
}

impl ScriptedSignals {
    pub fn set(&self, input: CognitionInput) {
        *self.input.lock().unwrap() = input;
    }
}

#[async_trait]
impl SignalSource for ScriptedSignals {
    async fn observe(&self) -> anyhow::Result<CognitionInput> {
        Ok(self.input.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_launch_buys_at_current_price() {
        let market = ScriptedMarket::new(0.001, 1.0);
        let req = LaunchRequest {
            name: "Seer Dog".into(),
            symbol: "SDOG".into(),
            description: String::new(),
            stake_mon: 5.0,
        };
        let receipt = market.launch(&req).await.unwrap();
        assert_eq!(receipt.token_amount, 5000.0);
        assert_eq!(market.launch_count(), 1);
    }

    #[tokio::test]
    async fn test_sell_receipt_pays_current_price() {
        let market = ScriptedMarket::new(0.002, 1.0);
        let tx = market.sell("0xtoken0001", 1000.0).await.unwrap();
        let receipt = market.await_receipt(&tx).await.unwrap();
        assert!(receipt.is_success());
        assert_eq!(receipt.amount_out_mon, Some(2.0));
        assert_eq!(market.sells().len(), 1);
    }

    #[test]
    fn test_unknown_receipt_unavailable() {
        let market = ScriptedMarket::new(0.001, 1.0);
        let err = tokio_test::block_on(market.await_receipt(&TxHandle("0xnope".into()))).unwrap_err();
        assert!(matches!(err, ExecutionError::ReceiptUnavailable(_)));
    }

    #[tokio::test]
    async fn test_forced_error() {
        let market = ScriptedMarket::new(0.001, 1.0);
        market.set_error(ExecutionError::RateLimited);
        assert!(market.sell("0xtoken0001", 1.0).await.is_err());
        market.clear_error();
        assert!(market.sell("0xtoken0001", 1.0).await.is_ok());
    }
}
