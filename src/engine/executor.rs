//! Retry policy at the execution boundary.
//!
//! Wraps any collaborator in bounded exponential backoff. Reads (`quote`,
//! `price`, `await_receipt`) retry every retryable failure. Writes (`sell`,
//! `launch`) retry only when rate limited, because a transport or upstream
//! failure may mean the transaction was accepted after all.

use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, warn};

use async_trait::async_trait;

use crate::platforms::{
    ExecutionError, LaunchReceipt, LaunchRequest, LaunchVenue, PriceOracle, Quote, Receipt,
    TradeExecutor, TxHandle,
};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 1000,
        }
    }
}

/// Read operations may be repeated freely.
fn retry_reads(e: &ExecutionError) -> bool {
    e.is_retryable()
}

/// A rate-limited write was provably not accepted.
fn retry_writes(e: &ExecutionError) -> bool {
    matches!(e, ExecutionError::RateLimited)
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        self.base_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Run `op` until it succeeds, fails terminally, or retries run out.
    pub async fn run<T, F, Fut>(
        &self,
        name: &str,
        should_retry: fn(&ExecutionError) -> bool,
        mut op: F,
    ) -> Result<T, ExecutionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff_ms(attempt);
                debug!(attempt, delay_ms = delay, op = name, "Retrying execution call");
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }

            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if should_retry(&e) => {
                    warn!(attempt, op = name, error = %e, "Execution call failed, will retry");
                    last_err = Some(e);
                }
                Err(e) => {
                    warn!(attempt, op = name, error = %e, "Execution call failed");
                    return Err(e);
                }
            }
        }

        warn!(op = name, retries = self.max_retries, "Execution call exhausted retries");
        Err(last_err.unwrap_or_else(|| ExecutionError::Transport(format!("{name}: no attempts made"))))
    }
}

// ---------------------------------------------------------------------------
// Retrying wrapper
// ---------------------------------------------------------------------------

/// Applies a `RetryPolicy` to every call on the wrapped collaborator.
pub struct RetryingExecutor<E> {
    inner: E,
    policy: RetryPolicy,
}

impl<E> RetryingExecutor<E> {
    pub fn new(inner: E, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: TradeExecutor> TradeExecutor for RetryingExecutor<E> {
    async fn quote(&self, token: &str, amount: f64, is_buy: bool) -> Result<Quote, ExecutionError> {
        self.policy
            .run("quote", retry_reads, || self.inner.quote(token, amount, is_buy))
            .await
    }

    async fn sell(&self, token: &str, amount: f64) -> Result<TxHandle, ExecutionError> {
        self.policy
            .run("sell", retry_writes, || self.inner.sell(token, amount))
            .await
    }

    async fn await_receipt(&self, tx: &TxHandle) -> Result<Receipt, ExecutionError> {
        self.policy
            .run("await_receipt", retry_reads, || self.inner.await_receipt(tx))
            .await
    }
}

#[async_trait]
impl<E: LaunchVenue> LaunchVenue for RetryingExecutor<E> {
    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchReceipt, ExecutionError> {
        self.policy
            .run("launch", retry_writes, || self.inner.launch(request))
            .await
    }
}

#[async_trait]
impl<E: PriceOracle> PriceOracle for RetryingExecutor<E> {
    async fn price(&self, token: &str) -> Result<f64, ExecutionError> {
        self.policy
            .run("price", retry_reads, || self.inner.price(token))
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::{MockPriceOracle, MockTradeExecutor, ReceiptStatus};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_backoff_ms: 1,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff_ms(1), 1000);
        assert_eq!(p.backoff_ms(2), 2000);
        assert_eq!(p.backoff_ms(3), 4000);
    }

    #[tokio::test]
    async fn test_sell_retries_rate_limit_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut mock = MockTradeExecutor::new();
        mock.expect_sell().times(3).returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ExecutionError::RateLimited)
            } else {
                Ok(TxHandle("0xok".into()))
            }
        });

        let exec = RetryingExecutor::new(mock, fast());
        let tx = exec.sell("0xabc", 10.0).await.unwrap();
        assert_eq!(tx.as_str(), "0xok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_sell_does_not_retry_upstream_error() {
        let mut mock = MockTradeExecutor::new();
        mock.expect_sell().times(1).returning(|_, _| {
            Err(ExecutionError::Upstream {
                status: 502,
                message: "gateway".into(),
            })
        });

        let exec = RetryingExecutor::new(mock, fast());
        let err = exec.sell("0xabc", 10.0).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Upstream { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_receipt_retries_until_exhausted() {
        let mut mock = MockTradeExecutor::new();
        mock.expect_await_receipt()
            .times(4)
            .returning(|tx| Err(ExecutionError::ReceiptUnavailable(tx.to_string())));

        let exec = RetryingExecutor::new(mock, fast());
        let err = exec.await_receipt(&TxHandle("0x1".into())).await.unwrap_err();
        assert!(matches!(err, ExecutionError::ReceiptUnavailable(_)));
    }

    #[tokio::test]
    async fn test_receipt_success_passes_through() {
        let mut mock = MockTradeExecutor::new();
        mock.expect_await_receipt().times(1).returning(|tx| {
            Ok(Receipt {
                status: ReceiptStatus::Success,
                tx_hash: tx.to_string(),
                amount_out_mon: Some(1.5),
            })
        });

        let exec = RetryingExecutor::new(mock, fast());
        let r = exec.await_receipt(&TxHandle("0x1".into())).await.unwrap();
        assert_eq!(r.amount_out_mon, Some(1.5));
    }

    #[tokio::test]
    async fn test_rejection_is_terminal_for_reads() {
        let mut mock = MockPriceOracle::new();
        mock.expect_price()
            .times(1)
            .returning(|_| Err(ExecutionError::Rejected("unknown token".into())));

        let exec = RetryingExecutor::new(mock, fast());
        assert!(exec.price("SEER").await.is_err());
    }
}
