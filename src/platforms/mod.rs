//! External collaborators.
//!
//! Defines the traits the core talks to and provides implementations for:
//! - `http`: JSON client for the launchpad execution sidecar
//! - `dry_run`: deterministic offline executor, venue and oracle
//! - `feed`: cognition signals read from a JSON file

pub mod dry_run;
pub mod feed;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::MarketSignals;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure reported by an execution collaborator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Upstream error {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Receipt unavailable for {0}")]
    ReceiptUnavailable(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl ExecutionError {
    /// Worth another attempt after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutionError::Transport(_)
                | ExecutionError::RateLimited
                | ExecutionError::Upstream { .. }
                | ExecutionError::ReceiptUnavailable(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Execution types
// ---------------------------------------------------------------------------

/// A priced route for a trade. `amount` is MON for sells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub router: String,
    pub amount: f64,
}

/// Transaction hash returned by a submitted sell or launch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHandle(pub String);

impl TxHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub status: ReceiptStatus,
    pub tx_hash: String,
    /// MON actually received, when the executor reports it.
    #[serde(default)]
    pub amount_out_mon: Option<f64>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub name: String,
    pub symbol: String,
    pub description: String,
    pub stake_mon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchReceipt {
    /// Deployed token contract address.
    pub token: String,
    pub tx_hash: String,
    /// Tokens received for the initial buy.
    pub token_amount: f64,
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Trade execution service.
///
/// `await_receipt` must be safe to call repeatedly for the same handle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    /// Price `amount` tokens. For `is_buy = false` the quote amount is the
    /// MON the sell would return.
    async fn quote(&self, token: &str, amount: f64, is_buy: bool) -> Result<Quote, ExecutionError>;

    /// Submit a sell and return its transaction handle.
    async fn sell(&self, token: &str, amount: f64) -> Result<TxHandle, ExecutionError>;

    /// Wait for the transaction to be mined.
    async fn await_receipt(&self, tx: &TxHandle) -> Result<Receipt, ExecutionError>;
}

/// Token launchpad.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LaunchVenue: Send + Sync {
    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchReceipt, ExecutionError>;
}

/// SEER price source, in MON per unit.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn price(&self, token: &str) -> Result<f64, ExecutionError>;
}

// ---------------------------------------------------------------------------
// Cognition
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenIdea {
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub description: String,
}

/// What the cognition service decided this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitionInput {
    #[serde(default)]
    pub signals: MarketSignals,
    #[serde(default = "default_true")]
    pub launch: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub token: Option<TokenIdea>,
}

impl Default for CognitionInput {
    fn default() -> Self {
        Self {
            signals: MarketSignals::default(),
            launch: true,
            reason: None,
            token: None,
        }
    }
}

impl CognitionInput {
    /// A declined input, used when the cognition service itself fails.
    pub fn declined(reason: impl Into<String>) -> Self {
        Self {
            launch: false,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Source of market signals and the launch decision.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn observe(&self) -> anyhow::Result<CognitionInput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ExecutionError::RateLimited.is_retryable());
        assert!(ExecutionError::Transport("reset".into()).is_retryable());
        assert!(ExecutionError::Upstream { status: 502, message: "bad gateway".into() }.is_retryable());
        assert!(!ExecutionError::Rejected("slippage".into()).is_retryable());
        assert!(!ExecutionError::Decode("eof".into()).is_retryable());
    }

    #[test]
    fn test_cognition_input_defaults() {
        let input: CognitionInput = serde_json::from_str(r#"{"signals": {"trend": 0.8}}"#).unwrap();
        assert!(input.launch);
        assert_eq!(input.signals.trend, 0.8);
        assert_eq!(input.signals.novelty, 0.5);
        assert!(input.token.is_none());

        let declined = CognitionInput::declined("timeout");
        assert!(!declined.launch);
        assert_eq!(declined.reason.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_receipt_decodes_without_amount() {
        let r: Receipt = serde_json::from_str(r#"{"status":"failed","tx_hash":"0x1"}"#).unwrap();
        assert!(!r.is_success());
        assert!(r.amount_out_mon.is_none());
    }
}
