//! Launchpad execution sidecar client.
//!
//! The sidecar owns wallets, signing and RPC. We speak a small JSON API:
//!
//! - `POST /quote`            `{token, amount, is_buy}` → `{router, amount}`
//! - `POST /sell`             `{token, amount}` → `{tx_hash}`
//! - `GET  /receipt/{tx}`     → `{status, tx_hash, amount_out_mon?}`
//! - `POST /launch`           `{name, symbol, description, stake_mon}` → `{token, tx_hash, token_amount}`
//! - `GET  /price/{token}`    → `{price}`
//!
//! Auth: optional `Authorization: Bearer {key}`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    ExecutionError, LaunchReceipt, LaunchRequest, LaunchVenue, PriceOracle, Quote, Receipt,
    TradeExecutor, TxHandle,
};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct QuoteBody<'a> {
    token: &'a str,
    amount: f64,
    is_buy: bool,
}

#[derive(Debug, Serialize)]
struct SellBody<'a> {
    token: &'a str,
    amount: f64,
}

#[derive(Debug, Deserialize)]
struct SellResponse {
    tx_hash: String,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: f64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct HttpVenueClient {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpVenueClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<SecretString>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .user_agent("MEMESEER/0.1.0 (launch-agent)")
            .build()
            .context("Failed to build HTTP client for execution sidecar")?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key.expose_secret()),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ExecutionError> {
        let resp = self
            .authed(req)
            .send()
            .await
            .map_err(|e| ExecutionError::Transport(e.to_string()))?;
        decode(resp).await
    }
}

/// Map status codes: 429 is rate limiting, 5xx is upstream trouble and any
/// other non-2xx is a terminal rejection.
pub(crate) fn classify_status(status: StatusCode, body: String) -> ExecutionError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ExecutionError::RateLimited
    } else if status.is_server_error() {
        ExecutionError::Upstream {
            status: status.as_u16(),
            message: body,
        }
    } else {
        ExecutionError::Rejected(format!("{status}: {body}"))
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ExecutionError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(classify_status(status, body));
    }
    resp.json::<T>()
        .await
        .map_err(|e| ExecutionError::Decode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Trait implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl TradeExecutor for HttpVenueClient {
    async fn quote(&self, token: &str, amount: f64, is_buy: bool) -> Result<Quote, ExecutionError> {
        debug!(token, amount, is_buy, "Requesting quote");
        let req = self
            .http
            .post(self.url("/quote"))
            .json(&QuoteBody { token, amount, is_buy });
        self.send(req).await
    }

    async fn sell(&self, token: &str, amount: f64) -> Result<TxHandle, ExecutionError> {
        debug!(token, amount, "Submitting sell");
        let req = self.http.post(self.url("/sell")).json(&SellBody { token, amount });
        let resp: SellResponse = self.send(req).await?;
        Ok(TxHandle(resp.tx_hash))
    }

    async fn await_receipt(&self, tx: &TxHandle) -> Result<Receipt, ExecutionError> {
        let req = self.http.get(self.url(&format!("/receipt/{}", tx.as_str())));
        match self.send::<Receipt>(req).await {
            Err(ExecutionError::Rejected(msg)) if msg.starts_with("404") => {
                Err(ExecutionError::ReceiptUnavailable(tx.to_string()))
            }
            other => other,
        }
    }
}

#[async_trait]
impl LaunchVenue for HttpVenueClient {
    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchReceipt, ExecutionError> {
        debug!(symbol = %request.symbol, stake = request.stake_mon, "Submitting launch");
        let req = self.http.post(self.url("/launch")).json(request);
        self.send(req).await
    }
}

#[async_trait]
impl PriceOracle for HttpVenueClient {
    async fn price(&self, token: &str) -> Result<f64, ExecutionError> {
        let req = self.http.get(self.url(&format!("/price/{token}")));
        let resp: PriceResponse = self.send(req).await?;
        Ok(resp.price)
    }
}
