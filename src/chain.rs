//! Chain access for the BCH facilitator.
//!
//! All chain work goes through the [`ChainProvider`] capability: reading a
//! UTXO's authoritative amount and destination, reading the operator
//! wallet's balance, and broadcasting a payout. [`BchRestProvider`]
//! implements it against a wallet-node REST service (the deployment pairs
//! the facilitator with a wallet daemon that holds the operator key and
//! talks to the chain):
//!
//! - `GET  {base}/utxo/{txid}/{vout}` → `{"satoshis": u64, "address": "..."}`
//! - `GET  {base}/wallet/balance`     → `{"satoshis": u64}`
//! - `POST {base}/wallet/send`        → body `{"outputs": [{"address", "amountSat"}]}`,
//!   response `{"txid": "..."}`
//!
//! Requests carry `Authorization: Bearer {token}` when a token is
//! configured.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::{BchAddress, Satoshis, TxId};

/// Authoritative facts about one on-chain output.
#[derive(Debug, Clone, Deserialize)]
pub struct UtxoSnapshot {
    /// Size of the output in satoshis.
    #[serde(rename = "satoshis")]
    pub amount_sat: Satoshis,
    /// The address the output pays to.
    #[serde(rename = "address")]
    pub receiver_address: BchAddress,
}

/// One payout leg of a broadcast transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TxOutput {
    pub address: BchAddress,
    #[serde(rename = "amountSat")]
    pub amount_sat: Satoshis,
}

/// Errors from the chain provider.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Chain request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Chain request returned status {status}: {detail}")]
    UnexpectedStatus { status: StatusCode, detail: String },
    /// The referenced output does not exist (or is already spent and
    /// pruned by the wallet node).
    #[error("Output not found: {txid}:{vout}")]
    OutputNotFound { txid: TxId, vout: u32 },
    #[error("Failed to construct chain request URL")]
    BadUrl,
}

/// Read-only UTXO lookup, operator balance, and transaction broadcast.
#[async_trait]
pub trait ChainProvider: Send + Sync + 'static {
    /// Authoritative amount and destination of `(txid, vout)`.
    async fn utxo(&self, txid: &TxId, vout: u32) -> Result<UtxoSnapshot, ChainError>;

    /// Spendable balance of the operator wallet.
    async fn wallet_balance(&self) -> Result<Satoshis, ChainError>;

    /// Broadcast a transaction paying `outputs` from the operator wallet.
    /// Returns the transaction id as reported by the wallet node, which may
    /// be empty if the broadcast went wrong without a transport error.
    async fn send_to(&self, outputs: &[TxOutput]) -> Result<String, ChainError>;
}

#[async_trait]
impl<T: ChainProvider> ChainProvider for std::sync::Arc<T> {
    async fn utxo(&self, txid: &TxId, vout: u32) -> Result<UtxoSnapshot, ChainError> {
        self.as_ref().utxo(txid, vout).await
    }

    async fn wallet_balance(&self) -> Result<Satoshis, ChainError> {
        self.as_ref().wallet_balance().await
    }

    async fn send_to(&self, outputs: &[TxOutput]) -> Result<String, ChainError> {
        self.as_ref().send_to(outputs).await
    }
}

/// [`ChainProvider`] backed by the wallet-node REST service.
#[derive(Debug, Clone)]
pub struct BchRestProvider {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceBody {
    satoshis: Satoshis,
}

#[derive(Debug, Serialize)]
struct SendBody<'a> {
    outputs: &'a [TxOutput],
}

#[derive(Debug, Deserialize)]
struct SendResponseBody {
    #[serde(default)]
    txid: String,
}

impl BchRestProvider {
    pub fn new(base_url: Url, api_token: Option<String>) -> Self {
        BchRestProvider {
            client: Client::new(),
            base_url,
            api_token,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ChainError> {
        let mut url = self.base_url.clone();
        {
            let mut parts = url.path_segments_mut().map_err(|_| ChainError::BadUrl)?;
            parts.pop_if_empty();
            for segment in segments {
                parts.push(segment);
            }
        }
        Ok(url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn reject_bad_status(response: reqwest::Response) -> Result<reqwest::Response, ChainError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    Err(ChainError::UnexpectedStatus { status, detail })
}

#[async_trait]
impl ChainProvider for BchRestProvider {
    async fn utxo(&self, txid: &TxId, vout: u32) -> Result<UtxoSnapshot, ChainError> {
        let url = self.endpoint(&["utxo", txid.as_str(), &vout.to_string()])?;
        let response = self.authorized(self.client.get(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ChainError::OutputNotFound {
                txid: txid.clone(),
                vout,
            });
        }
        let response = reject_bad_status(response).await?;
        let snapshot = response.json::<UtxoSnapshot>().await?;
        Ok(snapshot)
    }

    async fn wallet_balance(&self) -> Result<Satoshis, ChainError> {
        let url = self.endpoint(&["wallet", "balance"])?;
        let response = self.authorized(self.client.get(url)).send().await?;
        let response = reject_bad_status(response).await?;
        let body = response.json::<BalanceBody>().await?;
        Ok(body.satoshis)
    }

    async fn send_to(&self, outputs: &[TxOutput]) -> Result<String, ChainError> {
        let url = self.endpoint(&["wallet", "send"])?;
        let response = self
            .authorized(self.client.post(url))
            .json(&SendBody { outputs })
            .send()
            .await?;
        let response = reject_bad_status(response).await?;
        let body = response.json::<SendResponseBody>().await?;
        Ok(body.txid)
    }
}
