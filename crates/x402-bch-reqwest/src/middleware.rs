//! Middleware for handling HTTP 402 Payment Required responses with BCH
//! UTXO payments.
//!
//! The middleware keeps one active payment UTXO per client. When a 402
//! arrives it either reuses that UTXO (decrementing its local balance) or
//! funds a fresh one of `payment_amount_sats`, a client-configured batch
//! size larger than a single call's price so that one on-chain transaction
//! covers many calls. Each retry carries a freshly signed authorization
//! for the current price.

use async_trait::async_trait;
use http::{Extensions, HeaderValue, StatusCode};
use reqwest::{Request, Response};
use reqwest_middleware as rqm;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;

use x402_bch::chain::{ChainError, ChainProvider, TxOutput};
use x402_bch::signature::BchSigner;
use x402_bch::types::{
    BchAddress, PaymentPayload, PaymentRequiredResponse, PaymentRequirements, Satoshis, Scheme,
    TxId, UtxoAuthorization, UtxoPayload, X402Version,
};

/// The client's local belief about its active payment UTXO.
#[derive(Debug, Clone)]
pub struct ClientUtxoState {
    pub txid: TxId,
    pub vout: u32,
    pub sats_left: Satoshis,
}

/// A freshly funded payment UTXO.
#[derive(Debug, Clone)]
pub struct FundedUtxo {
    pub txid: TxId,
    pub vout: u32,
    pub sats_sent: Satoshis,
}

/// Errors funding a payment UTXO.
#[derive(Debug, thiserror::Error)]
pub enum FunderError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("Funding transaction id is not a valid txid: {0:?}")]
    BadTxId(String),
}

/// Capability: send `amount_sat` to `to`, creating the UTXO later payments
/// debit against.
#[async_trait]
pub trait UtxoFunder: Send + Sync + 'static {
    async fn fund(&self, to: &BchAddress, amount_sat: Satoshis) -> Result<FundedUtxo, FunderError>;
}

/// Funds payment UTXOs through any [`ChainProvider`] wallet: one output to
/// the payee, vout 0.
pub struct WalletFunder<C>(pub C);

#[async_trait]
impl<C: ChainProvider> UtxoFunder for WalletFunder<C> {
    async fn fund(&self, to: &BchAddress, amount_sat: Satoshis) -> Result<FundedUtxo, FunderError> {
        let outputs = [TxOutput {
            address: to.clone(),
            amount_sat,
        }];
        let txid = self.0.send_to(&outputs).await?;
        let txid = txid
            .parse::<TxId>()
            .map_err(|_| FunderError::BadTxId(txid))?;
        Ok(FundedUtxo {
            txid,
            vout: 0,
            sats_sent: amount_sat,
        })
    }
}

/// Errors constructing or applying an x402 BCH payment.
#[derive(Debug, thiserror::Error)]
pub enum UtxoPaymentsError {
    /// The original request could not be cloned for the paid retry.
    #[error("Request object is not cloneable. Are you passing a streaming body?")]
    RequestNotCloneable,
    /// None of the server's accepted payment methods is a BCH `utxo`
    /// scheme matching the signer's network.
    #[error("No BCH payment requirements found in 402 response")]
    NoSuitablePaymentMethod,
    /// The selected requirements carry no price.
    #[error("Payment requirements carry no minAmountRequired")]
    MissingCost,
    /// The configured batch size cannot cover even one call.
    #[error("Configured payment batch {batch} sat cannot cover a {cost} sat call")]
    BatchTooSmall { batch: Satoshis, cost: Satoshis },
    #[error("Funding payment failed: {0}")]
    Funding(#[from] FunderError),
    #[error("Failed to encode payment payload to json")]
    JsonEncode(#[from] serde_json::Error),
    #[error("Failed to encode payment payload to HTTP header")]
    HeaderValueEncode(#[source] http::header::InvalidHeaderValue),
}

impl From<UtxoPaymentsError> for rqm::Error {
    fn from(error: UtxoPaymentsError) -> Self {
        rqm::Error::Middleware(error.into())
    }
}

/// Marker preventing a second payment retry for the same logical request.
#[derive(Debug, Clone, Copy)]
struct PaymentRetried;

/// Middleware that answers 402 challenges with signed BCH UTXO payments.
pub struct UtxoPayments<F> {
    signer: Arc<BchSigner>,
    funder: Arc<F>,
    payment_amount_sats: Satoshis,
    state: Arc<Mutex<Option<ClientUtxoState>>>,
}

impl<F> Clone for UtxoPayments<F> {
    fn clone(&self) -> Self {
        UtxoPayments {
            signer: self.signer.clone(),
            funder: self.funder.clone(),
            payment_amount_sats: self.payment_amount_sats,
            state: self.state.clone(),
        }
    }
}

impl<F: UtxoFunder> UtxoPayments<F> {
    /// Default funding batch when none is configured.
    pub const DEFAULT_PAYMENT_AMOUNT: Satoshis = Satoshis(2000);

    pub fn new(signer: BchSigner, funder: F) -> Self {
        UtxoPayments {
            signer: Arc::new(signer),
            funder: Arc::new(funder),
            payment_amount_sats: Self::DEFAULT_PAYMENT_AMOUNT,
            state: Arc::new(Mutex::new(None)),
        }
    }

    /// Satoshis sent when funding a fresh payment UTXO. Each funding
    /// covers `payment_amount_sats / price` calls.
    pub fn with_payment_amount(mut self, payment_amount_sats: Satoshis) -> Self {
        self.payment_amount_sats = payment_amount_sats;
        self
    }

    /// Pick the BCH `utxo` requirements matching the signer's network from
    /// a 402 challenge.
    fn select_payment_requirements<'a>(
        &self,
        accepts: &'a [PaymentRequirements],
    ) -> Result<&'a PaymentRequirements, UtxoPaymentsError> {
        accepts
            .iter()
            .find(|requirements| {
                requirements.scheme == Scheme::Utxo
                    && requirements.network.address_prefix() == self.signer.address().prefix()
            })
            .ok_or(UtxoPaymentsError::NoSuitablePaymentMethod)
    }

    /// Decide which UTXO pays for a `cost`-satoshi call: reuse the active
    /// one while its balance covers the cost, otherwise fund a fresh one.
    /// The local balance is decremented optimistically, mirroring the
    /// facilitator's ledger.
    async fn next_utxo(
        &self,
        cost: Satoshis,
        pay_to: &BchAddress,
    ) -> Result<(TxId, u32), UtxoPaymentsError> {
        let mut state = self.state.lock().await;
        if let Some(current) = state.as_mut()
            && let Some(remaining) = current.sats_left.checked_sub(cost)
        {
            current.sats_left = remaining;
            tracing::debug!(txid = %current.txid, sats_left = %remaining, "reusing payment UTXO");
            return Ok((current.txid.clone(), current.vout));
        }

        if self.payment_amount_sats < cost {
            return Err(UtxoPaymentsError::BatchTooSmall {
                batch: self.payment_amount_sats,
                cost,
            });
        }
        let funded = self.funder.fund(pay_to, self.payment_amount_sats).await?;
        let sats_left = funded
            .sats_sent
            .checked_sub(cost)
            .unwrap_or(Satoshis(0));
        tracing::info!(txid = %funded.txid, sats_left = %sats_left, "funded fresh payment UTXO");
        *state = Some(ClientUtxoState {
            txid: funded.txid.clone(),
            vout: funded.vout,
            sats_left,
        });
        Ok((funded.txid, funded.vout))
    }

    /// Build the raw-JSON `X-PAYMENT` header for one call against the
    /// selected requirements.
    #[instrument(name = "x402.make_payment_header", skip_all, fields(resource = %selected.resource))]
    async fn make_payment_header(
        &self,
        selected: &PaymentRequirements,
        x402_version: X402Version,
    ) -> Result<HeaderValue, UtxoPaymentsError> {
        let cost = selected
            .min_amount_required
            .ok_or(UtxoPaymentsError::MissingCost)?;
        let (txid, vout) = self.next_utxo(cost, &selected.pay_to).await?;
        let authorization = UtxoAuthorization {
            from: self.signer.address().clone(),
            to: selected.pay_to.clone(),
            value: cost,
            txid,
            vout,
            amount: Some(self.payment_amount_sats),
        };
        let message = authorization.signing_message()?;
        let signature = self.signer.sign(&message);
        let payload = PaymentPayload {
            x402_version,
            scheme: Scheme::Utxo,
            network: selected.network,
            payload: UtxoPayload {
                signature: Some(signature),
                authorization: Some(authorization),
            },
        };
        let json = serde_json::to_string(&payload)?;
        HeaderValue::from_str(&json).map_err(UtxoPaymentsError::HeaderValueEncode)
    }
}

#[async_trait]
impl<F: UtxoFunder> rqm::Middleware for UtxoPayments<F> {
    /// Intercepts 402 responses, constructs a payment, and retries the
    /// request exactly once.
    #[instrument(name = "x402.handle", skip_all, fields(method = %req.method(), url = %req.url()))]
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: rqm::Next<'_>,
    ) -> rqm::Result<Response> {
        let retry_req = req.try_clone(); // For retrying with payment later

        let res = next.clone().run(req, extensions).await?;
        if res.status() != StatusCode::PAYMENT_REQUIRED {
            return Ok(res);
        }
        if extensions.get::<PaymentRetried>().is_some() {
            // Paid once already; surface the second 402 instead of looping.
            return Ok(res);
        }

        let challenge = res.json::<PaymentRequiredResponse>().await?;
        let retry_req = async {
            let selected = self.select_payment_requirements(&challenge.accepts)?;
            let header = self
                .make_payment_header(selected, challenge.x402_version)
                .await?;
            let mut req = retry_req.ok_or(UtxoPaymentsError::RequestNotCloneable)?;
            let headers = req.headers_mut();
            headers.insert("X-PAYMENT", header);
            headers.insert(
                "Access-Control-Expose-Headers",
                HeaderValue::from_static("X-PAYMENT-RESPONSE"),
            );
            Ok::<Request, UtxoPaymentsError>(req)
        }
        .await
        .map_err(Into::<rqm::Error>::into)?;

        extensions.insert(PaymentRetried);
        next.run(retry_req, extensions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::SecretKey;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use x402_bch::network::Network;

    const PAY_TO: &str = "bitcoincash:qqlrzp23w08434twmvr4fxw672whkjy0py26r63g3d";
    const FUND_TXID: &str = "b74dcfc839eb3693be811be64e563171d83e191388fdda900f2d3b952df01ba7";

    struct MockFunder {
        calls: AtomicUsize,
    }

    impl MockFunder {
        fn new() -> Self {
            MockFunder {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl UtxoFunder for MockFunder {
        async fn fund(
            &self,
            _to: &BchAddress,
            amount_sat: Satoshis,
        ) -> Result<FundedUtxo, FunderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FundedUtxo {
                txid: FUND_TXID.parse().unwrap(),
                vout: 0,
                sats_sent: amount_sat,
            })
        }
    }

    fn signer() -> BchSigner {
        BchSigner::from_secret_key(SecretKey::from_slice(&[0x42; 32]).unwrap(), Network::Bch)
            .unwrap()
    }

    fn requirements(price: u64) -> PaymentRequirements {
        PaymentRequirements {
            scheme: Scheme::Utxo,
            network: Network::Bch,
            min_amount_required: Some(Satoshis(price)),
            resource: "http://localhost:4021/weather".parse().unwrap(),
            description: String::new(),
            mime_type: String::new(),
            output_schema: None,
            pay_to: PAY_TO.parse().unwrap(),
            max_timeout_seconds: 60,
            asset: "0x0000000000000000000000000000000000000001".to_string(),
            extra: None,
        }
    }

    fn payments(batch: u64) -> UtxoPayments<MockFunder> {
        UtxoPayments::new(signer(), MockFunder::new())
            .with_payment_amount(Satoshis(batch))
    }

    #[tokio::test]
    async fn test_first_payment_funds_fresh_utxo() {
        let payments = payments(2500);
        let header = payments
            .make_payment_header(&requirements(1000), X402Version::V1)
            .await
            .unwrap();
        let payload: PaymentPayload =
            serde_json::from_str(header.to_str().unwrap()).unwrap();
        let authorization = payload.payload.authorization.unwrap();
        assert_eq!(authorization.value, Satoshis(1000));
        assert_eq!(authorization.amount, Some(Satoshis(2500)));
        assert_eq!(authorization.txid.as_str(), FUND_TXID);
        assert_eq!(payments.funder.calls.load(Ordering::SeqCst), 1);

        let state = payments.state.lock().await;
        assert_eq!(state.as_ref().unwrap().sats_left, Satoshis(1500));
    }

    #[tokio::test]
    async fn test_utxo_reused_until_exhausted_then_refunded() {
        let payments = payments(2500);
        let requirements = requirements(1000);

        // Call 1 funds (2500 - 1000 = 1500 left); call 2 reuses (500
        // left); call 3 cannot cover 1000 and funds again.
        for _ in 0..2 {
            payments
                .make_payment_header(&requirements, X402Version::V1)
                .await
                .unwrap();
        }
        assert_eq!(payments.funder.calls.load(Ordering::SeqCst), 1);

        payments
            .make_payment_header(&requirements, X402Version::V1)
            .await
            .unwrap();
        assert_eq!(payments.funder.calls.load(Ordering::SeqCst), 2);

        let state = payments.state.lock().await;
        assert_eq!(state.as_ref().unwrap().sats_left, Satoshis(1500));
    }

    #[tokio::test]
    async fn test_batch_smaller_than_price_is_an_error() {
        let payments = payments(500);
        let result = payments
            .make_payment_header(&requirements(1000), X402Version::V1)
            .await;
        assert!(matches!(
            result,
            Err(UtxoPaymentsError::BatchTooSmall { .. })
        ));
        // Nothing was funded.
        assert_eq!(payments.funder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_select_requirements_filters_foreign_schemes() {
        let payments = payments(2500);
        let mut foreign = requirements(1000);
        foreign.scheme = Scheme::Exact;
        assert!(matches!(
            payments.select_payment_requirements(&[foreign.clone()]),
            Err(UtxoPaymentsError::NoSuitablePaymentMethod)
        ));
        let matching = requirements(1000);
        let accepts = vec![foreign, matching];
        let selected = payments.select_payment_requirements(&accepts).unwrap();
        assert_eq!(selected.scheme, Scheme::Utxo);
    }

    #[tokio::test]
    async fn test_middleware_pays_and_retries_once() {
        let server = MockServer::start().await;
        let challenge = PaymentRequiredResponse {
            x402_version: X402Version::V1,
            error: "X-PAYMENT header is required".to_string(),
            accepts: vec![requirements(1000)],
            payer: None,
        };
        // Paid requests succeed; unpaid ones get the challenge.
        Mock::given(method("GET"))
            .and(path("/weather"))
            .and(header_exists("X-PAYMENT"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"weather": "sunny"})),
            )
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(ResponseTemplate::new(402).set_body_json(&challenge))
            .with_priority(5)
            .mount(&server)
            .await;

        let client = rqm::ClientBuilder::new(reqwest::Client::new())
            .with(payments(2500))
            .build();
        let response = client
            .get(format!("{}/weather", server.uri()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["weather"], "sunny");
    }

    #[tokio::test]
    async fn test_middleware_passes_through_non_402() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/open"))
            .respond_with(ResponseTemplate::new(200).set_body_string("open"))
            .mount(&server)
            .await;

        let payments = payments(2500);
        let client = rqm::ClientBuilder::new(reqwest::Client::new())
            .with(payments.clone())
            .build();
        let response = client
            .get(format!("{}/open", server.uri()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(payments.funder.calls.load(Ordering::SeqCst), 0);
    }
}
