//! The payment gate: a tower `Layer` that challenges unpaid requests to
//! protected routes and verifies `X-PAYMENT` headers with a facilitator.
//!
//! State machine per request, independent across requests:
//!
//! - route not in the table → pass through untouched
//! - no `X-PAYMENT` header → 402 with the price list
//! - malformed header → 402 with the parse error and the same price list
//! - header present and well-formed → `POST {facilitator}/verify`
//!   - rejected → 402 with the facilitator's reason and payer
//!   - verified → forward to the handler; the response carries
//!     `Access-Control-Expose-Headers: X-PAYMENT-RESPONSE`
//!
//! The `X-PAYMENT` header is a raw JSON string (not base64). A malformed
//! header or an unreachable facilitator always produces a 402 challenge
//! the client can retry from, never a 5xx.

use axum_core::body::Body;
use axum_core::extract::Request;
use axum_core::response::Response;
use http::header::{CONTENT_TYPE, HOST};
use http::{HeaderValue, StatusCode};
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};
use url::Url;

use x402_bch::types::{
    BchAddress, PaymentPayload, PaymentRequiredResponse, PaymentRequirements, VerifyRequest,
    VerifyResponse, X402Version,
};

use crate::facilitator_client::FacilitatorClient;
use crate::routes::{RouteConfig, RoutePatternError, RouteTable};

/// Placeholder asset id carried in BCH payment requirements for x402
/// compatibility.
const BCH_ASSET_ID: &str = "0x0000000000000000000000000000000000000001";

/// Errors building an [`X402Gate`].
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error(transparent)]
    Pattern(#[from] RoutePatternError),
    #[error(transparent)]
    Facilitator(#[from] crate::facilitator_client::FacilitatorClientError),
}

#[derive(Clone)]
struct GateConfig {
    pay_to: BchAddress,
    table: RouteTable,
    facilitator: FacilitatorClient,
    base_url: Option<Url>,
    settle_after_execution: bool,
}

/// Payment enforcement for configured routes. Apply with `Router::layer`.
#[derive(Clone)]
pub struct X402Gate {
    config: Arc<GateConfig>,
}

impl X402Gate {
    /// Build a gate receiving payments at `pay_to`, protecting `routes`
    /// (see [`RouteTable::compile`] for the pattern syntax), verified by
    /// the facilitator at `facilitator_url`.
    pub fn new(
        pay_to: BchAddress,
        routes: Vec<(String, RouteConfig)>,
        facilitator_url: &str,
    ) -> Result<Self, GateError> {
        let table = RouteTable::compile(routes)?;
        let facilitator = FacilitatorClient::try_new(facilitator_url)?;
        Ok(X402Gate {
            config: Arc::new(GateConfig {
                pay_to,
                table,
                facilitator,
                base_url: None,
                settle_after_execution: false,
            }),
        })
    }

    /// Base URL used to advertise resource URLs in 402 challenges. Without
    /// it the URL is derived from the request's `Host` header.
    pub fn with_base_url(self, base_url: Url) -> Self {
        let mut config = (*self.config).clone();
        config.base_url = Some(base_url);
        X402Gate {
            config: Arc::new(config),
        }
    }

    /// Also settle the payment after the handler succeeds, attaching the
    /// settlement result as an `X-PAYMENT-RESPONSE` header. Off by
    /// default: verification records the obligation, and settlement is
    /// left to a separate step.
    pub fn with_settlement(self) -> Self {
        let mut config = (*self.config).clone();
        config.settle_after_execution = true;
        X402Gate {
            config: Arc::new(config),
        }
    }
}

impl<S> Layer<S> for X402Gate
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Service = X402GateService;

    fn layer(&self, inner: S) -> Self::Service {
        X402GateService {
            config: self.config.clone(),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// The service produced by [`X402Gate`].
#[derive(Clone)]
pub struct X402GateService {
    config: Arc<GateConfig>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl Service<Request> for X402GateService {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let config = self.config.clone();
        let inner = self.inner.clone();
        Box::pin(handle_request(config, inner, req))
    }
}

async fn handle_request(
    config: Arc<GateConfig>,
    mut inner: BoxCloneSyncService<Request, Response, Infallible>,
    req: Request,
) -> Result<Response, Infallible> {
    let method = req.method().as_str().to_ascii_uppercase();
    let path = req.uri().path().to_string();

    let Some(route) = config.table.matching(&path, &method) else {
        return inner.call(req).await;
    };

    let accepts = vec![config.requirements_for(route, &method, &req)];

    let Some(header) = req.headers().get("X-PAYMENT") else {
        tracing::debug!(%path, "challenging unpaid request");
        return Ok(payment_required(
            "X-PAYMENT header is required".to_string(),
            &accepts,
            None,
        ));
    };

    let payment = match parse_payment_header(header.as_bytes()) {
        Ok(payment) => payment,
        Err(detail) => {
            tracing::debug!(%path, %detail, "malformed payment header");
            return Ok(payment_required(detail, &accepts, None));
        }
    };

    let Some(selected) = accepts
        .iter()
        .find(|requirements| {
            requirements.scheme == payment.scheme && requirements.network == payment.network
        })
        .cloned()
    else {
        return Ok(payment_required(
            "Unable to find matching payment requirements".to_string(),
            &accepts,
            None,
        ));
    };

    let verify_request = VerifyRequest {
        x402_version: X402Version::V1,
        payment_payload: payment,
        payment_requirements: selected,
    };

    match config.facilitator.verify(&verify_request).await {
        Ok(VerifyResponse::Valid { payer, .. }) => {
            tracing::debug!(%payer, %path, "payment verified");
            let mut response = inner.call(req).await?;
            response.headers_mut().insert(
                "Access-Control-Expose-Headers",
                HeaderValue::from_static("X-PAYMENT-RESPONSE"),
            );
            if config.settle_after_execution && response.status().is_success() {
                settle_and_attach(&config, &verify_request, &mut response).await;
            }
            Ok(response)
        }
        Ok(VerifyResponse::Invalid { reason, payer }) => {
            tracing::info!(reason = %reason, payer = ?payer, %path, "payment rejected");
            Ok(payment_required(
                reason.to_string(),
                &accepts,
                payer.map(|p| p.to_string()),
            ))
        }
        Err(error) => {
            tracing::warn!(error = %error, %path, "facilitator unreachable");
            Ok(payment_required(error.to_string(), &accepts, None))
        }
    }
}

/// Settlement is best-effort here: the verified debit already records the
/// obligation, so a settlement hiccup is logged and the response still
/// served.
async fn settle_and_attach(
    config: &GateConfig,
    verify_request: &VerifyRequest,
    response: &mut Response,
) {
    match config.facilitator.settle(verify_request).await {
        Ok(settlement) if settlement.success => {
            if let Ok(json) = serde_json::to_string(&settlement)
                && let Ok(value) = HeaderValue::from_str(&json)
            {
                response.headers_mut().insert("X-PAYMENT-RESPONSE", value);
            }
        }
        Ok(settlement) => {
            tracing::warn!(reason = ?settlement.error_reason, "settlement rejected");
        }
        Err(error) => {
            tracing::warn!(error = %error, "settlement call failed");
        }
    }
}

impl GateConfig {
    fn requirements_for(
        &self,
        route: &RouteConfig,
        method: &str,
        req: &Request,
    ) -> PaymentRequirements {
        PaymentRequirements {
            scheme: x402_bch::types::Scheme::Utxo,
            network: route.network,
            min_amount_required: Some(route.price_sat),
            resource: self.resource_url(req),
            description: route.description.clone(),
            mime_type: route.mime_type.clone(),
            output_schema: Some(json!({
                "input": {
                    "type": "http",
                    "method": method,
                    "discoverable": route.discoverable,
                }
            })),
            pay_to: self.pay_to.clone(),
            max_timeout_seconds: route.max_timeout_seconds,
            asset: BCH_ASSET_ID.to_string(),
            extra: Some(json!({})),
        }
    }

    fn resource_url(&self, req: &Request) -> Url {
        if let Some(base) = &self.base_url {
            let mut url = base.clone();
            url.set_path(req.uri().path());
            return url;
        }
        let host = req
            .headers()
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("localhost");
        format!("http://{}{}", host, req.uri().path())
            .parse()
            .unwrap_or_else(|_| "http://localhost/".parse().expect("static URL"))
    }
}

/// The BCH `X-PAYMENT` header is a raw JSON string. All required fields
/// must parse or the header is treated as malformed.
fn parse_payment_header(bytes: &[u8]) -> Result<PaymentPayload, String> {
    let text =
        std::str::from_utf8(bytes).map_err(|_| "X-PAYMENT header is not UTF-8".to_string())?;
    serde_json::from_str::<PaymentPayload>(text)
        .map_err(|e| format!("Invalid or malformed payment header: {e}"))
}

fn payment_required(
    error: String,
    accepts: &[PaymentRequirements],
    payer: Option<String>,
) -> Response {
    let body = PaymentRequiredResponse {
        x402_version: X402Version::V1,
        error,
        accepts: accepts.to_vec(),
        payer,
    };
    let bytes = serde_json::to_vec(&body).expect("serialization failed");
    Response::builder()
        .status(StatusCode::PAYMENT_REQUIRED)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("Fail to construct response")
}
