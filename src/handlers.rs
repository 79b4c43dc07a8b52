//! HTTP endpoints implemented by the BCH x402 facilitator.
//!
//! These are the server-side handlers for processing client-submitted
//! payments:
//!
//! - `GET /facilitator/supported` – list supported payment kinds
//! - `POST /facilitator/verify` – verify a payment payload against requirements
//! - `POST /facilitator/settle` – settle an accepted payment on-chain
//! - `GET /health` – liveness probe
//! - `GET /` – service banner
//!
//! Verification and settlement always answer 200 with a verdict object;
//! only a missing or malformed request body yields 400.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::facilitator::Facilitator;
use crate::types::{ErrorResponse, SettleRequest, VerifyRequest};

/// Builds the facilitator's route tree for any [`Facilitator`]
/// implementation.
pub fn routes<F>() -> Router<Arc<F>>
where
    F: Facilitator + Send + Sync + 'static,
{
    Router::new()
        .route("/", get(get_index))
        .route("/health", get(get_health))
        .route("/facilitator/supported", get(get_supported::<F>))
        .route("/facilitator/verify", post(post_verify::<F>))
        .route("/facilitator/settle", post(post_settle::<F>))
}

/// `GET /`: Human-oriented service banner listing the endpoints.
#[instrument(skip_all)]
async fn get_index() -> impl IntoResponse {
    Json(json!({
        "message": "x402 BCH Facilitator",
        "endpoints": {
            "supported": "GET /facilitator/supported",
            "verify": "POST /facilitator/verify",
            "settle": "POST /facilitator/settle",
        }
    }))
}

/// `GET /health`: Liveness probe with service name and version.
#[instrument(skip_all)]
async fn get_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /facilitator/supported`: Lists the payment kinds this facilitator
/// accepts, so clients can configure their payment requests dynamically.
#[instrument(skip_all)]
async fn get_supported<F>(State(facilitator): State<Arc<F>>) -> impl IntoResponse
where
    F: Facilitator + Send + Sync + 'static,
{
    (StatusCode::OK, Json(facilitator.supported()))
}

/// `POST /facilitator/verify`: Facilitator-side verification of a proposed
/// payment. Checks network, scheme, signature, and UTXO balance, and
/// records the debit on success.
#[instrument(skip_all)]
async fn post_verify<F>(
    State(facilitator): State<Arc<F>>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> impl IntoResponse
where
    F: Facilitator + Send + Sync + 'static,
{
    match body {
        Ok(Json(request)) => {
            let response = facilitator.verify(&request).await;
            if !response.is_valid() {
                tracing::warn!(
                    body = %serde_json::to_string(&request)
                        .unwrap_or_else(|_| "<can-not-serialize>".to_string()),
                    "verification failed"
                );
            }
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(rejection) => bad_request(rejection),
    }
}

/// `POST /facilitator/settle`: Re-verifies and, if valid, pays the resource
/// owner on-chain. Typically called after a successful `/verify` step,
/// but never trusts it.
#[instrument(skip_all)]
async fn post_settle<F>(
    State(facilitator): State<Arc<F>>,
    body: Result<Json<SettleRequest>, JsonRejection>,
) -> impl IntoResponse
where
    F: Facilitator + Send + Sync + 'static,
{
    match body {
        Ok(Json(request)) => {
            let response = facilitator.settle(&request).await;
            if !response.success {
                tracing::warn!(
                    reason = ?response.error_reason,
                    "settlement failed"
                );
            }
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(rejection) => bad_request(rejection),
    }
}

fn bad_request(rejection: JsonRejection) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: rejection.body_text(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        SettleResponse, SupportedPaymentKindsResponse, VerifyResponse,
    };
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    struct StubFacilitator;

    impl Facilitator for StubFacilitator {
        async fn verify(&self, request: &VerifyRequest) -> VerifyResponse {
            let payer = request.payment_payload.payer().unwrap();
            let utxo_id = request
                .payment_payload
                .payload
                .authorization
                .as_ref()
                .unwrap()
                .utxo_id();
            VerifyResponse::valid(payer, utxo_id)
        }

        async fn settle(&self, _request: &SettleRequest) -> SettleResponse {
            SettleResponse {
                success: true,
                error_reason: None,
                transaction: "ab".repeat(32),
                network: crate::network::Network::Bch,
                payer: None,
            }
        }

        fn supported(&self) -> SupportedPaymentKindsResponse {
            SupportedPaymentKindsResponse { kinds: vec![] }
        }
    }

    fn app() -> Router {
        routes::<StubFacilitator>().with_state(Arc::new(StubFacilitator))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], env!("CARGO_PKG_NAME"));
    }

    #[tokio::test]
    async fn test_verify_rejects_bodyless_request() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/facilitator/verify")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        // Missing paymentPayload/paymentRequirements is a 400, not a verdict.
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body.get("error").is_some());
    }

    #[tokio::test]
    async fn test_supported_endpoint_shape() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/facilitator/supported")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["kinds"].is_array());
    }
}
