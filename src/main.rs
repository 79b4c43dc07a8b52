//! x402 BCH facilitator HTTP entrypoint.
//!
//! Launches an axum server exposing the facilitator interface for payment
//! verification and settlement against Bitcoin Cash UTXOs.
//!
//! Endpoints:
//! - `GET /facilitator/supported` – supported payment kinds
//! - `POST /facilitator/verify` – verify a payment payload against requirements
//! - `POST /facilitator/settle` – settle an accepted payment on-chain
//! - `GET /health` – liveness probe
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control the binding address
//! - `NETWORK`, `LEDGER_DB_PATH`, `WALLET_URL`, `WALLET_API_TOKEN`,
//!   `MAX_CHARGE_SAT`, `MIN_CONFIRMATIONS` configure the engine

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;

use x402_bch::chain::BchRestProvider;
use x402_bch::config::Config;
use x402_bch::facilitator_local::FacilitatorLocal;
use x402_bch::handlers;
use x402_bch::shutdown::Shutdown;
use x402_bch::signature::BchMessageVerifier;
use x402_bch::store::SledLedgerStore;
use x402_bch::telemetry::Telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env variables
    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Config::load()?;

    let store = SledLedgerStore::open(config.db_path())?;
    let chain = BchRestProvider::new(
        config.wallet_url().clone(),
        config.wallet_api_token().map(ToOwned::to_owned),
    );
    let facilitator = FacilitatorLocal::new(
        config.network(),
        store,
        chain,
        BchMessageVerifier::new(),
    )
    .with_max_charge(config.max_charge_sat())
    .with_min_confirmations(config.min_confirmations());
    let axum_state = Arc::new(facilitator);

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(axum_state))
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e))?;

    let shutdown = Shutdown::install()?;
    let cancellation_token = shutdown.token();
    let graceful_shutdown = async move { cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(graceful_shutdown)
        .await?;

    Ok(())
}
