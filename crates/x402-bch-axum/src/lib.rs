//! Axum middleware for enforcing x402 BCH payments on protected routes.
//!
//! [`X402Gate`] wraps a router and challenges unpaid requests to configured
//! routes with `402 Payment Required` plus a machine-readable price list.
//! A request carrying a valid `X-PAYMENT` header (a raw JSON payment
//! payload, verified by a remote facilitator) passes through to the inner
//! handler.
//!
//! ```rust,no_run
//! use axum::{Router, routing::get};
//! use x402_bch_axum::{RouteConfig, X402Gate};
//!
//! let gate = X402Gate::new(
//!     "bitcoincash:qqlrzp23w08434twmvr4fxw672whkjy0py26r63g3d".parse().unwrap(),
//!     vec![("GET /weather".to_string(), RouteConfig::price(1000))],
//!     "http://localhost:4345",
//! )
//! .unwrap();
//!
//! let app: Router = Router::new()
//!     .route("/weather", get(|| async { "sunny" }))
//!     .layer(gate);
//! ```
//!
//! Route patterns use the conventions of the JavaScript middleware this
//! crate is wire-compatible with: an optional HTTP verb (`*` matches any),
//! `*` path wildcards, and `[param]` segment captures. The most specific
//! matching pattern wins. Unmatched routes pass through untouched.

pub mod facilitator_client;
pub mod layer;
pub mod routes;

pub use facilitator_client::{FacilitatorClient, FacilitatorClientError};
pub use layer::{X402Gate, X402GateService};
pub use routes::{RouteConfig, RoutePatternError, RouteTable};
