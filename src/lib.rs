//! Rust implementation of the x402 payment protocol for Bitcoin Cash.
//!
//! The x402 protocol enables HTTP-native payments using the
//! `402 Payment Required` status code. On BCH there is no token-approval
//! primitive to lean on, so this crate implements the `utxo` scheme: a
//! client funds a single on-chain output once, then spends it down across
//! many HTTP calls. The facilitator keeps a durable debit ledger per UTXO
//! and guarantees that no sequence of calls, concurrent ones included, is
//! ever charged beyond what the output holds.
//!
//! # Roles
//!
//! - **Facilitator**: verifies payment authorizations and settles them
//!   on-chain. See [`facilitator`] for the trait and [`facilitator_local`]
//!   for the implementation served by this crate's binary.
//! - **Seller**: a payment-gated service. Use the `x402-bch-axum` crate to
//!   challenge unpaid requests and verify `X-PAYMENT` headers.
//! - **Buyer/Client**: constructs and signs payment authorizations. Use
//!   the `x402-bch-reqwest` crate for automatic 402 handling.
//!
//! # Modules
//!
//! - [`chain`] — UTXO lookup, operator balance, and broadcast via the
//!   wallet-node REST service.
//! - [`config`] — server configuration from file and environment.
//! - [`facilitator`] — the [`Facilitator`](facilitator::Facilitator) trait.
//! - [`facilitator_local`] — verification and settlement engines.
//! - [`handlers`] — the facilitator's HTTP endpoints.
//! - [`ledger`] — the per-UTXO debit ledger.
//! - [`network`] — BCH network identifiers.
//! - [`signature`] — Bitcoin signed-message verification and signing.
//! - [`store`] — durable ledger-record storage.
//! - [`types`] — protocol wire types.

pub mod chain;
pub mod config;
pub mod facilitator;
pub mod facilitator_local;
pub mod handlers;
pub mod ledger;
pub mod network;
pub mod shutdown;
pub mod signature;
pub mod store;
pub mod telemetry;
pub mod types;
