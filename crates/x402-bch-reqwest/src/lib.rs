//! Transparent x402 BCH payments for `reqwest`.
//!
//! [`UtxoPayments`] is a [`reqwest_middleware::Middleware`] that answers
//! `402 Payment Required` responses automatically: it funds a payment UTXO
//! (or keeps spending the active one until it is exhausted), signs a fresh
//! authorization for the advertised price, attaches it as an `X-PAYMENT`
//! header, and retries the request exactly once.
//!
//! ```rust,no_run
//! use reqwest_middleware::ClientBuilder;
//! use x402_bch::chain::BchRestProvider;
//! use x402_bch::signature::BchSigner;
//! use x402_bch::types::Satoshis;
//! use x402_bch_reqwest::UtxoPayments;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let signer = BchSigner::from_wif("L1eYaneXDDXy8VDig4Arwe8wYHbhtsA5wuQvwsKwhaYeneoZuKG4")?;
//! let wallet = x402_bch_reqwest::WalletFunder(BchRestProvider::new(
//!     "http://localhost:3000".parse()?,
//!     None,
//! ));
//! let client = ClientBuilder::new(reqwest::Client::new())
//!     .with(UtxoPayments::new(signer, wallet).with_payment_amount(Satoshis(2000)))
//!     .build();
//! # Ok(())
//! # }
//! ```

pub mod middleware;

pub use middleware::{
    ClientUtxoState, FundedUtxo, FunderError, UtxoFunder, UtxoPayments, UtxoPaymentsError,
    WalletFunder,
};
