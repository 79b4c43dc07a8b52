//! Core trait defining the verification and settlement interface for BCH
//! x402 facilitators.
//!
//! Implementors validate incoming payment payloads against requirements
//! ([`Facilitator::verify`]) and realize accepted payments on-chain
//! ([`Facilitator::settle`]). Both operations return verdict objects rather
//! than errors: a facilitator converts every internal fault into an
//! `unexpected_*` reason code, so nothing propagates to the transport
//! layer.

use std::sync::Arc;

use crate::types::{
    SettleRequest, SettleResponse, SupportedPaymentKindsResponse, VerifyRequest, VerifyResponse,
};

/// The asynchronous interface of a BCH x402 facilitator.
pub trait Facilitator {
    /// Verify a proposed payment payload against its requirements and, on
    /// success, record the debit against the referenced UTXO.
    fn verify(&self, request: &VerifyRequest) -> impl Future<Output = VerifyResponse> + Send;

    /// Re-verify and, if valid, pay the resource owner on-chain.
    fn settle(&self, request: &SettleRequest) -> impl Future<Output = SettleResponse> + Send;

    /// The payment kinds (version/scheme/network) this facilitator accepts.
    fn supported(&self) -> SupportedPaymentKindsResponse;
}

impl<T: Facilitator> Facilitator for Arc<T> {
    fn verify(&self, request: &VerifyRequest) -> impl Future<Output = VerifyResponse> + Send {
        self.as_ref().verify(request)
    }

    fn settle(&self, request: &SettleRequest) -> impl Future<Output = SettleResponse> + Send {
        self.as_ref().settle(request)
    }

    fn supported(&self) -> SupportedPaymentKindsResponse {
        self.as_ref().supported()
    }
}
