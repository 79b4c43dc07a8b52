//! Facilitator implementation for BCH x402 payments backed by the UTXO
//! debit ledger.
//!
//! [`FacilitatorLocal`] validates payment payloads (network, scheme,
//! payload shape, signed-message authenticity) and charges the referenced
//! UTXO through [`UtxoDebitLedger`]. Settlement re-runs the whole
//! verification and then pays the resource owner from the operator wallet.
//!
//! Both public operations return verdict objects; every internal fault is
//! folded into a reason code from the wire vocabulary so nothing escapes to
//! the HTTP layer.

use std::sync::Arc;
use tracing::instrument;

use crate::chain::{ChainError, ChainProvider, TxOutput};
use crate::facilitator::Facilitator;
use crate::ledger::{DebitError, DebitOutcome, UtxoDebitLedger};
use crate::network::Network;
use crate::signature::MessageVerifier;
use crate::store::LedgerStore;
use crate::types::{
    BchAddress, FacilitatorErrorReason, PaymentPayload, PaymentRequirements, Satoshis, Scheme,
    SettleRequest, SettleResponse, SupportedPaymentKind, SupportedPaymentKindsResponse, UtxoId,
    VerifyRequest, VerifyResponse, X402Version,
};

/// Charged when the requirements omit `minAmountRequired`.
pub const DEFAULT_MAX_CHARGE_SAT: Satoshis = Satoshis(1000);

/// All the ways a payment payload can fail verification.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// Payload or requirements name a network other than the facilitator's.
    #[error("Incompatible network (payload: {payload}, requirements: {requirements})")]
    IncompatibleNetwork {
        payload: Network,
        requirements: Network,
    },
    /// Payload or requirements name a scheme other than `utxo`.
    #[error("Incompatible scheme (payload: {payload}, requirements: {requirements})")]
    IncompatibleScheme {
        payload: Scheme,
        requirements: Scheme,
    },
    /// The payload carries no signature.
    #[error("Payment payload carries no signature")]
    MissingSignature,
    /// The payload carries no authorization object.
    #[error("Payment payload carries no authorization")]
    MissingAuthorization,
    /// The signature did not verify against `authorization.from`.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    /// The debit against the referenced UTXO failed.
    #[error(transparent)]
    Debit(#[from] DebitError),
    /// The authorization could not be re-serialized to the signed message.
    #[error("Failed to canonicalize authorization: {0}")]
    Canonicalize(#[from] serde_json::Error),
}

impl PaymentError {
    fn reason(&self) -> FacilitatorErrorReason {
        match self {
            PaymentError::IncompatibleNetwork { .. } => FacilitatorErrorReason::InvalidNetwork,
            PaymentError::IncompatibleScheme { .. } => FacilitatorErrorReason::InvalidScheme,
            PaymentError::MissingSignature => FacilitatorErrorReason::InvalidPayload,
            PaymentError::MissingAuthorization => FacilitatorErrorReason::MissingAuthorization,
            PaymentError::InvalidSignature(_) => FacilitatorErrorReason::InvalidSignature,
            PaymentError::Debit(DebitError::InsufficientBalance { .. }) => {
                FacilitatorErrorReason::InsufficientUtxoBalance
            }
            PaymentError::Debit(_) => FacilitatorErrorReason::UnexpectedUtxoValidationError,
            PaymentError::Canonicalize(_) => FacilitatorErrorReason::UnexpectedVerifyError,
        }
    }
}

/// All the ways settlement can fail beyond verification itself.
#[derive(Debug, thiserror::Error)]
enum SettlementError {
    #[error(transparent)]
    Payment(#[from] PaymentError),
    /// The operator wallet cannot cover the authorized amount.
    #[error("Insufficient operator funds: {balance} sat held, {required} sat required")]
    InsufficientFunds {
        balance: Satoshis,
        required: Satoshis,
    },
    /// The wallet node acknowledged the broadcast but returned no
    /// transaction id.
    #[error("Broadcast returned no transaction id")]
    EmptyTransactionId,
    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl SettlementError {
    fn reason(&self) -> FacilitatorErrorReason {
        match self {
            SettlementError::Payment(error) => error.reason(),
            SettlementError::InsufficientFunds { .. } => FacilitatorErrorReason::InsufficientFunds,
            SettlementError::EmptyTransactionId => FacilitatorErrorReason::InvalidTransactionState,
            SettlementError::Chain(_) => FacilitatorErrorReason::UnexpectedSettleError,
        }
    }
}

/// A payment that passed every check; carries what settlement needs.
struct ValidPayment {
    payer: BchAddress,
    value: Satoshis,
    utxo_id: UtxoId,
    outcome: DebitOutcome,
}

/// Local facilitator: verification engine plus settlement engine.
pub struct FacilitatorLocal<S, C, V> {
    network: Network,
    chain: Arc<C>,
    ledger: UtxoDebitLedger<S, Arc<C>>,
    verifier: V,
    max_charge_sat: Satoshis,
    min_confirmations: u32,
}

impl<S, C, V> FacilitatorLocal<S, C, V>
where
    S: LedgerStore,
    C: ChainProvider,
    V: MessageVerifier,
{
    pub fn new(network: Network, store: S, chain: C, verifier: V) -> Self {
        let chain = Arc::new(chain);
        FacilitatorLocal {
            network,
            ledger: UtxoDebitLedger::new(store, chain.clone()),
            chain,
            verifier,
            max_charge_sat: DEFAULT_MAX_CHARGE_SAT,
            min_confirmations: 0,
        }
    }

    /// Charge applied when requirements omit `minAmountRequired`.
    pub fn with_max_charge(mut self, max_charge_sat: Satoshis) -> Self {
        self.max_charge_sat = max_charge_sat;
        self
    }

    /// Confirmation policy knob; logged at settlement, never changes the
    /// verdict.
    pub fn with_min_confirmations(mut self, min_confirmations: u32) -> Self {
        self.min_confirmations = min_confirmations;
        self
    }

    /// Runs the ordered verification checks and, when they all pass,
    /// records the debit. Short-circuits on the first failure.
    async fn assert_valid_payment(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<ValidPayment, PaymentError> {
        if requirements.network != self.network || payload.network != self.network {
            return Err(PaymentError::IncompatibleNetwork {
                payload: payload.network,
                requirements: requirements.network,
            });
        }
        if requirements.scheme != Scheme::Utxo || payload.scheme != Scheme::Utxo {
            return Err(PaymentError::IncompatibleScheme {
                payload: payload.scheme,
                requirements: requirements.scheme,
            });
        }
        let authorization = payload
            .payload
            .authorization
            .as_ref()
            .ok_or(PaymentError::MissingAuthorization)?;
        let signature = payload
            .payload
            .signature
            .as_ref()
            .ok_or(PaymentError::MissingSignature)?;

        let message = authorization.signing_message()?;
        let signed_by_payer = self
            .verifier
            .verify(&authorization.from, signature, &message)
            .map_err(|e| PaymentError::InvalidSignature(e.to_string()))?;
        if !signed_by_payer {
            return Err(PaymentError::InvalidSignature(
                "signature does not recover to payer address".to_string(),
            ));
        }

        let charge = requirements
            .min_amount_required
            .unwrap_or(self.max_charge_sat);
        let outcome = self
            .ledger
            .debit(
                &authorization.txid,
                authorization.vout,
                &authorization.from,
                charge,
            )
            .await?;

        Ok(ValidPayment {
            payer: authorization.from.clone(),
            value: authorization.value,
            utxo_id: authorization.utxo_id(),
            outcome,
        })
    }

    async fn try_settle(&self, request: &SettleRequest) -> Result<SettleResponse, SettlementError> {
        let valid = self
            .assert_valid_payment(&request.payment_payload, &request.payment_requirements)
            .await?;

        // The payout is funded from the operator wallet; the ledger has
        // only established that an obligation of this size exists.
        let balance = self.chain.wallet_balance().await?;
        if balance < valid.value {
            return Err(SettlementError::InsufficientFunds {
                balance,
                required: valid.value,
            });
        }

        let outputs = [TxOutput {
            address: request.payment_requirements.pay_to.clone(),
            amount_sat: valid.value,
        }];
        let transaction = self.chain.send_to(&outputs).await?;
        if transaction.is_empty() {
            return Err(SettlementError::EmptyTransactionId);
        }

        if self.min_confirmations > 0 {
            tracing::debug!(
                min_confirmations = self.min_confirmations,
                transaction = %transaction,
                "settlement reports broadcast; confirmation tracking is left to the operator"
            );
        }
        tracing::info!(
            payer = %valid.payer,
            utxo = %valid.utxo_id,
            amount = %valid.value,
            transaction = %transaction,
            "settled payment"
        );

        Ok(SettleResponse {
            success: true,
            error_reason: None,
            transaction,
            network: self.network,
            payer: Some(valid.payer),
        })
    }
}

impl<S, C, V> Facilitator for FacilitatorLocal<S, C, V>
where
    S: LedgerStore,
    C: ChainProvider,
    V: MessageVerifier,
{
    #[instrument(skip_all, fields(network = %self.network))]
    async fn verify(&self, request: &VerifyRequest) -> VerifyResponse {
        let payer = request.payment_payload.payer();
        match self
            .assert_valid_payment(&request.payment_payload, &request.payment_requirements)
            .await
        {
            Ok(valid) => {
                tracing::info!(
                    payer = %valid.payer,
                    utxo = %valid.utxo_id,
                    first_touch = valid.outcome.first_touch,
                    remaining = %valid.outcome.record.remaining_balance_sat,
                    "payment verified"
                );
                VerifyResponse::valid(valid.payer, valid.utxo_id)
            }
            Err(error) => {
                tracing::warn!(error = %error, payer = ?payer, "verification rejected");
                VerifyResponse::invalid(payer, error.reason())
            }
        }
    }

    #[instrument(skip_all, fields(network = %self.network))]
    async fn settle(&self, request: &SettleRequest) -> SettleResponse {
        let payer = request.payment_payload.payer();
        match self.try_settle(request).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(error = %error, payer = ?payer, "settlement rejected");
                SettleResponse::failure(self.network, payer, error.reason())
            }
        }
    }

    fn supported(&self) -> SupportedPaymentKindsResponse {
        SupportedPaymentKindsResponse {
            kinds: vec![SupportedPaymentKind {
                x402_version: X402Version::V1,
                scheme: Scheme::Utxo,
                network: self.network,
            }],
        }
    }
}
