//! Type definitions for the BCH flavor of the x402 protocol.
//!
//! The key objects are [`PaymentPayload`], [`PaymentRequirements`],
//! [`VerifyResponse`], and [`SettleResponse`], which encode payment intent,
//! authorization, and the result of verification/settlement. The wire format
//! is JSON and matches the JavaScript client and resource-server SDKs: the
//! `X-PAYMENT` header carries a raw JSON string, amounts are integer
//! satoshis, and signatures are base64-encoded 65-byte compact recoverable
//! ECDSA over the JSON serialization of the authorization object.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::{Debug, Display};
use std::str::FromStr;
use std::time::SystemTime;
use url::Url;

use crate::network::Network;

/// Represents the protocol version. Currently only version 1 is supported.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum X402Version {
    /// Version `1`.
    #[default]
    V1,
}

impl Serialize for X402Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            X402Version::V1 => serializer.serialize_u8(1),
        }
    }
}

impl Display for X402Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            X402Version::V1 => write!(f, "1"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unsupported x402Version: {0}")]
pub struct X402VersionError(pub u8);

impl TryFrom<u8> for X402Version {
    type Error = X402VersionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(X402Version::V1),
            _ => Err(X402VersionError(value)),
        }
    }
}

impl<'de> Deserialize<'de> for X402Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let num = u8::deserialize(deserializer)?;
        X402Version::try_from(num).map_err(serde::de::Error::custom)
    }
}

/// Enumerates payment schemes. BCH payments use the `utxo` scheme, where
/// repeated calls are debited against a referenced on-chain output. The
/// standard x402 `exact` scheme is recognized so foreign payloads parse and
/// are rejected with a scheme-mismatch verdict rather than a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Utxo,
    Exact,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scheme::Utxo => "utxo",
            Scheme::Exact => "exact",
        };
        write!(f, "{}", s)
    }
}

/// A Bitcoin Cash address in cashaddr format, e.g.
/// `bitcoincash:qz9s2mccqamzppfq708cyfde5ejgmsr9hy7r3unmkk`.
///
/// The original string is preserved byte-for-byte: the signed message is the
/// JSON serialization of the authorization object, so re-serializing an
/// address must reproduce exactly what the payer signed. Full checksum
/// validation happens in the signature verifier; this type only enforces
/// shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BchAddress(String);

static CASHADDR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(bitcoincash|bchtest):[a-z0-9]{42}$").expect("Invalid cashaddr regex")
});

#[derive(Debug, thiserror::Error)]
#[error("Invalid BCH address: {0}")]
pub struct BchAddressError(pub String);

impl BchAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The cashaddr prefix, `bitcoincash` or `bchtest`.
    pub fn prefix(&self) -> &str {
        self.0.split(':').next().unwrap_or("")
    }
}

impl FromStr for BchAddress {
    type Err = BchAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if CASHADDR_REGEX.is_match(s) {
            Ok(BchAddress(s.to_string()))
        } else {
            Err(BchAddressError(s.to_string()))
        }
    }
}

impl TryFrom<&str> for BchAddress {
    type Error = BchAddressError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_str(value)
    }
}

impl Display for BchAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for BchAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for BchAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        BchAddress::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A transaction id: 64 hex characters, preserved byte-for-byte for the same
/// reason as [`BchAddress`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxId(String);

static TXID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{64}$").expect("Invalid txid regex"));

#[derive(Debug, thiserror::Error)]
#[error("Invalid transaction id: {0}")]
pub struct TxIdError(pub String);

impl TxId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TxId {
    type Err = TxIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if TXID_REGEX.is_match(s) {
            Ok(TxId(s.to_string()))
        } else {
            Err(TxIdError(s.to_string()))
        }
    }
}

impl Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TxId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TxId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        TxId::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// An amount in satoshis, serialized as a JSON number.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Satoshis(pub u64);

impl Satoshis {
    pub fn checked_sub(self, rhs: Satoshis) -> Option<Satoshis> {
        self.0.checked_sub(rhs.0).map(Satoshis)
    }

    pub fn checked_add(self, rhs: Satoshis) -> Option<Satoshis> {
        self.0.checked_add(rhs.0).map(Satoshis)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for Satoshis {
    fn from(value: u64) -> Self {
        Satoshis(value)
    }
}

impl Display for Satoshis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 65-byte compact recoverable ECDSA signature over a Bitcoin signed
/// message, base64-encoded on the wire. This is the format produced by
/// `signMessageWithPrivKey` in the BCH JavaScript tooling: one header byte
/// (27-34, encoding the recovery id and key compression) followed by the
/// 64-byte compact signature.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct MessageSignature(pub [u8; 65]);

impl Debug for MessageSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageSignature({})", b64.encode(self.0))
    }
}

impl Display for MessageSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", b64.encode(self.0))
    }
}

impl From<[u8; 65]> for MessageSignature {
    fn from(bytes: [u8; 65]) -> Self {
        MessageSignature(bytes)
    }
}

impl Serialize for MessageSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&b64.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for MessageSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = b64
            .decode(&s)
            .map_err(|_| serde::de::Error::custom("Failed to decode base64 signature"))?;
        let array: [u8; 65] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Signature must be exactly 65 bytes"))?;
        Ok(MessageSignature(array))
    }
}

/// A Unix timestamp in seconds, serialized as a stringified integer to avoid
/// precision loss in JSON consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnixTimestamp(pub u64);

impl UnixTimestamp {
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        UnixTimestamp(secs)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let ts = s
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("timestamp must be a non-negative integer"))?;
        Ok(UnixTimestamp(ts))
    }
}

/// The ledger key identifying one on-chain output: `"{txid}:{vout}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UtxoId(String);

impl UtxoId {
    pub fn new(txid: &TxId, vout: u32) -> Self {
        UtxoId(format!("{}:{}", txid, vout))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UtxoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The payer-signed statement committing a specific UTXO and amount to a
/// specific payee.
///
/// Field order is load-bearing: the signed message is the compact JSON
/// serialization of this struct, fields in declaration order, matching
/// `JSON.stringify` in the JavaScript client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtxoAuthorization {
    /// The payer's address; the signature must recover to it.
    pub from: BchAddress,
    /// The payee named by the payment requirements.
    pub to: BchAddress,
    /// The charge for this call, in satoshis.
    pub value: Satoshis,
    /// Transaction id of the UTXO being debited against.
    pub txid: TxId,
    /// Output index of the UTXO being debited against.
    pub vout: u32,
    /// The client's claim of the total UTXO size. Advisory only; the chain
    /// oracle is authoritative.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Satoshis>,
}

impl UtxoAuthorization {
    /// The ledger key for the referenced output.
    pub fn utxo_id(&self) -> UtxoId {
        UtxoId::new(&self.txid, self.vout)
    }

    /// The exact message the payer signs: this struct as compact JSON.
    pub fn signing_message(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Signature plus authorization as carried inside a [`PaymentPayload`].
///
/// Both fields are optional at the parse boundary so a submission missing
/// either yields a protocol verdict (`invalid_payload` /
/// `missing_authorization`) instead of an HTTP-level rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<MessageSignature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<UtxoAuthorization>,
}

/// A client-submitted payment: scheme, network, and the signed payload, as
/// carried in the `X-PAYMENT` header (raw JSON string, not base64).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: Network,
    pub payload: UtxoPayload,
}

impl PaymentPayload {
    /// Best-effort payer identity for audit fields on failure verdicts.
    pub fn payer(&self) -> Option<BchAddress> {
        self.payload
            .authorization
            .as_ref()
            .map(|authorization| authorization.from.clone())
    }
}

/// Requirements offered by a resource server for one protected route.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: Scheme,
    pub network: Network,
    /// The per-call charge in satoshis. When absent, the facilitator
    /// charges its configured maximum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_amount_required: Option<Satoshis>,
    pub resource: Url,
    pub description: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    pub pay_to: BchAddress,
    pub max_timeout_seconds: u64,
    /// Opaque asset identifier carried for x402 compatibility.
    pub asset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Body of `POST /facilitator/verify` and `POST /facilitator/settle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(default)]
    pub x402_version: X402Version,
    pub payment_payload: PaymentPayload,
    pub payment_requirements: PaymentRequirements,
}

/// Settlement takes the same request shape as verification.
pub type SettleRequest = VerifyRequest;

/// Reason codes surfaced to callers on failed verification or settlement.
/// The serialized strings are the wire vocabulary; they never carry stack
/// traces or internal error detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum FacilitatorErrorReason {
    /// Network in the payload or requirements didn't match the
    /// facilitator's network.
    #[error("invalid_network")]
    #[serde(rename = "invalid_network")]
    InvalidNetwork,
    /// Scheme in the payload or requirements wasn't `utxo`.
    #[error("invalid_scheme")]
    #[serde(rename = "invalid_scheme")]
    InvalidScheme,
    /// The payload was missing its signature or otherwise malformed.
    #[error("invalid_payload")]
    #[serde(rename = "invalid_payload")]
    InvalidPayload,
    /// The payload carried no authorization object.
    #[error("missing_authorization")]
    #[serde(rename = "missing_authorization")]
    MissingAuthorization,
    /// The signature did not verify against `authorization.from` for the
    /// canonical authorization message.
    #[error("invalid_exact_bch_payload_signature")]
    #[serde(rename = "invalid_exact_bch_payload_signature")]
    InvalidSignature,
    /// The referenced UTXO's remaining balance cannot cover the charge.
    #[error("insufficient_utxo_balance")]
    #[serde(rename = "insufficient_utxo_balance")]
    InsufficientUtxoBalance,
    /// The ledger store or chain oracle failed during the debit.
    #[error("unexpected_utxo_validation_error")]
    #[serde(rename = "unexpected_utxo_validation_error")]
    UnexpectedUtxoValidationError,
    /// Catch-all for internal verification faults.
    #[error("unexpected_verify_error")]
    #[serde(rename = "unexpected_verify_error")]
    UnexpectedVerifyError,
    /// The operator wallet cannot cover the authorized amount.
    #[error("insufficient_funds")]
    #[serde(rename = "insufficient_funds")]
    InsufficientFunds,
    /// Broadcast returned no transaction id.
    #[error("invalid_transaction_state")]
    #[serde(rename = "invalid_transaction_state")]
    InvalidTransactionState,
    /// Catch-all for internal settlement faults.
    #[error("unexpected_settle_error")]
    #[serde(rename = "unexpected_settle_error")]
    UnexpectedSettleError,
}

/// Serde helpers for payer fields that appear as `""` on the wire when the
/// payer could not be determined.
pub(crate) mod address_or_empty {
    use super::BchAddress;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(
        value: &Option<BchAddress>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(address) => serializer.serialize_str(address.as_str()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<BchAddress>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        match s.as_deref() {
            None | Some("") => Ok(None),
            Some(raw) => BchAddress::from_str(raw)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Result returned by the facilitator after verifying a [`PaymentPayload`]
/// against [`PaymentRequirements`].
#[derive(Debug, Clone)]
pub enum VerifyResponse {
    /// The payload passed all checks and the debit was recorded.
    Valid { payer: BchAddress, utxo_id: UtxoId },
    /// The payload was rejected for the given reason. The payer is reported
    /// when it could be extracted, for audit.
    Invalid {
        reason: FacilitatorErrorReason,
        payer: Option<BchAddress>,
    },
}

impl VerifyResponse {
    pub fn valid(payer: BchAddress, utxo_id: UtxoId) -> Self {
        VerifyResponse::Valid { payer, utxo_id }
    }

    pub fn invalid(payer: Option<BchAddress>, reason: FacilitatorErrorReason) -> Self {
        VerifyResponse::Invalid { reason, payer }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResponse::Valid { .. })
    }
}

impl Serialize for VerifyResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            VerifyResponse::Valid { payer, utxo_id } => {
                let mut s = serializer.serialize_struct("VerifyResponse", 3)?;
                s.serialize_field("isValid", &true)?;
                s.serialize_field("payer", payer)?;
                s.serialize_field("utxoId", utxo_id)?;
                s.end()
            }
            VerifyResponse::Invalid { reason, payer } => {
                let mut s = serializer.serialize_struct("VerifyResponse", 3)?;
                s.serialize_field("isValid", &false)?;
                s.serialize_field("invalidReason", reason)?;
                match payer {
                    Some(payer) => s.serialize_field("payer", payer)?,
                    None => s.serialize_field("payer", "")?,
                }
                s.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for VerifyResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            is_valid: bool,
            #[serde(default, with = "address_or_empty")]
            payer: Option<BchAddress>,
            #[serde(default)]
            invalid_reason: Option<FacilitatorErrorReason>,
            #[serde(default)]
            utxo_id: Option<UtxoId>,
        }

        let raw = Raw::deserialize(deserializer)?;
        match (raw.is_valid, raw.invalid_reason) {
            (true, None) => {
                let payer = raw
                    .payer
                    .ok_or_else(|| serde::de::Error::custom("valid response without payer"))?;
                let utxo_id = raw
                    .utxo_id
                    .ok_or_else(|| serde::de::Error::custom("valid response without utxoId"))?;
                Ok(VerifyResponse::Valid { payer, utxo_id })
            }
            (false, Some(reason)) => Ok(VerifyResponse::Invalid {
                reason,
                payer: raw.payer,
            }),
            (true, Some(_)) => Err(serde::de::Error::custom(
                "`invalidReason` must be absent when `isValid` is true",
            )),
            (false, None) => Err(serde::de::Error::custom(
                "`invalidReason` must be present when `isValid` is false",
            )),
        }
    }
}

/// Result returned by the facilitator after attempting settlement.
/// `transaction` is the broadcast transaction id on success and `""` on
/// failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<FacilitatorErrorReason>,
    pub transaction: String,
    pub network: Network,
    #[serde(default, with = "address_or_empty")]
    pub payer: Option<BchAddress>,
}

impl SettleResponse {
    pub fn failure(
        network: Network,
        payer: Option<BchAddress>,
        reason: FacilitatorErrorReason,
    ) -> Self {
        SettleResponse {
            success: false,
            error_reason: Some(reason),
            transaction: String::new(),
            network,
            payer,
        }
    }
}

/// The 402 challenge body returned by a payment-gated endpoint: an error
/// message and the list of acceptable [`PaymentRequirements`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredResponse {
    pub x402_version: X402Version,
    pub error: String,
    pub accepts: Vec<PaymentRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: Network,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKindsResponse {
    pub kinds: Vec<SupportedPaymentKind>,
}

/// A simple error structure returned on malformed requests.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
}

/// One persisted ledger record per spent UTXO, keyed by
/// `"{txid}:{vout}"`. Created on first verification and only ever updated
/// thereafter; `remainingBalanceSat` decreases monotonically and
/// `remainingBalanceSat + totalDebitedSat == transactionValueSat` holds
/// after every successful debit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoLedgerRecord {
    pub utxo_id: UtxoId,
    pub txid: TxId,
    pub vout: u32,
    pub payer_address: BchAddress,
    pub receiver_address: BchAddress,
    /// Total size of the UTXO, fixed at first sight, authoritative from the
    /// chain oracle.
    pub transaction_value_sat: Satoshis,
    pub remaining_balance_sat: Satoshis,
    pub total_debited_sat: Satoshis,
    pub first_seen: UnixTimestamp,
    pub last_updated: UnixTimestamp,
    pub last_checked: UnixTimestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    // Payload fixture lifted from a live exchange between the JavaScript
    // client and facilitator.
    const PAYMENT_PAYLOAD_JSON: &str = r#"{
        "x402Version": 1,
        "scheme": "utxo",
        "network": "bch",
        "payload": {
            "signature": "IO7/1zZZV3qhpaaL29Z3ORc6osYKNLJvCvMg53Gf7uyNTtv4kIzBYLXu+Nl0459EzFL2zGHfFHU6AHO6MZ+Za4A=",
            "authorization": {
                "from": "bitcoincash:qz9s2mccqamzppfq708cyfde5ejgmsr9hy7r3unmkk",
                "to": "bitcoincash:qqlrzp23w08434twmvr4fxw672whkjy0py26r63g3d",
                "value": 1000,
                "txid": "b74dcfc839eb3693be811be64e563171d83e191388fdda900f2d3b952df01ba7",
                "vout": 0,
                "amount": 2000
            }
        }
    }"#;

    #[test]
    fn test_payment_payload_parses() {
        let payload: PaymentPayload = serde_json::from_str(PAYMENT_PAYLOAD_JSON).unwrap();
        assert_eq!(payload.scheme, Scheme::Utxo);
        assert_eq!(payload.network, Network::Bch);
        let authorization = payload.payload.authorization.unwrap();
        assert_eq!(authorization.value, Satoshis(1000));
        assert_eq!(authorization.vout, 0);
        assert_eq!(authorization.amount, Some(Satoshis(2000)));
        assert_eq!(
            authorization.utxo_id().as_str(),
            "b74dcfc839eb3693be811be64e563171d83e191388fdda900f2d3b952df01ba7:0"
        );
    }

    #[test]
    fn test_signing_message_field_order() {
        let payload: PaymentPayload = serde_json::from_str(PAYMENT_PAYLOAD_JSON).unwrap();
        let authorization = payload.payload.authorization.unwrap();
        let message = authorization.signing_message().unwrap();
        // Must match JSON.stringify of the client's authorization object:
        // insertion order, no whitespace.
        assert!(message.starts_with(
            "{\"from\":\"bitcoincash:qz9s2mccqamzppfq708cyfde5ejgmsr9hy7r3unmkk\",\"to\":"
        ));
        assert!(message.ends_with("\"vout\":0,\"amount\":2000}"));
        let from_idx = message.find("\"from\"").unwrap();
        let to_idx = message.find("\"to\"").unwrap();
        let value_idx = message.find("\"value\"").unwrap();
        let txid_idx = message.find("\"txid\"").unwrap();
        assert!(from_idx < to_idx && to_idx < value_idx && value_idx < txid_idx);
    }

    #[test]
    fn test_payload_without_authorization_still_parses() {
        let json = r#"{
            "x402Version": 1,
            "scheme": "utxo",
            "network": "bch",
            "payload": {}
        }"#;
        let payload: PaymentPayload = serde_json::from_str(json).unwrap();
        assert!(payload.payload.authorization.is_none());
        assert!(payload.payload.signature.is_none());
        assert!(payload.payer().is_none());
    }

    #[test]
    fn test_bch_address_validation() {
        assert!(
            "bitcoincash:qz9s2mccqamzppfq708cyfde5ejgmsr9hy7r3unmkk"
                .parse::<BchAddress>()
                .is_ok()
        );
        assert!("bchtest:qz9s2mccqamzppfq708cyfde5ejgmsr9hy7r3unmkk"
            .parse::<BchAddress>()
            .is_ok());
        assert!("qz9s2mccqamzppfq708cyfde5ejgmsr9hy7r3unmkk"
            .parse::<BchAddress>()
            .is_err());
        assert!("bitcoincash:short".parse::<BchAddress>().is_err());
        assert!("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"
            .parse::<BchAddress>()
            .is_err());
    }

    #[test]
    fn test_txid_validation() {
        assert!(
            "b74dcfc839eb3693be811be64e563171d83e191388fdda900f2d3b952df01ba7"
                .parse::<TxId>()
                .is_ok()
        );
        assert!("b74dcfc8".parse::<TxId>().is_err());
        assert!(
            "z74dcfc839eb3693be811be64e563171d83e191388fdda900f2d3b952df01ba7"
                .parse::<TxId>()
                .is_err()
        );
    }

    #[test]
    fn test_verify_response_valid_shape() {
        let payer: BchAddress = "bitcoincash:qz9s2mccqamzppfq708cyfde5ejgmsr9hy7r3unmkk"
            .parse()
            .unwrap();
        let txid: TxId = "b74dcfc839eb3693be811be64e563171d83e191388fdda900f2d3b952df01ba7"
            .parse()
            .unwrap();
        let response = VerifyResponse::valid(payer, UtxoId::new(&txid, 0));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["isValid"], serde_json::json!(true));
        assert_eq!(
            json["payer"],
            serde_json::json!("bitcoincash:qz9s2mccqamzppfq708cyfde5ejgmsr9hy7r3unmkk")
        );
        assert!(json.get("invalidReason").is_none());
        let roundtrip: VerifyResponse = serde_json::from_value(json).unwrap();
        assert!(roundtrip.is_valid());
    }

    #[test]
    fn test_verify_response_invalid_shape() {
        let response = VerifyResponse::invalid(None, FacilitatorErrorReason::InvalidNetwork);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["isValid"], serde_json::json!(false));
        assert_eq!(json["invalidReason"], serde_json::json!("invalid_network"));
        // Unknown payer is reported as an empty string, like the reference.
        assert_eq!(json["payer"], serde_json::json!(""));
    }

    #[test]
    fn test_reason_codes_wire_strings() {
        let cases = [
            (FacilitatorErrorReason::InvalidNetwork, "invalid_network"),
            (FacilitatorErrorReason::InvalidScheme, "invalid_scheme"),
            (FacilitatorErrorReason::InvalidPayload, "invalid_payload"),
            (
                FacilitatorErrorReason::MissingAuthorization,
                "missing_authorization",
            ),
            (
                FacilitatorErrorReason::InvalidSignature,
                "invalid_exact_bch_payload_signature",
            ),
            (
                FacilitatorErrorReason::InsufficientUtxoBalance,
                "insufficient_utxo_balance",
            ),
            (
                FacilitatorErrorReason::UnexpectedUtxoValidationError,
                "unexpected_utxo_validation_error",
            ),
            (
                FacilitatorErrorReason::UnexpectedVerifyError,
                "unexpected_verify_error",
            ),
            (
                FacilitatorErrorReason::InsufficientFunds,
                "insufficient_funds",
            ),
            (
                FacilitatorErrorReason::InvalidTransactionState,
                "invalid_transaction_state",
            ),
            (
                FacilitatorErrorReason::UnexpectedSettleError,
                "unexpected_settle_error",
            ),
        ];
        for (reason, expected) in cases {
            assert_eq!(
                serde_json::to_value(reason).unwrap(),
                serde_json::json!(expected)
            );
            assert_eq!(reason.to_string(), expected);
        }
    }

    #[test]
    fn test_settle_response_failure_shape() {
        let response = SettleResponse::failure(
            Network::Bch,
            None,
            FacilitatorErrorReason::InsufficientFunds,
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], serde_json::json!(false));
        assert_eq!(json["transaction"], serde_json::json!(""));
        assert_eq!(json["errorReason"], serde_json::json!("insufficient_funds"));
        assert_eq!(json["payer"], serde_json::json!(""));
    }

    #[test]
    fn test_ledger_record_roundtrip() {
        let json = r#"{
            "utxoId": "b74dcfc839eb3693be811be64e563171d83e191388fdda900f2d3b952df01ba7:0",
            "txid": "b74dcfc839eb3693be811be64e563171d83e191388fdda900f2d3b952df01ba7",
            "vout": 0,
            "payerAddress": "bitcoincash:qz9s2mccqamzppfq708cyfde5ejgmsr9hy7r3unmkk",
            "receiverAddress": "bitcoincash:qqlrzp23w08434twmvr4fxw672whkjy0py26r63g3d",
            "transactionValueSat": 5000,
            "remainingBalanceSat": 4000,
            "totalDebitedSat": 1000,
            "firstSeen": "1730000000",
            "lastUpdated": "1730000000",
            "lastChecked": "1730000000"
        }"#;
        let record: UtxoLedgerRecord = serde_json::from_str(json).unwrap();
        assert_eq!(
            record
                .remaining_balance_sat
                .checked_add(record.total_debited_sat),
            Some(record.transaction_value_sat)
        );
        let reserialized = serde_json::to_string(&record).unwrap();
        let roundtrip: UtxoLedgerRecord = serde_json::from_str(&reserialized).unwrap();
        assert_eq!(record, roundtrip);
    }

    #[test]
    fn test_x402_version_serializes_as_number() {
        assert_eq!(serde_json::to_string(&X402Version::V1).unwrap(), "1");
        assert!(serde_json::from_str::<X402Version>("2").is_err());
    }
}
