//! Bitcoin Cash signed-message verification and signing.
//!
//! BCH payment authorizations are signed with the classic Bitcoin
//! signed-message scheme: the message is prefixed with the
//! `"Bitcoin Signed Message:\n"` magic (both varint-length-prefixed),
//! double-SHA256 hashed, and signed with a compact recoverable ECDSA
//! signature whose header byte encodes the recovery id and whether the
//! public key is compressed. Verification recovers the public key from the
//! signature and compares its hash160 against the payload of the claimed
//! cashaddr.
//!
//! The facilitator consumes this as the [`MessageVerifier`] capability;
//! [`BchSigner`] produces compatible signatures for clients and tests.

use bitcoincash_addr::{
    Address as CashAddress, HashType, Network as AddrNetwork, Scheme as AddrScheme,
};
use ripemd::Ripemd160;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use std::str::FromStr;

use crate::network::Network;
use crate::types::{BchAddress, MessageSignature};

const MESSAGE_MAGIC: &str = "Bitcoin Signed Message:\n";

/// Errors from signing or verifying a BCH signed message.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// The address could not be decoded to a public-key hash.
    #[error("Unsupported or undecodable address: {0}")]
    UnsupportedAddress(String),
    /// The signature header byte is outside the 27-34 range used by the
    /// signed-message scheme.
    #[error("Malformed signature header byte: {0}")]
    MalformedHeader(u8),
    /// Public-key recovery failed.
    #[error("Signature recovery failed: {0}")]
    Recovery(#[from] secp256k1::Error),
    /// The WIF string could not be decoded into a private key.
    #[error("Invalid WIF private key")]
    InvalidWif,
}

/// Capability: check that `signature` was produced by `address` over exactly
/// `message`. Synchronous and CPU-bound.
pub trait MessageVerifier: Send + Sync + 'static {
    fn verify(
        &self,
        address: &BchAddress,
        signature: &MessageSignature,
        message: &str,
    ) -> Result<bool, SignatureError>;
}

/// The production [`MessageVerifier`]: secp256k1 public-key recovery against
/// the cashaddr hash160.
pub struct BchMessageVerifier {
    secp: Secp256k1<All>,
}

impl BchMessageVerifier {
    pub fn new() -> Self {
        BchMessageVerifier {
            secp: Secp256k1::new(),
        }
    }
}

impl Default for BchMessageVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageVerifier for BchMessageVerifier {
    fn verify(
        &self,
        address: &BchAddress,
        signature: &MessageSignature,
        message: &str,
    ) -> Result<bool, SignatureError> {
        let decoded = CashAddress::decode(address.as_str())
            .map_err(|_| SignatureError::UnsupportedAddress(address.to_string()))?;
        if decoded.body.len() != 20 {
            return Err(SignatureError::UnsupportedAddress(address.to_string()));
        }

        let header = signature.0[0];
        if !(27..=34).contains(&header) {
            return Err(SignatureError::MalformedHeader(header));
        }
        let recovery_id = RecoveryId::from_i32(((header - 27) & 3) as i32)?;
        let compressed = header >= 31;

        let recoverable = RecoverableSignature::from_compact(&signature.0[1..], recovery_id)?;
        let digest = signed_message_digest(message);
        let recovered = self
            .secp
            .recover_ecdsa(&Message::from_digest(digest), &recoverable)?;

        let recovered_hash = if compressed {
            hash160(&recovered.serialize())
        } else {
            hash160(&recovered.serialize_uncompressed())
        };
        Ok(recovered_hash[..] == decoded.body[..])
    }
}

/// A signing key for BCH payment authorizations.
///
/// Loadable from WIF (the format BCH wallets export) or a raw secret key;
/// always signs with the compressed-key header range, matching the
/// JavaScript wallet tooling.
pub struct BchSigner {
    secret: SecretKey,
    address: BchAddress,
    secp: Secp256k1<All>,
}

impl BchSigner {
    /// Build a signer from a raw secret key for the given network.
    pub fn from_secret_key(secret: SecretKey, network: Network) -> Result<Self, SignatureError> {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret);
        let address = cashaddr_for_pubkey(&public_key, network)?;
        Ok(BchSigner {
            secret,
            address,
            secp,
        })
    }

    /// Build a signer from a WIF-encoded private key. The WIF version byte
    /// selects the network (`0x80` mainnet, `0xef` testnet).
    pub fn from_wif(wif: &str) -> Result<Self, SignatureError> {
        let payload = bs58::decode(wif)
            .with_check(None)
            .into_vec()
            .map_err(|_| SignatureError::InvalidWif)?;
        // version byte + 32-byte key + optional 0x01 compression marker
        let network = match payload.first() {
            Some(0x80) => Network::Bch,
            Some(0xef) => Network::BchTestnet,
            _ => return Err(SignatureError::InvalidWif),
        };
        let key_bytes = match payload.len() {
            33 => &payload[1..33],
            34 if payload[33] == 0x01 => &payload[1..33],
            _ => return Err(SignatureError::InvalidWif),
        };
        let secret =
            SecretKey::from_slice(key_bytes).map_err(|_| SignatureError::InvalidWif)?;
        Self::from_secret_key(secret, network)
    }

    /// The cashaddr this signer's signatures recover to.
    pub fn address(&self) -> &BchAddress {
        &self.address
    }

    /// Sign a message with the signed-message scheme.
    pub fn sign(&self, message: &str) -> MessageSignature {
        let digest = signed_message_digest(message);
        let recoverable = self
            .secp
            .sign_ecdsa_recoverable(&Message::from_digest(digest), &self.secret);
        let (recovery_id, compact) = recoverable.serialize_compact();
        let mut bytes = [0u8; 65];
        // 31 + recid: compressed-key header range.
        bytes[0] = 31 + recovery_id.to_i32() as u8;
        bytes[1..].copy_from_slice(&compact);
        MessageSignature(bytes)
    }
}

/// Double-SHA256 of the magic-prefixed message.
fn signed_message_digest(message: &str) -> [u8; 32] {
    let mut data = Vec::with_capacity(MESSAGE_MAGIC.len() + message.len() + 10);
    push_varint(&mut data, MESSAGE_MAGIC.len() as u64);
    data.extend_from_slice(MESSAGE_MAGIC.as_bytes());
    push_varint(&mut data, message.len() as u64);
    data.extend_from_slice(message.as_bytes());
    let first = Sha256::digest(&data);
    let second = Sha256::digest(first);
    second.into()
}

fn push_varint(buf: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => buf.push(n as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&n.to_le_bytes());
        }
    }
}

fn hash160(bytes: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(bytes);
    let ripe = Ripemd160::digest(sha);
    ripe.into()
}

fn cashaddr_for_pubkey(
    public_key: &PublicKey,
    network: Network,
) -> Result<BchAddress, SignatureError> {
    let body = hash160(&public_key.serialize()).to_vec();
    let addr_network = match network {
        Network::Bch => AddrNetwork::Main,
        Network::BchTestnet => AddrNetwork::Test,
    };
    let encoded = CashAddress {
        body,
        scheme: AddrScheme::CashAddr,
        hash_type: HashType::Key,
        network: addr_network,
    }
    .encode()
    .map_err(|_| SignatureError::UnsupportedAddress("<derived>".to_string()))?;
    BchAddress::from_str(&encoded)
        .map_err(|e| SignatureError::UnsupportedAddress(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known demo key, also used in the client docs.
    const DEMO_WIF: &str = "L1eYaneXDDXy8VDig4Arwe8wYHbhtsA5wuQvwsKwhaYeneoZuKG4";
    const DEMO_ADDRESS: &str = "bitcoincash:qz9s2mccqamzppfq708cyfde5ejgmsr9hy7r3unmkk";

    fn test_signer() -> BchSigner {
        let secret = SecretKey::from_slice(&[0x11; 32]).unwrap();
        BchSigner::from_secret_key(secret, Network::Bch).unwrap()
    }

    #[test]
    fn test_wif_derives_published_address() {
        let signer = BchSigner::from_wif(DEMO_WIF).unwrap();
        assert_eq!(signer.address().as_str(), DEMO_ADDRESS);
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let signer = test_signer();
        let verifier = BchMessageVerifier::new();
        let message = r#"{"from":"a","to":"b","value":1000}"#;
        let signature = signer.sign(message);
        assert!(verifier
            .verify(signer.address(), &signature, message)
            .unwrap());
    }

    #[test]
    fn test_tampered_message_rejected() {
        let signer = test_signer();
        let verifier = BchMessageVerifier::new();
        let signature = signer.sign("pay 1000 sats");
        let verdict = verifier.verify(signer.address(), &signature, "pay 9000 sats");
        assert!(!matches!(verdict, Ok(true)));
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let signer = test_signer();
        let other = BchSigner::from_secret_key(SecretKey::from_slice(&[0x22; 32]).unwrap(), Network::Bch)
            .unwrap();
        let verifier = BchMessageVerifier::new();
        let message = "hello";
        let signature = other.sign(message);
        let verdict = verifier.verify(signer.address(), &signature, message);
        assert!(!matches!(verdict, Ok(true)));
    }

    #[test]
    fn test_garbage_signature_errors_or_rejects() {
        let signer = test_signer();
        let verifier = BchMessageVerifier::new();
        let signature = MessageSignature([0u8; 65]);
        let verdict = verifier.verify(signer.address(), &signature, "hello");
        assert!(!matches!(verdict, Ok(true)));
    }

    #[test]
    fn test_testnet_signer_uses_testnet_prefix() {
        let secret = SecretKey::from_slice(&[0x33; 32]).unwrap();
        let signer = BchSigner::from_secret_key(secret, Network::BchTestnet).unwrap();
        assert!(signer.address().as_str().starts_with("bchtest:"));
    }
}
