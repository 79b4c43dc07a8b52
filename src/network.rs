//! Network definitions for the BCH x402 facilitator.
//!
//! A facilitator instance serves exactly one network; payloads and
//! requirements naming any other network are rejected with
//! `invalid_network`.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Supported Bitcoin Cash networks.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    /// Bitcoin Cash mainnet.
    #[serde(rename = "bch")]
    Bch,
    /// Bitcoin Cash testnet (testnet3/testnet4 and chipnet all use the
    /// `bchtest:` address prefix).
    #[serde(rename = "bch-testnet")]
    BchTestnet,
}

impl Default for Network {
    fn default() -> Self {
        Network::Bch
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Bch => write!(f, "bch"),
            Network::BchTestnet => write!(f, "bch-testnet"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown network: {0}")]
pub struct UnknownNetworkError(pub String);

impl FromStr for Network {
    type Err = UnknownNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bch" => Ok(Network::Bch),
            "bch-testnet" => Ok(Network::BchTestnet),
            other => Err(UnknownNetworkError(other.to_string())),
        }
    }
}

impl Network {
    /// Return all known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[Network::Bch, Network::BchTestnet]
    }

    /// The cashaddr prefix used by addresses on this network.
    pub fn address_prefix(&self) -> &'static str {
        match self {
            Network::Bch => "bitcoincash",
            Network::BchTestnet => "bchtest",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_serde_names() {
        assert_eq!(serde_json::to_string(&Network::Bch).unwrap(), "\"bch\"");
        assert_eq!(
            serde_json::to_string(&Network::BchTestnet).unwrap(),
            "\"bch-testnet\""
        );
        let network: Network = serde_json::from_str("\"bch\"").unwrap();
        assert_eq!(network, Network::Bch);
    }

    #[test]
    fn test_network_from_str_rejects_unknown() {
        assert!("ethereum".parse::<Network>().is_err());
        assert_eq!("bch".parse::<Network>().unwrap(), Network::Bch);
    }
}
