//! Configuration for the BCH x402 facilitator server.
//!
//! Values come from a JSON config file when one exists (`--config`, or the
//! `CONFIG` env var, default `config.json`), with serde defaults that fall
//! back to environment variables, then to hardcoded values. A deployment
//! with no config file at all is fully driven by the environment.

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use url::Url;

use crate::network::Network;
use crate::types::Satoshis;

/// CLI arguments for the facilitator server.
#[derive(Parser, Debug)]
#[command(name = "x402-bch")]
#[command(about = "x402 BCH facilitator HTTP server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    /// Network served by this facilitator instance.
    #[serde(default = "config_defaults::default_network")]
    network: Network,
    /// Directory of the sled ledger database.
    #[serde(default = "config_defaults::default_db_path")]
    db_path: PathBuf,
    /// Base URL of the wallet-node REST service.
    #[serde(default = "config_defaults::default_wallet_url")]
    wallet_url: Url,
    /// Optional bearer token for the wallet node.
    #[serde(default = "config_defaults::default_wallet_api_token")]
    wallet_api_token: Option<String>,
    /// Charge applied when requirements omit `minAmountRequired`.
    #[serde(default = "config_defaults::default_max_charge_sat")]
    max_charge_sat: Satoshis,
    /// Confirmations the operator waits for after settlement broadcast.
    /// Policy knob only; never changes a settlement verdict.
    #[serde(default = "config_defaults::default_min_confirmations")]
    min_confirmations: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: config_defaults::default_port(),
            host: config_defaults::default_host(),
            network: config_defaults::default_network(),
            db_path: config_defaults::default_db_path(),
            wallet_url: config_defaults::default_wallet_url(),
            wallet_api_token: config_defaults::default_wallet_api_token(),
            max_charge_sat: config_defaults::default_max_charge_sat(),
            min_confirmations: config_defaults::default_min_confirmations(),
        }
    }
}

pub mod config_defaults {
    use super::*;
    use std::env;

    pub const DEFAULT_PORT: u16 = 4345;
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_DB_PATH: &str = "./data/utxo-ledger";
    pub const DEFAULT_WALLET_URL: &str = "http://localhost:3000";
    pub const DEFAULT_MAX_CHARGE_SAT: u64 = 1000;

    /// `$PORT` -> 4345
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// `$HOST` -> "0.0.0.0"
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4(DEFAULT_HOST.parse().unwrap()))
    }

    /// `$NETWORK` -> bch
    pub fn default_network() -> Network {
        env::var("NETWORK")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(Network::Bch)
    }

    /// `$LEDGER_DB_PATH` -> "./data/utxo-ledger"
    pub fn default_db_path() -> PathBuf {
        env::var("LEDGER_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH))
    }

    /// `$WALLET_URL` -> "http://localhost:3000"
    pub fn default_wallet_url() -> Url {
        env::var("WALLET_URL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| DEFAULT_WALLET_URL.parse().unwrap())
    }

    /// `$WALLET_API_TOKEN` -> none
    pub fn default_wallet_api_token() -> Option<String> {
        env::var("WALLET_API_TOKEN").ok()
    }

    /// `$MAX_CHARGE_SAT` -> 1000
    pub fn default_max_charge_sat() -> Satoshis {
        env::var("MAX_CHARGE_SAT")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Satoshis)
            .unwrap_or(Satoshis(DEFAULT_MAX_CHARGE_SAT))
    }

    /// `$MIN_CONFIRMATIONS` -> 0
    pub fn default_min_confirmations() -> u32 {
        env::var("MIN_CONFIRMATIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    pub fn wallet_url(&self) -> &Url {
        &self.wallet_url
    }

    pub fn wallet_api_token(&self) -> Option<&str> {
        self.wallet_api_token.as_deref()
    }

    pub fn max_charge_sat(&self) -> Satoshis {
        self.max_charge_sat
    }

    pub fn min_confirmations(&self) -> u32 {
        self.min_confirmations
    }

    /// Load configuration from CLI arguments and the JSON file they point
    /// at. A missing file is not an error: everything falls back to
    /// environment variables and defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        Self::load_from_path(cli_args.config)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parses_partial_file() {
        let config: Config =
            serde_json::from_str(r#"{"port": 9000, "network": "bch-testnet"}"#).unwrap();
        assert_eq!(config.port(), 9000);
        assert_eq!(config.network(), Network::BchTestnet);
        // Untouched fields take defaults.
        assert_eq!(config.max_charge_sat(), Satoshis(1000));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load_from_path(PathBuf::from("/nonexistent/config.json")).unwrap();
        assert_eq!(config.network(), Network::Bch);
        assert_eq!(config.min_confirmations(), 0);
    }
}
