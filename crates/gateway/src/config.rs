//! Gateway configuration

use crate::chain::JsonRpcOptions;
use crate::orchestrator::OrchestratorSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokengate_common::types::Address;
use tokengate_common::utils::config::load_layered;
use tokengate_common::utils::logging::LoggingConfig;

/// Prefix for environment overrides, e.g. `TOKENGATE_RPC_URL`.
pub const ENV_PREFIX: &str = "TOKENGATE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] tokengate_common::CommonError),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.to_string(),
        }
    }
}

/// Gateway service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Server address
    pub server_addr: String,

    /// JSON-RPC endpoint of the chain node
    pub rpc_url: String,

    /// Signing key (hex, with or without 0x)
    pub private_key: String,

    /// Token contract every call is addressed to
    pub token_contract: String,

    /// Tokens per faucet claim (minor units, decimal)
    pub dispense_amount: String,

    /// Cap for one transfer or mint (minor units, decimal)
    pub max_amount_per_request: String,

    pub claim_window_secs: u64,

    pub chain_timeout_secs: u64,

    pub max_submit_retries: u32,

    pub retry_backoff_ms: u64,

    pub gas_limit: u64,

    /// Gas price in wei; queried from the node when unset
    pub gas_price: Option<String>,

    /// Queried from the node when unset
    pub chain_id: Option<u64>,

    /// Ledger directory
    pub db_path: String,

    /// Distribution history older than this is pruned daily
    pub history_retention_days: i64,

    pub cors_enabled: bool,

    pub metrics_enabled: bool,

    pub logging: LoggingConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:3000".to_string(),
            rpc_url: "http://localhost:8545".to_string(),
            private_key: String::new(),
            token_contract: String::new(),
            dispense_amount: "100".to_string(),
            max_amount_per_request: "1000000".to_string(),
            claim_window_secs: 86_400, // 24 hours
            chain_timeout_secs: 30,
            max_submit_retries: 2,
            retry_backoff_ms: 500,
            gas_limit: 100_000,
            gas_price: None,
            chain_id: None,
            db_path: "./tokengate_data".to_string(),
            history_retention_days: 30,
            cors_enabled: true,
            metrics_enabled: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Defaults, then the optional file, then `TOKENGATE_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Ok(load_layered(path, Some(ENV_PREFIX))?)
    }

    /// Typed orchestrator policy. Fails on anything the core could not use.
    pub fn settings(&self) -> Result<OrchestratorSettings, ConfigError> {
        let token_contract = self
            .token_contract
            .parse::<Address>()
            .map_err(|e| ConfigError::invalid("token_contract", e))?;
        if token_contract.is_zero() {
            return Err(ConfigError::invalid("token_contract", "must not be the zero address"));
        }

        let dispense_amount = parse_amount("dispense_amount", &self.dispense_amount)?;
        let max_amount_per_request = parse_amount("max_amount_per_request", &self.max_amount_per_request)?;
        if dispense_amount == 0 {
            return Err(ConfigError::invalid("dispense_amount", "must be positive"));
        }
        if dispense_amount > max_amount_per_request {
            return Err(ConfigError::invalid("dispense_amount", "exceeds max_amount_per_request"));
        }
        if self.claim_window_secs == 0 {
            return Err(ConfigError::invalid("claim_window_secs", "must be positive"));
        }
        if self.chain_timeout_secs == 0 {
            return Err(ConfigError::invalid("chain_timeout_secs", "must be positive"));
        }

        Ok(OrchestratorSettings {
            token_contract,
            dispense_amount,
            max_amount_per_request,
            claim_window: Duration::from_secs(self.claim_window_secs),
            max_submit_retries: self.max_submit_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            chain_timeout: Duration::from_secs(self.chain_timeout_secs),
        })
    }

    pub fn rpc_options(&self) -> Result<JsonRpcOptions, ConfigError> {
        let gas_price = self
            .gas_price
            .as_deref()
            .map(|price| parse_amount("gas_price", price))
            .transpose()?;

        Ok(JsonRpcOptions {
            gas_limit: self.gas_limit,
            gas_price,
            chain_id: self.chain_id,
            request_timeout: Duration::from_secs(self.chain_timeout_secs),
        })
    }
}

fn parse_amount(field: &'static str, value: &str) -> Result<u128, ConfigError> {
    value
        .trim()
        .parse::<u128>()
        .map_err(|e| ConfigError::invalid(field, format!("{:?} is not a decimal amount: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn configured() -> GatewayConfig {
        GatewayConfig {
            token_contract: "0x00000000000000000000000000000000000000cc".to_string(),
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn test_default_settings() {
        let settings = configured().settings().unwrap();
        assert_eq!(settings.dispense_amount, 100);
        assert_eq!(settings.claim_window, Duration::from_secs(86_400));
        assert_eq!(settings.max_submit_retries, 2);
        assert_eq!(settings.chain_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_contract_rejected() {
        let err = GatewayConfig::default().settings().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "token_contract", .. }));
    }

    #[test]
    fn test_bad_amount_rejected() {
        let config = GatewayConfig {
            dispense_amount: "1e18".to_string(),
            ..configured()
        };
        assert!(matches!(
            config.settings(),
            Err(ConfigError::Invalid { field: "dispense_amount", .. })
        ));
    }

    #[test]
    fn test_rpc_options() {
        let config = GatewayConfig {
            gas_price: Some("1000000000".to_string()),
            chain_id: Some(31337),
            ..configured()
        };
        let options = config.rpc_options().unwrap();
        assert_eq!(options.gas_price, Some(1_000_000_000));
        assert_eq!(options.chain_id, Some(31337));
        assert_eq!(options.gas_limit, 100_000);
    }

    #[test]
    fn test_load_from_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokengate.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "token_contract = \"0x00000000000000000000000000000000000000cc\"\n\
             dispense_amount = \"250\"\n\
             claim_window_secs = 3600\n\
             [logging]\n\
             level = \"debug\""
        )
        .unwrap();

        let config = GatewayConfig::load(Some(&path)).unwrap();
        assert_eq!(config.dispense_amount, "250");
        assert_eq!(config.claim_window_secs, 3600);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.max_submit_retries, 2);
        assert_eq!(config.settings().unwrap().claim_window, Duration::from_secs(3600));
    }
}
