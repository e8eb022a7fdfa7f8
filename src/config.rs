//! Configuration management for the deposit relayer
//!
//! Loads configuration from a TOML file with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::{Address, U256};
use ethers::utils::parse_ether;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub relayer: RelayerConfig,
    pub chain: ChainConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub rewards: RewardsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayerConfig {
    /// Per-transaction fee ceiling in ETH
    pub fee_threshold_eth: f64,
    pub fee_poll_interval_ms: u64,
    pub submit_retry_delay_ms: u64,
    pub sync_retry_delay_ms: u64,
    /// Attempts before the session refresh escalation
    pub sync_max_attempts: u32,
    pub tx_per_wallet: u32,
    pub deposit_amount_eth: String,
    pub confirmations: usize,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            fee_threshold_eth: 0.0000003,
            fee_poll_interval_ms: 5000,
            submit_retry_delay_ms: 5000,
            sync_retry_delay_ms: 5000,
            sync_max_attempts: 3,
            tx_per_wallet: 1,
            deposit_amount_eth: "0.0000000000001".to_string(),
            confirmations: 1,
        }
    }
}

impl RelayerConfig {
    pub fn fee_threshold_wei(&self) -> Result<U256> {
        parse_ether(self.fee_threshold_eth)
            .with_context(|| format!("Invalid fee threshold: {}", self.fee_threshold_eth))
    }

    pub fn deposit_amount_wei(&self) -> Result<U256> {
        parse_ether(&self.deposit_amount_eth)
            .with_context(|| format!("Invalid deposit amount: {}", self.deposit_amount_eth))
    }

    pub fn fee_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fee_poll_interval_ms)
    }

    pub fn submit_retry_delay(&self) -> Duration {
        Duration::from_millis(self.submit_retry_delay_ms)
    }

    pub fn sync_retry_delay(&self) -> Duration {
        Duration::from_millis(self.sync_retry_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub contract_address: String,
}

impl ChainConfig {
    pub fn contract(&self) -> Result<Address> {
        self.contract_address
            .parse()
            .with_context(|| format!("Invalid contract address: {}", self.contract_address))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub graphql_url: String,
    pub refresh_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub private_keys_path: Option<String>,
    pub private_key_env: Option<String>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_keys_path: Some("private_keys.txt".to_string()),
            private_key_env: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub path: String,
    /// Account key used by `deposit`; the first stored account when unset
    pub account: Option<String>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            path: "tokens.json".to_string(),
            account: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RewardsConfig {
    pub draw_batch_limit: u32,
    pub grow_with_all: bool,
    pub grow_round_interval_secs: u64,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            draw_batch_limit: 10,
            grow_with_all: false,
            grow_round_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9090
}

impl Settings {
    /// Load settings from an explicit path, `RELAYER_CONFIG`, or the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => env::var("RELAYER_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config/default.toml")),
        };

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse settings from TOML text after substituting environment variables
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config_str = substitute_env_vars(raw)?;

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.chain.rpc_urls.is_empty() {
            anyhow::bail!("Chain {} has no RPC URLs configured", self.chain.name);
        }
        self.chain.contract()?;

        if self.relayer.tx_per_wallet == 0 {
            anyhow::bail!("tx_per_wallet must be positive");
        }
        if self.relayer.sync_max_attempts == 0 {
            anyhow::bail!("sync_max_attempts must be positive");
        }
        if self.rewards.draw_batch_limit == 0 {
            anyhow::bail!("draw_batch_limit must be positive");
        }
        if self.relayer.deposit_amount_wei()?.is_zero() {
            anyhow::bail!("deposit_amount_eth must be positive");
        }
        self.relayer.fee_threshold_wei()?;

        if self.wallet.private_keys_path.is_none() && self.wallet.private_key_env.is_none() {
            tracing::warn!("No wallet source configured - deposit will be unavailable");
        }

        Ok(())
    }

    /// Refresh endpoint with the API key appended when configured separately
    pub fn refresh_endpoint(&self) -> String {
        match &self.backend.api_key {
            Some(key) if !key.is_empty() && !self.backend.refresh_url.contains("key=") => {
                let sep = if self.backend.refresh_url.contains('?') { '&' } else { '?' };
                format!("{}{}key={}", self.backend.refresh_url, sep, key)
            }
            _ => self.backend.refresh_url.clone(),
        }
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")?;

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [chain]
        chain_id = 10
        name = "optimism"
        rpc_urls = ["https://mainnet.optimism.io"]
        contract_address = "0xC5bf05cD32a14BFfb705Fb37a9d218895187376c"

        [backend]
        graphql_url = "https://backend.example/graphql"
        refresh_url = "https://securetoken.example/v1/token"
        api_key = "${RELAYER_TEST_API_KEY}"
    "#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_defaults_follow_deposit_script() {
        let settings = Settings::from_toml(MINIMAL).unwrap();
        assert_eq!(settings.relayer.sync_max_attempts, 3);
        assert_eq!(settings.relayer.fee_poll_interval(), Duration::from_secs(5));
        assert_eq!(
            settings.relayer.fee_threshold_wei().unwrap(),
            U256::from(300_000_000_000u64)
        );
        assert_eq!(
            settings.relayer.deposit_amount_wei().unwrap(),
            U256::from(100_000u64)
        );
        assert_eq!(settings.rewards.draw_batch_limit, 10);
    }

    #[test]
    fn test_refresh_endpoint_appends_key() {
        env::set_var("RELAYER_TEST_API_KEY", "abc");
        let settings = Settings::from_toml(MINIMAL).unwrap();
        assert_eq!(
            settings.refresh_endpoint(),
            "https://securetoken.example/v1/token?key=abc"
        );
    }

    #[test]
    fn test_rejects_missing_rpc_urls() {
        let raw = MINIMAL.replace(r#"["https://mainnet.optimism.io"]"#, "[]");
        assert!(Settings::from_toml(&raw).is_err());
    }

    #[test]
    fn test_rejects_bad_contract_address() {
        let raw = MINIMAL.replace("0xC5bf05cD32a14BFfb705Fb37a9d218895187376c", "not-an-address");
        assert!(Settings::from_toml(&raw).is_err());
    }
}
