//! Configuration management for the transaction manager
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::tx::{gwei_to_wei, SenderConfig};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub txmgr: TxMgrConfig,
    pub l1: L1Config,
    pub wallet: WalletConfig,
    pub metrics: MetricsConfig,
}

/// Fee escalation and confirmation settings
#[derive(Debug, Clone, Deserialize)]
pub struct TxMgrConfig {
    /// Tag used to correlate log lines
    pub name: String,
    pub min_fee_gwei: u64,
    pub max_fee_gwei: u64,
    pub fee_step_gwei: u64,
    pub resubmit_interval_ms: u64,
    pub receipt_poll_interval_ms: u64,
    pub num_confirmations: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct L1Config {
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Name of the environment variable holding the hex private key
    pub private_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

fn default_network_timeout_ms() -> u64 {
    10_000
}

impl TxMgrConfig {
    /// Build the runtime sender configuration
    pub fn sender_config(&self) -> SenderConfig {
        SenderConfig {
            name: self.name.clone(),
            min_fee: gwei_to_wei(self.min_fee_gwei),
            max_fee: gwei_to_wei(self.max_fee_gwei),
            fee_step: gwei_to_wei(self.fee_step_gwei),
            resubmit_interval: Duration::from_millis(self.resubmit_interval_ms),
            receipt_poll_interval: Duration::from_millis(self.receipt_poll_interval_ms),
            num_confirmations: self.num_confirmations,
        }
    }
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("TXMGR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str)?;

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.l1.rpc_urls.is_empty() {
            anyhow::bail!("must provide a L1 RPC url");
        }
        if self.l1.network_timeout_ms == 0 {
            anyhow::bail!("network_timeout_ms must not be 0");
        }
        if self.wallet.private_key_env.is_empty() {
            anyhow::bail!("must provide the private key environment variable");
        }

        self.txmgr
            .sender_config()
            .validate()
            .map_err(|e| anyhow::anyhow!(e))?;

        Ok(())
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
