//! Configuration management for Minichain

use crate::error::ChainError;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub contracts: ContractConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_difficulty")]
    pub difficulty: usize,
    #[serde(default = "default_block_reward")]
    pub block_reward: f64,
    #[serde(default = "default_gas_fee")]
    pub gas_fee: f64,
    /// Informational only; difficulty is never adjusted.
    #[serde(default = "default_target_block_time")]
    pub target_block_time: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_chain_file")]
    pub chain_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractConfig {
    #[serde(default = "default_contract_timeout")]
    pub timeout_ms: u64,
    /// Gas charged per second of wall-clock execution.
    #[serde(default = "default_gas_multiplier")]
    pub gas_multiplier: f64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            block_reward: default_block_reward(),
            gas_fee: default_gas_fee(),
            target_block_time: default_target_block_time(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            sync_interval_secs: default_sync_interval(),
            node_timeout_secs: default_node_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chain_file: default_chain_file(),
        }
    }
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_contract_timeout(),
            gas_multiplier: default_gas_multiplier(),
        }
    }
}

impl NetworkConfig {
    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

impl ContractConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Parse a configuration document and validate it.
    pub fn from_toml_str(s: &str) -> Result<Self, ChainError> {
        let config: Config =
            toml::from_str(s).map_err(|e| ChainError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChainError> {
        if self.chain.difficulty == 0 || self.chain.difficulty > 64 {
            return Err(ChainError::ConfigError(
                "chain.difficulty must be between 1 and 64".to_string(),
            ));
        }
        if !(self.chain.block_reward > 0.0) {
            return Err(ChainError::ConfigError(
                "chain.block_reward must be positive".to_string(),
            ));
        }
        if !(self.chain.gas_fee >= 0.0) {
            return Err(ChainError::ConfigError(
                "chain.gas_fee must not be negative".to_string(),
            ));
        }
        if self.storage.chain_file.is_empty() {
            return Err(ChainError::ConfigError(
                "storage.chain_file must be set".to_string(),
            ));
        }
        if self.network.node_timeout_secs == 0 || self.contracts.timeout_ms == 0 {
            return Err(ChainError::ConfigError(
                "timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load `config.toml` from the working directory, using defaults when it is absent.
pub fn load_config() -> Result<Config, ChainError> {
    load_config_from(DEFAULT_CONFIG_FILE)
}

pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config, ChainError> {
    let config_str = fs::read_to_string(path.as_ref()).unwrap_or_default();
    if config_str.trim().is_empty() {
        return Ok(Config::default());
    }
    Config::from_toml_str(&config_str)
}

fn default_difficulty() -> usize {
    4
}

fn default_block_reward() -> f64 {
    1.0
}

fn default_gas_fee() -> f64 {
    0.01
}

fn default_target_block_time() -> u64 {
    600
}

fn default_api_port() -> u16 {
    5000
}

fn default_sync_interval() -> u64 {
    60
}

fn default_node_timeout() -> u64 {
    5
}

fn default_chain_file() -> String {
    "blockchain.json".to_string()
}

fn default_contract_timeout() -> u64 {
    2000
}

fn default_gas_multiplier() -> f64 {
    1000.0
}
