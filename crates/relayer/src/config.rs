//! Relayer configuration
//!
//! Loaded from a TOML file and validated before anything is wired up.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use bridge_core::ChainId;
use relay_engine::{ChainSettings, EngineConfig, RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerConfig {
    /// Directory for the registry database.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Bind address for the operator status endpoint.
    #[serde(default = "default_status_addr")]
    pub status_addr: String,

    /// Dispatcher worker pool size.
    #[serde(default = "default_dispatch_workers")]
    pub dispatch_workers: usize,

    /// Worker idle sleep between drain passes.
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,

    /// Hex-encoded 32-byte seed for the relayer's ed25519 attestation key.
    pub relayer_key_seed: String,

    /// Chains to watch and relay between.
    pub chains: Vec<ChainConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub kind: ChainKind,

    /// RPC endpoint; unused by simulated chains.
    #[serde(default)]
    pub rpc_url: String,

    /// Hub contract address on this chain.
    #[serde(default)]
    pub hub_address: String,

    pub required_confirmations: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_pending_expiry_secs")]
    pub pending_expiry_secs: u64,

    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,

    #[serde(default = "default_inclusion_timeout_ms")]
    pub inclusion_timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Assets accepted at ingestion; empty allows all.
    #[serde(default)]
    pub asset_allowlist: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    Evm,
    Near,
    Solana,
    /// In-process simulated chain for local development.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

// Default values
fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_status_addr() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_dispatch_workers() -> usize {
    4
}

fn default_dispatch_interval_ms() -> u64 {
    500
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_pending_expiry_secs() -> u64 {
    24 * 60 * 60
}

fn default_submit_timeout_ms() -> u64 {
    30_000
}

fn default_inclusion_timeout_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    5_000
}

fn default_max_backoff_ms() -> u64 {
    300_000
}

impl RelayerConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path:?}"))?;
        let config: RelayerConfig =
            toml::from_str(&content).context("failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            anyhow::bail!("at least one chain must be configured");
        }

        let mut seen = std::collections::HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.chain_id) {
                anyhow::bail!("duplicate chain id {}", chain.chain_id);
            }
            if chain.kind != ChainKind::Memory && chain.rpc_url.is_empty() {
                anyhow::bail!("rpc_url for chain {} cannot be empty", chain.name);
            }
            if chain.retry.max_attempts == 0 {
                anyhow::bail!("max_attempts for chain {} must be at least 1", chain.name);
            }
        }

        let seed = hex::decode(&self.relayer_key_seed)
            .context("relayer_key_seed must be hex")?;
        if seed.len() != 32 {
            anyhow::bail!("relayer_key_seed must encode exactly 32 bytes");
        }

        Ok(())
    }

    /// Decode the relayer signing-key seed.
    pub fn signing_key_seed(&self) -> Result<[u8; 32]> {
        let seed = hex::decode(&self.relayer_key_seed)?;
        seed.try_into()
            .map_err(|_| anyhow::anyhow!("relayer_key_seed must encode exactly 32 bytes"))
    }

    /// Build the engine configuration from this file.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            chains: self.chains.iter().map(ChainConfig::settings).collect(),
            dispatch_workers: self.dispatch_workers,
            dispatch_interval: Duration::from_millis(self.dispatch_interval_ms),
        }
    }
}

impl ChainConfig {
    fn settings(&self) -> ChainSettings {
        let mut settings = ChainSettings::new(ChainId(self.chain_id), self.name.clone());
        settings.required_confirmations = self.required_confirmations;
        settings.poll_interval = Duration::from_millis(self.poll_interval_ms);
        settings.pending_expiry = Duration::from_secs(self.pending_expiry_secs);
        settings.submit_timeout = Duration::from_millis(self.submit_timeout_ms);
        settings.inclusion_timeout = Duration::from_millis(self.inclusion_timeout_ms);
        settings.retry = RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
        };
        settings.asset_allowlist = self.asset_allowlist.clone();
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> RelayerConfig {
        RelayerConfig {
            data_dir: "./data".to_string(),
            status_addr: "127.0.0.1:9090".to_string(),
            dispatch_workers: 4,
            dispatch_interval_ms: 500,
            relayer_key_seed: hex::encode([7u8; 32]),
            chains: vec![ChainConfig {
                chain_id: 1,
                name: "local".to_string(),
                kind: ChainKind::Memory,
                rpc_url: String::new(),
                hub_address: String::new(),
                required_confirmations: 3,
                poll_interval_ms: 2_000,
                pending_expiry_secs: 3_600,
                submit_timeout_ms: 30_000,
                inclusion_timeout_ms: 60_000,
                retry: RetryConfig::default(),
                asset_allowlist: vec![],
            }],
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(sample_config().validate().is_ok());
        assert_eq!(sample_config().signing_key_seed().unwrap(), [7u8; 32]);
    }

    #[test]
    fn test_duplicate_chain_ids_rejected() {
        let mut config = sample_config();
        config.chains.push(config.chains[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_key_seed_rejected() {
        let mut config = sample_config();
        config.relayer_key_seed = "abcd".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parses_from_toml() {
        let toml_src = r#"
            relayer_key_seed = "0707070707070707070707070707070707070707070707070707070707070707"

            [[chains]]
            chain_id = 1
            name = "local"
            kind = "memory"
            required_confirmations = 3

            [[chains]]
            chain_id = 8453
            name = "base"
            kind = "evm"
            rpc_url = "http://localhost:8545"
            hub_address = "0x1234"
            required_confirmations = 6
            asset_allowlist = ["eth"]
        "#;
        let config: RelayerConfig = toml::from_str(toml_src).unwrap();
        config.validate().unwrap();

        let engine = config.engine_config();
        assert_eq!(engine.chains.len(), 2);
        assert_eq!(engine.chains[1].required_confirmations, 6);
        assert!(engine.chains[1].asset_allowed("eth"));
        assert!(!engine.chains[1].asset_allowed("usdc"));
    }
}
