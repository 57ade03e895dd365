//! Chain configuration types.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ChainError;

/// Override key carrying a state-snapshot file to load on startup. The value
/// is a path relative to the host working directory; the file is
/// bind-mounted into the node's home directory under its base filename.
pub const LOAD_STATE_OVERRIDE: &str = "--load-state";

fn default_block_time() -> u64 {
    2
}

fn default_blocks_to_wait() -> u64 {
    2
}

/// Supported chain families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    /// Ethereum devnet (anvil-style).
    Ethereum,
    /// Cosmos-SDK chain.
    Cosmos,
}

/// A docker image reference plus the uid:gid its process runs as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerImage {
    /// Image repository, e.g. `ghcr.io/foundry-rs/foundry`.
    pub repository: String,
    /// Image tag.
    pub version: String,
    /// `uid:gid` the image's entrypoint runs as, when it is non-root and the
    /// home volume needs an ownership fix-up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid_gid: Option<String>,
}

impl DockerImage {
    /// New image reference without a uid:gid.
    pub fn new(repository: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            version: version.into(),
            uid_gid: None,
        }
    }

    /// The pullable `repository:tag` reference.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.version)
    }
}

/// Declarative configuration for one chain node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain family this config instantiates.
    pub kind: ChainKind,
    /// Logical chain name; the orchestrator rejects duplicates.
    pub name: String,
    /// Chain id, e.g. `31337` or `puppy-1`.
    pub chain_id: String,
    /// Candidate images; the first is used for the node container.
    pub images: Vec<DockerImage>,
    /// Node binary name, e.g. `anvil` or `canined`.
    pub bin: String,
    /// Bech32 address prefix (Cosmos families).
    #[serde(default)]
    pub bech32_prefix: String,
    /// Native denom, e.g. `wei` or `ujkl`.
    #[serde(default)]
    pub denom: String,
    /// Gas price string passed to transaction commands (Cosmos families).
    #[serde(default)]
    pub gas_prices: String,
    /// Gas adjustment multiplier for simulated gas (Cosmos families).
    #[serde(default)]
    pub gas_adjustment: f64,
    /// Devnet block time in seconds.
    #[serde(default = "default_block_time")]
    pub block_time_secs: u64,
    /// Blocks the node must produce after start before it counts as ready.
    #[serde(default = "default_blocks_to_wait")]
    pub blocks_to_wait: u64,
    /// Free-form per-chain overrides, e.g. [`LOAD_STATE_OVERRIDE`].
    #[serde(default)]
    pub config_overrides: HashMap<String, serde_json::Value>,
}

impl ChainConfig {
    /// Validate that the config can actually produce a node. Configuration
    /// errors are fatal and never retried.
    pub fn validate(&self) -> Result<(), ChainError> {
        if self.name.is_empty() {
            return Err(ChainError::Config("chain name is empty".to_string()));
        }
        if self.images.is_empty() {
            return Err(ChainError::Config(format!(
                "no docker image configured for chain {}",
                self.name
            )));
        }
        if self.bin.is_empty() {
            return Err(ChainError::Config(format!(
                "no binary configured for chain {}",
                self.name
            )));
        }
        Ok(())
    }

    /// The image used for the node container and exec jobs.
    pub fn primary_image(&self) -> Result<&DockerImage, ChainError> {
        self.images.first().ok_or_else(|| {
            ChainError::Config(format!("no docker image configured for chain {}", self.name))
        })
    }

    /// The state-snapshot override, if one was configured.
    pub fn load_state_override(&self) -> Option<&str> {
        self.config_overrides
            .get(LOAD_STATE_OVERRIDE)
            .and_then(|v| v.as_str())
    }
}

/// An amount of a denom destined for an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAmount {
    /// Destination address in the chain's native format.
    pub address: String,
    /// Denom of the amount.
    pub denom: String,
    /// Amount in the denom's base units.
    pub amount: U256,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChainConfig {
        ChainConfig {
            kind: ChainKind::Ethereum,
            name: "ethereum".to_string(),
            chain_id: "31337".to_string(),
            images: vec![DockerImage::new("ghcr.io/foundry-rs/foundry", "latest")],
            bin: "anvil".to_string(),
            bech32_prefix: String::new(),
            denom: "wei".to_string(),
            gas_prices: "0".to_string(),
            gas_adjustment: 0.0,
            block_time_secs: 2,
            blocks_to_wait: 2,
            config_overrides: HashMap::new(),
        }
    }

    #[test]
    fn valid_config_passes() {
        config().validate().unwrap();
    }

    #[test]
    fn zero_images_is_a_config_error() {
        let mut cfg = config();
        cfg.images.clear();
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ChainError::Config(_)));
        assert!(err.to_string().contains("no docker image"));
    }

    #[test]
    fn image_reference_joins_repository_and_tag() {
        assert_eq!(
            DockerImage::new("biphan4/foundry", "latest").reference(),
            "biphan4/foundry:latest"
        );
    }

    #[test]
    fn load_state_override_round_trips() {
        let mut cfg = config();
        assert!(cfg.load_state_override().is_none());
        cfg.config_overrides.insert(
            LOAD_STATE_OVERRIDE.to_string(),
            serde_json::json!("devnet-state.json"),
        );
        assert_eq!(cfg.load_state_override(), Some("devnet-state.json"));
    }
}
