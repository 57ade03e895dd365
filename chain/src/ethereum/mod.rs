//! Ethereum devnet chain family (anvil under foundry).
//!
//! The node container runs `anvil`; every CLI interaction (`cast`) runs as a
//! one-shot job in the same image with the node's volume bound, so nothing
//! depends on the node container accepting exec sessions after start.

use async_trait::async_trait;
use interlab_common::docker::{
    cleanup_labels, condense_host_name, create_owned_volume, sanitize_container_name,
    set_volume_owner, BindMount, ContainerLifecycle, ContainerRuntime, ContainerSpec, ExecOutput,
    JobRunner, LogStreamErrors,
};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use primitive_types::U256;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::{ChainConfig, ChainKind, DockerImage, WalletAmount};
use crate::error::ChainError;
use crate::node::{ChainNode, HeightQuery};
use crate::waiters;
use crate::wallet::{GenesisWallets, Wallet, FAUCET_KEY_NAME};

/// The anvil JSON-RPC port, in docker notation.
pub const RPC_PORT: &str = "8545/tcp";

/// Wei per gwei.
pub const GWEI: u64 = 1_000_000_000;

/// Ether each genesis account is seeded with.
const GENESIS_BALANCE_ETHER: u64 = 10_000_000;

/// Accounts anvil derives from its default mnemonic.
const GENESIS_ACCOUNTS: u64 = 10;

const CHAIN_FAMILY: &str = "ethereum";

/// Wei value of `n` ether.
pub fn ether(n: u64) -> U256 {
    U256::from(n) * U256::from(GWEI) * U256::from(GWEI)
}

/// Default configuration for an anvil devnet chain.
pub fn anvil_chain_config(name: impl Into<String>) -> ChainConfig {
    ChainConfig {
        kind: ChainKind::Ethereum,
        name: name.into(),
        // default anvil chain-id
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

/// An anvil devnet node.
pub struct EthereumChain {
    test_name: String,
    cfg: ChainConfig,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    lifecycle: Option<ContainerLifecycle>,
    volume_name: Option<String>,
    network_id: Option<String>,
    host_rpc: Option<String>,
    genesis_wallets: GenesisWallets,
    keystore: RwLock<HashMap<String, String>>,
    log_errors: Mutex<Option<LogStreamErrors>>,
}

impl EthereumChain {
    /// New unconfigured node. Nothing touches the engine until
    /// [`ChainNode::initialize`].
    pub fn new(test_name: impl Into<String>, cfg: ChainConfig) -> Self {
        Self {
            test_name: test_name.into(),
            cfg,
            runtime: None,
            lifecycle: None,
            volume_name: None,
            network_id: None,
            host_rpc: None,
            genesis_wallets: GenesisWallets::new(),
            keystore: RwLock::new(HashMap::new()),
            log_errors: Mutex::new(None),
        }
    }

    /// Directory `cast` reads and writes encrypted keystores in.
    pub fn keystore_dir(&self) -> String {
        format!("{}/.foundry/keystores", self.home_dir())
    }

    /// Volume bind mounting the node's home directory.
    fn bind(&self) -> Result<Vec<String>, ChainError> {
        let volume = self
            .volume_name
            .as_ref()
            .ok_or_else(|| ChainError::NotInitialized(self.cfg.name.clone()))?;
        Ok(vec![format!("{}:{}", volume, self.home_dir())])
    }

    fn job_runner(&self) -> Result<JobRunner, ChainError> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| ChainError::NotInitialized(self.cfg.name.clone()))?;
        let network = self
            .network_id
            .as_ref()
            .ok_or_else(|| ChainError::NotInitialized(self.cfg.name.clone()))?;
        let image = self.cfg.primary_image()?;
        Ok(JobRunner::new(
            runtime.clone(),
            image.reference(),
            network.clone(),
            &self.test_name,
            self.bind()?,
        ))
    }

    fn keystore_path(&self, key_name: &str) -> Result<String, ChainError> {
        self.keystore
            .read()
            .get(key_name)
            .cloned()
            .ok_or_else(|| ChainError::UnknownKey(key_name.to_string()))
    }

    /// The startup command line and any extra bind mounts it needs.
    fn start_command(&self) -> Result<(Vec<String>, Vec<BindMount>), ChainError> {
        let mut cmd = vec![
            self.cfg.bin.clone(),
            "--host".to_string(),
            "0.0.0.0".to_string(),
            "--block-time".to_string(),
            self.cfg.block_time_secs.to_string(),
            "--accounts".to_string(),
            GENESIS_ACCOUNTS.to_string(),
            "--balance".to_string(),
            GENESIS_BALANCE_ETHER.to_string(),
        ];
        let mut mounts = Vec::new();
        if let Some(state_file) = self.cfg.load_state_override() {
            let host_path = std::env::current_dir()?.join(state_file);
            let base = Path::new(state_file)
                .file_name()
                .ok_or_else(|| {
                    ChainError::Config(format!("invalid load-state path {state_file:?}"))
                })?
                .to_string_lossy()
                .into_owned();
            let target = format!("{}/{}", self.home_dir(), base);
            mounts.push(BindMount {
                source: host_path.to_string_lossy().into_owned(),
                target: target.clone(),
            });
            cmd.push("--load-state".to_string());
            cmd.push(target);
        }
        Ok((cmd, mounts))
    }

    /// Take the log-stream error channel, if the caller wants to observe
    /// background streaming failures.
    pub fn take_log_errors(&self) -> Option<LogStreamErrors> {
        self.log_errors.lock().take()
    }
}

#[async_trait]
impl HeightQuery for EthereumChain {
    async fn height(&self) -> Result<u64, ChainError> {
        let cmd = vec![
            "cast".to_string(),
            "block-number".to_string(),
            "--rpc-url".to_string(),
            self.rpc_address(),
        ];
        let out = self.exec(cmd, vec![]).await?;
        let trimmed = out.stdout_trimmed();
        trimmed.parse::<u64>().map_err(|e| ChainError::InvalidHeight {
            output: trimmed.to_string(),
            source: e,
        })
    }
}

#[async_trait]
impl ChainNode for EthereumChain {
    fn config(&self) -> &ChainConfig {
        &self.cfg
    }

    fn name(&self) -> String {
        format!(
            "anvil-{}-{}",
            self.cfg.chain_id,
            sanitize_container_name(&self.test_name)
        )
    }

    fn hostname(&self) -> String {
        condense_host_name(&self.name())
    }

    fn home_dir(&self) -> String {
        "/home/foundry".to_string()
    }

    fn rpc_address(&self) -> String {
        format!("http://{}:8545", self.hostname())
    }

    fn host_rpc_address(&self) -> Option<String> {
        self.host_rpc.clone()
    }

    fn grpc_address(&self) -> Result<String, ChainError> {
        Err(ChainError::unsupported(CHAIN_FAMILY, "grpc_address"))
    }

    async fn initialize(
        &mut self,
        test_name: &str,
        runtime: Arc<dyn ContainerRuntime>,
        network_id: &str,
    ) -> Result<(), ChainError> {
        self.cfg.validate()?;
        self.test_name = test_name.to_string();

        // Best-effort: the image may already be present locally.
        for image in &self.cfg.images {
            if let Err(e) = runtime.pull_image(&image.reference()).await {
                warn!("failed to pull {}: {e}", image.reference());
            }
        }

        let name = self.name();
        let volume = create_owned_volume(&runtime, test_name, &name).await?;
        let image = self.cfg.primary_image()?;
        set_volume_owner(&runtime, &volume, image.uid_gid.as_deref(), test_name).await?;

        self.lifecycle = Some(ContainerLifecycle::new(runtime.clone(), name));
        self.volume_name = Some(volume);
        self.network_id = Some(network_id.to_string());
        self.runtime = Some(runtime);
        Ok(())
    }

    async fn start(&mut self, additional_genesis: &[WalletAmount]) -> Result<(), ChainError> {
        if !additional_genesis.is_empty() {
            // anvil's genesis accounts are fixed by its mnemonic.
            warn!(
                "chain {}: ignoring {} additional genesis accounts",
                self.cfg.name,
                additional_genesis.len()
            );
        }
        let (cmd, mounts) = self.start_command()?;
        let network_id = self
            .network_id
            .clone()
            .ok_or_else(|| ChainError::NotInitialized(self.cfg.name.clone()))?;
        let lifecycle = self
            .lifecycle
            .as_ref()
            .ok_or_else(|| ChainError::NotInitialized(self.cfg.name.clone()))?;

        let spec = ContainerSpec {
            name: self.name(),
            image: self.cfg.primary_image()?.reference(),
            cmd,
            env: vec![],
            exposed_ports: vec![RPC_PORT.to_string()],
            binds: self.bind()?,
            mounts,
            network_id,
            hostname: self.hostname(),
            labels: cleanup_labels(&self.test_name),
        };
        lifecycle.create(spec).await?;

        info!("starting container {}", self.name());
        lifecycle.start().await?;

        let ports = lifecycle.host_ports(&[RPC_PORT.to_string()]).await?;
        let host_port = ports
            .get(RPC_PORT)
            .ok_or_else(|| ChainError::NotStarted(self.cfg.name.clone()))?;
        self.host_rpc = Some(format!("http://{host_port}"));
        debug!("chain {} host rpc at {host_port}", self.cfg.name);

        match lifecycle.start_log_stream().await {
            Ok(errors) => *self.log_errors.lock() = Some(errors),
            Err(e) => warn!("could not stream logs for {}: {e}", self.name()),
        }

        waiters::wait_for_blocks(
            &*self,
            self.cfg.blocks_to_wait,
            waiters::DEFAULT_READY_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChainError> {
        if let Some(lifecycle) = &self.lifecycle {
            lifecycle.stop().await?;
        }
        Ok(())
    }

    async fn teardown(&self) {
        if let Some(lifecycle) = &self.lifecycle {
            if let Err(e) = lifecycle.remove().await {
                warn!("failed to remove container {}: {e}", self.name());
            }
        }
        if let (Some(runtime), Some(volume)) = (&self.runtime, &self.volume_name) {
            if let Err(e) = runtime.remove_volume(volume).await {
                warn!("failed to remove volume {volume}: {e}");
            }
        }
    }

    async fn exec(&self, cmd: Vec<String>, env: Vec<String>) -> Result<ExecOutput, ChainError> {
        Ok(self.job_runner()?.run(cmd, env).await?)
    }

    async fn get_address(&self, key_name: &str) -> Result<Vec<u8>, ChainError> {
        let keystore = self.keystore_path(key_name)?;
        let cmd = vec![
            "cast".to_string(),
            "wallet".to_string(),
            "address".to_string(),
            "--keystore".to_string(),
            keystore,
            "--password".to_string(),
            String::new(),
        ];
        let out = self.exec(cmd, vec![]).await?;
        let address = out.stdout_trimmed();
        if address.is_empty() {
            return Err(ChainError::Protocol {
                what: "wallet address",
                output: out.stderr.trim().to_string(),
            });
        }
        Ok(address.as_bytes().to_vec())
    }

    async fn create_key(&self, key_name: &str) -> Result<(), ChainError> {
        let cmd = vec![
            "cast".to_string(),
            "wallet".to_string(),
            "new".to_string(),
            self.keystore_dir(),
            "--unsafe-password".to_string(),
            String::new(),
        ];
        let out = self.exec(cmd, vec![]).await?;
        let path = parse_keystore_path(&out.stdout).ok_or_else(|| ChainError::Protocol {
            what: "keystore path",
            output: out.stdout.trim().to_string(),
        })?;
        self.keystore.write().insert(key_name.to_string(), path);
        Ok(())
    }

    async fn recover_key(&self, key_name: &str, mnemonic: &str) -> Result<(), ChainError> {
        let cmd = vec![
            "cast".to_string(),
            "wallet".to_string(),
            "import".to_string(),
            "--keystore-dir".to_string(),
            self.keystore_dir(),
            "--mnemonic".to_string(),
            mnemonic.to_string(),
            "--unsafe-password".to_string(),
            String::new(),
            key_name.to_string(),
        ];
        self.exec(cmd, vec![]).await?;
        let path = format!("{}/{}", self.keystore_dir(), key_name);
        self.keystore.write().insert(key_name.to_string(), path);
        Ok(())
    }

    async fn build_wallet(
        &self,
        key_name: &str,
        mnemonic: Option<&str>,
    ) -> Result<Wallet, ChainError> {
        match mnemonic {
            Some(mnemonic) => self.recover_key(key_name, mnemonic).await?,
            None => {
                if key_name == FAUCET_KEY_NAME {
                    // The faucet's key material is part of the genesis
                    // config; no keystore entry is derived for it.
                    return Ok(self.genesis_wallets.faucet(key_name));
                }
                self.create_key(key_name).await?;
            }
        }
        let address = self.get_address(key_name).await?;
        Ok(Wallet::new(key_name, String::from_utf8_lossy(&address)))
    }

    async fn build_relayer_wallet(&self, _key_name: &str) -> Result<Wallet, ChainError> {
        Err(ChainError::unsupported(CHAIN_FAMILY, "build_relayer_wallet"))
    }

    async fn get_balance(&self, address: &str, _denom: &str) -> Result<U256, ChainError> {
        let cmd = vec![
            "cast".to_string(),
            "balance".to_string(),
            address.to_string(),
            "--rpc-url".to_string(),
            self.rpc_address(),
        ];
        let out = self.exec(cmd, vec![]).await?;
        let trimmed = out.stdout_trimmed();
        U256::from_dec_str(trimmed).map_err(|_| ChainError::Protocol {
            what: "balance",
            output: trimmed.to_string(),
        })
    }

    async fn send_funds(&self, key_name: &str, amount: &WalletAmount) -> Result<(), ChainError> {
        let mut cmd = vec![
            "cast".to_string(),
            "send".to_string(),
            amount.address.clone(),
            "--value".to_string(),
            amount.amount.to_string(),
        ];
        let has_keystore_entry = self.keystore.read().contains_key(key_name);
        if key_name == FAUCET_KEY_NAME && !has_keystore_entry {
            cmd.push("--private-key".to_string());
            cmd.push(self.genesis_wallets.faucet_private_key().to_string());
        } else {
            cmd.push("--keystore".to_string());
            cmd.push(self.keystore_path(key_name)?);
            cmd.push("--password".to_string());
            cmd.push(String::new());
        }
        cmd.push("--rpc-url".to_string());
        cmd.push(self.rpc_address());
        self.exec(cmd, vec![]).await?;
        Ok(())
    }

    async fn send_ibc_transfer(
        &self,
        _channel_id: &str,
        _key_name: &str,
        _amount: &WalletAmount,
    ) -> Result<String, ChainError> {
        Err(ChainError::unsupported(CHAIN_FAMILY, "send_ibc_transfer"))
    }

    async fn export_state(&self, _height: Option<u64>) -> Result<String, ChainError> {
        Err(ChainError::unsupported(CHAIN_FAMILY, "export_state"))
    }
}

/// Pick the keystore path out of `cast wallet new` output.
fn parse_keystore_path(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        line.split_once("keystore file:")
            .map(|(_, path)| path.trim().to_string())
    })
}

#[cfg(test)]
mod tests;
