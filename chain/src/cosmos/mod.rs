//! Cosmos-SDK chain family.
//!
//! Runs a single-validator chain: genesis is assembled through one-shot jobs
//! (`init`, `keys add`, `add-genesis-account`, `gentx`, `collect-gentxs`)
//! against the node's volume, then the long-running `start` container comes
//! up. All key material lives in the `test` keyring backend under the
//! node's home directory.

use async_trait::async_trait;
use interlab_common::docker::{
    cleanup_labels, condense_host_name, create_owned_volume, sanitize_container_name,
    set_volume_owner, ContainerLifecycle, ContainerRuntime, ContainerSpec, ExecOutput, JobRunner,
    LogStreamErrors,
};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use primitive_types::U256;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ChainConfig, ChainKind, DockerImage, WalletAmount};
use crate::error::ChainError;
use crate::node::{ChainNode, HeightQuery};
use crate::waiters;
use crate::wallet::{Wallet, FAUCET_KEY_NAME};

/// CometBFT RPC port, in docker notation.
pub const RPC_PORT: &str = "26657/tcp";
/// gRPC query port.
pub const GRPC_PORT: &str = "9090/tcp";
/// REST API port.
pub const API_PORT: &str = "1317/tcp";
/// P2P gossip port.
pub const P2P_PORT: &str = "26656/tcp";

const CHAIN_FAMILY: &str = "cosmos";

/// Key name of the single genesis validator.
const VALIDATOR_KEY: &str = "validator";

/// Base units granted to the validator at genesis.
const VALIDATOR_GENESIS_AMOUNT: u64 = 10_000_000_000_000;
/// Base units the validator self-delegates in its gentx.
const VALIDATOR_STAKE_AMOUNT: u64 = 5_000_000_000_000;
/// Base units granted to the faucet at genesis.
const FAUCET_GENESIS_AMOUNT: u64 = 100_000_000_000_000;

/// Configuration for a Cosmos-SDK chain run from the given image.
pub fn cosmos_chain_config(
    name: impl Into<String>,
    chain_id: impl Into<String>,
    bin: impl Into<String>,
    bech32_prefix: impl Into<String>,
    denom: impl Into<String>,
    image: DockerImage,
) -> ChainConfig {
    let denom = denom.into();
    ChainConfig {
        kind: ChainKind::Cosmos,
        name: name.into(),
        chain_id: chain_id.into(),
        images: vec![image],
        bin: bin.into(),
        bech32_prefix: bech32_prefix.into(),
        gas_prices: format!("0.00{denom}"),
        denom,
        gas_adjustment: 1.3,
        block_time_secs: 2,
        blocks_to_wait: 2,
        config_overrides: HashMap::new(),
    }
}

/// A single-validator Cosmos-SDK node.
pub struct CosmosChain {
    test_name: String,
    cfg: ChainConfig,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    lifecycle: Option<ContainerLifecycle>,
    volume_name: Option<String>,
    network_id: Option<String>,
    host_rpc: Option<String>,
    host_grpc: Option<String>,
    keystore: RwLock<HashMap<String, String>>,
    log_errors: Mutex<Option<LogStreamErrors>>,
}

impl CosmosChain {
    /// New unconfigured node.
    pub fn new(test_name: impl Into<String>, cfg: ChainConfig) -> Self {
        Self {
            test_name: test_name.into(),
            cfg,
            runtime: None,
            lifecycle: None,
            volume_name: None,
            network_id: None,
            host_rpc: None,
            host_grpc: None,
            keystore: RwLock::new(HashMap::new()),
            log_errors: Mutex::new(None),
        }
    }

    /// Directory the `test` keyring backend stores keys in.
    pub fn keyring_dir(&self) -> String {
        format!("{}/keyring-test", self.home_dir())
    }

    /// Host-reachable gRPC address, populated by `start`.
    pub fn host_grpc_address(&self) -> Option<String> {
        self.host_grpc.clone()
    }

    /// In-network CometBFT RPC endpoint for `--node` flags.
    fn node_flag(&self) -> String {
        format!("tcp://{}:26657", self.hostname())
    }

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

    fn register_key(&self, key_name: &str) {
        self.keystore
            .write()
            .insert(key_name.to_string(), self.keyring_dir());
    }

    /// Flags common to every keyring-touching command.
    fn key_flags(&self) -> Vec<String> {
        vec![
            "--keyring-backend".to_string(),
            "test".to_string(),
            "--home".to_string(),
            self.home_dir(),
        ]
    }

    /// Flags common to every transaction command.
    fn tx_flags(&self) -> Vec<String> {
        let mut flags = vec![
            "--chain-id".to_string(),
            self.cfg.chain_id.clone(),
            "--node".to_string(),
            self.node_flag(),
        ];
        flags.extend(self.key_flags());
        if !self.cfg.gas_prices.is_empty() {
            flags.push("--gas-prices".to_string());
            flags.push(self.cfg.gas_prices.clone());
            flags.push("--gas".to_string());
            flags.push("auto".to_string());
            flags.push("--gas-adjustment".to_string());
            flags.push(self.cfg.gas_adjustment.to_string());
        }
        flags.push("--output".to_string());
        flags.push("json".to_string());
        flags.push("--yes".to_string());
        flags
    }

    /// The one-shot command lines that assemble a single-validator genesis,
    /// in execution order.
    fn genesis_commands(&self, additional_genesis: &[WalletAmount]) -> Vec<Vec<String>> {
        let bin = &self.cfg.bin;
        let home = self.home_dir();
        let denom = &self.cfg.denom;
        let mut commands = Vec::new();

        commands.push(vec![
            bin.clone(),
            "init".to_string(),
            self.cfg.name.clone(),
            "--chain-id".to_string(),
            self.cfg.chain_id.clone(),
            "--home".to_string(),
            home.clone(),
            "-o".to_string(),
        ]);
        for key in [VALIDATOR_KEY, FAUCET_KEY_NAME] {
            let mut cmd = vec![bin.clone(), "keys".to_string(), "add".to_string(), key.to_string()];
            cmd.extend(self.key_flags());
            cmd.push("--output".to_string());
            cmd.push("json".to_string());
            commands.push(cmd);
        }
        let mut grants: Vec<(String, String)> = vec![
            (
                VALIDATOR_KEY.to_string(),
                format!("{VALIDATOR_GENESIS_AMOUNT}{denom}"),
            ),
            (
                FAUCET_KEY_NAME.to_string(),
                format!("{FAUCET_GENESIS_AMOUNT}{denom}"),
            ),
        ];
        for wallet in additional_genesis {
            grants.push((wallet.address.clone(), format!("{}{}", wallet.amount, wallet.denom)));
        }
        for (account, coins) in grants {
            let mut cmd = vec![
                bin.clone(),
                "add-genesis-account".to_string(),
                account,
                coins,
            ];
            cmd.extend(self.key_flags());
            commands.push(cmd);
        }
        let mut gentx = vec![
            bin.clone(),
            "gentx".to_string(),
            VALIDATOR_KEY.to_string(),
            format!("{VALIDATOR_STAKE_AMOUNT}{denom}"),
            "--chain-id".to_string(),
            self.cfg.chain_id.clone(),
        ];
        gentx.extend(self.key_flags());
        commands.push(gentx);
        commands.push(vec![
            bin.clone(),
            "collect-gentxs".to_string(),
            "--home".to_string(),
            home,
        ]);
        commands
    }

    /// The long-running node command line.
    fn start_command(&self) -> Vec<String> {
        let mut cmd = vec![
            self.cfg.bin.clone(),
            "start".to_string(),
            "--home".to_string(),
            self.home_dir(),
            "--rpc.laddr".to_string(),
            "tcp://0.0.0.0:26657".to_string(),
            "--grpc.address".to_string(),
            "0.0.0.0:9090".to_string(),
        ];
        if !self.cfg.gas_prices.is_empty() {
            cmd.push("--minimum-gas-prices".to_string());
            cmd.push(self.cfg.gas_prices.clone());
        }
        cmd
    }

    /// Take the log-stream error channel.
    pub fn take_log_errors(&self) -> Option<LogStreamErrors> {
        self.log_errors.lock().take()
    }
}

#[async_trait]
impl HeightQuery for CosmosChain {
    async fn height(&self) -> Result<u64, ChainError> {
        let cmd = vec![
            self.cfg.bin.clone(),
            "status".to_string(),
            "--node".to_string(),
            self.node_flag(),
        ];
        let out = self.exec(cmd, vec![]).await?;
        // Older SDK versions print status to stderr.
        let raw = if out.stdout.trim().is_empty() {
            out.stderr.clone()
        } else {
            out.stdout.clone()
        };
        parse_status_height(&raw)
    }
}

#[async_trait]
impl ChainNode for CosmosChain {
    fn config(&self) -> &ChainConfig {
        &self.cfg
    }

    fn name(&self) -> String {
        format!(
            "{}-{}-{}",
            self.cfg.name,
            self.cfg.chain_id,
            sanitize_container_name(&self.test_name)
        )
    }

    fn hostname(&self) -> String {
        condense_host_name(&self.name())
    }

    fn home_dir(&self) -> String {
        format!("/var/cosmos-chain/{}", self.cfg.name)
    }

    fn rpc_address(&self) -> String {
        format!("http://{}:26657", self.hostname())
    }

    fn host_rpc_address(&self) -> Option<String> {
        self.host_rpc.clone()
    }

    fn grpc_address(&self) -> Result<String, ChainError> {
        Ok(format!("{}:9090", self.hostname()))
    }

    async fn initialize(
        &mut self,
        test_name: &str,
        runtime: Arc<dyn ContainerRuntime>,
        network_id: &str,
    ) -> Result<(), ChainError> {
        self.cfg.validate()?;
        self.test_name = test_name.to_string();

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
        let lifecycle = self
            .lifecycle
            .as_ref()
            .ok_or_else(|| ChainError::NotInitialized(self.cfg.name.clone()))?;
        let network_id = self
            .network_id
            .clone()
            .ok_or_else(|| ChainError::NotInitialized(self.cfg.name.clone()))?;

        info!("assembling genesis for chain {}", self.cfg.name);
        for cmd in self.genesis_commands(additional_genesis) {
            self.exec(cmd, vec![]).await?;
        }
        self.register_key(VALIDATOR_KEY);
        self.register_key(FAUCET_KEY_NAME);

        let spec = ContainerSpec {
            name: self.name(),
            image: self.cfg.primary_image()?.reference(),
            cmd: self.start_command(),
            env: vec![],
            exposed_ports: vec![
                RPC_PORT.to_string(),
                GRPC_PORT.to_string(),
                API_PORT.to_string(),
                P2P_PORT.to_string(),
            ],
            binds: self.bind()?,
            mounts: vec![],
            network_id,
            hostname: self.hostname(),
            labels: cleanup_labels(&self.test_name),
        };
        lifecycle.create(spec).await?;

        info!("starting container {}", self.name());
        lifecycle.start().await?;

        let ports = lifecycle
            .host_ports(&[RPC_PORT.to_string(), GRPC_PORT.to_string()])
            .await?;
        let rpc = ports
            .get(RPC_PORT)
            .ok_or_else(|| ChainError::NotStarted(self.cfg.name.clone()))?;
        let host_rpc = format!("http://{rpc}");
        self.host_rpc = Some(host_rpc.clone());
        self.host_grpc = ports.get(GRPC_PORT).cloned();
        debug!("chain {} host rpc at {rpc}", self.cfg.name);

        match lifecycle.start_log_stream().await {
            Ok(errors) => *self.log_errors.lock() = Some(errors),
            Err(e) => warn!("could not stream logs for {}: {e}", self.name()),
        }

        waiters::wait_for_rpc(&host_rpc, waiters::DEFAULT_READY_TIMEOUT).await?;
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
        if !self.keystore.read().contains_key(key_name) {
            return Err(ChainError::UnknownKey(key_name.to_string()));
        }
        let mut cmd = vec![
            self.cfg.bin.clone(),
            "keys".to_string(),
            "show".to_string(),
            "--address".to_string(),
            key_name.to_string(),
        ];
        cmd.extend(self.key_flags());
        let out = self.exec(cmd, vec![]).await?;
        let address = out.stdout_trimmed();
        if address.is_empty() {
            return Err(ChainError::Protocol {
                what: "key address",
                output: out.stderr.trim().to_string(),
            });
        }
        Ok(address.as_bytes().to_vec())
    }

    async fn create_key(&self, key_name: &str) -> Result<(), ChainError> {
        let mut cmd = vec![
            self.cfg.bin.clone(),
            "keys".to_string(),
            "add".to_string(),
            key_name.to_string(),
        ];
        cmd.extend(self.key_flags());
        cmd.push("--output".to_string());
        cmd.push("json".to_string());
        self.exec(cmd, vec![]).await?;
        self.register_key(key_name);
        Ok(())
    }

    async fn recover_key(&self, key_name: &str, mnemonic: &str) -> Result<(), ChainError> {
        let script = format!(
            "printf '%s\\n' '{mnemonic}' | {} keys add {key_name} --recover --keyring-backend test --home {}",
            self.cfg.bin,
            self.home_dir(),
        );
        let cmd = vec!["sh".to_string(), "-c".to_string(), script];
        self.exec(cmd, vec![]).await?;
        self.register_key(key_name);
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
                let exists = self.keystore.read().contains_key(key_name);
                // The faucet key is created during genesis assembly; hand it
                // back instead of deriving a fresh key over it.
                if !(key_name == FAUCET_KEY_NAME && exists) {
                    self.create_key(key_name).await?;
                }
            }
        }
        let address = self.get_address(key_name).await?;
        Ok(Wallet::new(key_name, String::from_utf8_lossy(&address)))
    }

    async fn build_relayer_wallet(&self, key_name: &str) -> Result<Wallet, ChainError> {
        self.build_wallet(key_name, None).await
    }

    async fn get_balance(&self, address: &str, denom: &str) -> Result<U256, ChainError> {
        let mut cmd = vec![
            self.cfg.bin.clone(),
            "query".to_string(),
            "bank".to_string(),
            "balances".to_string(),
            address.to_string(),
            "--node".to_string(),
            self.node_flag(),
            "--output".to_string(),
            "json".to_string(),
        ];
        cmd.push("--home".to_string());
        cmd.push(self.home_dir());
        let out = self.exec(cmd, vec![]).await?;
        parse_balance(out.stdout_trimmed(), denom)
    }

    async fn send_funds(&self, key_name: &str, amount: &WalletAmount) -> Result<(), ChainError> {
        if !self.keystore.read().contains_key(key_name) {
            return Err(ChainError::UnknownKey(key_name.to_string()));
        }
        let mut cmd = vec![
            self.cfg.bin.clone(),
            "tx".to_string(),
            "bank".to_string(),
            "send".to_string(),
            key_name.to_string(),
            amount.address.clone(),
            format!("{}{}", amount.amount, amount.denom),
        ];
        cmd.extend(self.tx_flags());
        self.exec(cmd, vec![]).await?;
        Ok(())
    }

    async fn send_ibc_transfer(
        &self,
        channel_id: &str,
        key_name: &str,
        amount: &WalletAmount,
    ) -> Result<String, ChainError> {
        if !self.keystore.read().contains_key(key_name) {
            return Err(ChainError::UnknownKey(key_name.to_string()));
        }
        let mut cmd = vec![
            self.cfg.bin.clone(),
            "tx".to_string(),
            "ibc-transfer".to_string(),
            "transfer".to_string(),
            "transfer".to_string(),
            channel_id.to_string(),
            amount.address.clone(),
            format!("{}{}", amount.amount, amount.denom),
            "--from".to_string(),
            key_name.to_string(),
        ];
        cmd.extend(self.tx_flags());
        let out = self.exec(cmd, vec![]).await?;
        let raw = out.stdout_trimmed();
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|_| ChainError::Protocol {
                what: "ibc transfer response",
                output: truncate(raw),
            })?;
        value
            .get("txhash")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ChainError::Protocol {
                what: "ibc transfer response",
                output: truncate(raw),
            })
    }

    async fn export_state(&self, height: Option<u64>) -> Result<String, ChainError> {
        let mut cmd = vec![
            self.cfg.bin.clone(),
            "export".to_string(),
            "--home".to_string(),
            self.home_dir(),
        ];
        if let Some(height) = height {
            cmd.push("--height".to_string());
            cmd.push(height.to_string());
        }
        let out = self.exec(cmd, vec![]).await?;
        // Some SDK versions write the export to stderr.
        if out.stdout.trim().is_empty() {
            Ok(out.stderr)
        } else {
            Ok(out.stdout)
        }
    }
}

/// Extract `latest_block_height` from `<bin> status` output. Key casing
/// differs across SDK versions.
fn parse_status_height(raw: &str) -> Result<u64, ChainError> {
    let trimmed = raw.trim();
    let value: serde_json::Value =
        serde_json::from_str(trimmed).map_err(|_| ChainError::Protocol {
            what: "node status",
            output: truncate(trimmed),
        })?;
    let height = value
        .pointer("/SyncInfo/latest_block_height")
        .or_else(|| value.pointer("/sync_info/latest_block_height"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| ChainError::Protocol {
            what: "node status",
            output: truncate(trimmed),
        })?;
    height.parse::<u64>().map_err(|e| ChainError::InvalidHeight {
        output: height.to_string(),
        source: e,
    })
}

/// Extract the balance of `denom` from a `query bank balances` response.
/// An absent denom is a zero balance, matching bank module semantics.
fn parse_balance(raw: &str, denom: &str) -> Result<U256, ChainError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|_| ChainError::Protocol {
        what: "bank balances",
        output: truncate(raw),
    })?;
    let balances = value
        .get("balances")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ChainError::Protocol {
            what: "bank balances",
            output: truncate(raw),
        })?;
    for entry in balances {
        if entry.get("denom").and_then(|v| v.as_str()) == Some(denom) {
            let amount = entry
                .get("amount")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ChainError::Protocol {
                    what: "bank balances",
                    output: truncate(raw),
                })?;
            return U256::from_dec_str(amount).map_err(|_| ChainError::Protocol {
                what: "bank balances",
                output: amount.to_string(),
            });
        }
    }
    Ok(U256::zero())
}

fn truncate(raw: &str) -> String {
    const MAX: usize = 256;
    if raw.chars().count() <= MAX {
        raw.to_string()
    } else {
        let head: String = raw.chars().take(MAX).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests;
