//! The polymorphic chain node capability trait.

use async_trait::async_trait;
use interlab_common::docker::{ContainerRuntime, ExecOutput};
use primitive_types::U256;
use std::sync::Arc;

use crate::config::{ChainConfig, WalletAmount};
use crate::error::ChainError;
use crate::wallet::Wallet;

/// Anything whose current block height can be queried. This is the only
/// capability the readiness pollers need, so mocks can implement it alone.
#[async_trait]
pub trait HeightQuery: Send + Sync {
    /// Current block height. A non-numeric or empty response from the node
    /// is a protocol error, never a zero height.
    async fn height(&self) -> Result<u64, ChainError>;
}

/// One containerized blockchain node under test.
///
/// Lifecycle: construct with a [`ChainConfig`], [`initialize`] once (volume,
/// ownership, runtime binding), [`start`] once (container, port discovery,
/// block-production readiness), then use freely. `stop`/`teardown` are
/// idempotent and safe on a node that never started. Calling `start` before
/// `initialize` is a programming error and fails with
/// [`ChainError::NotInitialized`].
///
/// A family that cannot support an operation must return
/// [`ChainError::Unsupported`] instead of silently doing nothing, so
/// capability gaps surface immediately in calling tests.
///
/// [`initialize`]: ChainNode::initialize
/// [`start`]: ChainNode::start
#[async_trait]
pub trait ChainNode: HeightQuery {
    /// The configuration this node was built from.
    fn config(&self) -> &ChainConfig;

    /// Deterministic container name derived from the chain id and test name.
    fn name(&self) -> String;

    /// Hostname peer containers resolve on the shared network.
    fn hostname(&self) -> String;

    /// The node's home directory inside the container.
    fn home_dir(&self) -> String;

    /// RPC address reachable from inside the docker network.
    fn rpc_address(&self) -> String;

    /// Host-reachable RPC address. `None` until `start` has succeeded.
    fn host_rpc_address(&self) -> Option<String>;

    /// In-network gRPC address, for families that serve gRPC.
    fn grpc_address(&self) -> Result<String, ChainError>;

    /// Pull images (best-effort), create the home volume, fix its ownership
    /// and bind the runtime client and network for later use.
    async fn initialize(
        &mut self,
        test_name: &str,
        runtime: Arc<dyn ContainerRuntime>,
        network_id: &str,
    ) -> Result<(), ChainError>;

    /// Create and start the node container, discover host ports, and block
    /// until the chain has produced its configured number of blocks.
    /// `additional_genesis` seeds extra accounts for families whose genesis
    /// is built at start time.
    async fn start(&mut self, additional_genesis: &[WalletAmount]) -> Result<(), ChainError>;

    /// Stop the node container. Idempotent.
    async fn stop(&self) -> Result<(), ChainError>;

    /// Remove every resource the node created (container, volume). Errors
    /// are logged and swallowed so teardown always runs to completion.
    async fn teardown(&self);

    /// Run an arbitrary command with the node's image, network and volume
    /// binds. The escape hatch for chain-specific CLI operations.
    async fn exec(&self, cmd: Vec<String>, env: Vec<String>) -> Result<ExecOutput, ChainError>;

    /// Resolve the address of a previously created or recovered key.
    async fn get_address(&self, key_name: &str) -> Result<Vec<u8>, ChainError>;

    /// Generate a fresh key under the given name.
    async fn create_key(&self, key_name: &str) -> Result<(), ChainError>;

    /// Recover a deterministic key from a mnemonic under the given name.
    async fn recover_key(&self, key_name: &str, mnemonic: &str) -> Result<(), ChainError>;

    /// Build a wallet: recover when a mnemonic is given, otherwise create a
    /// fresh key. [`crate::FAUCET_KEY_NAME`] is special-cased to the
    /// pre-seeded genesis faucet without touching the keystore.
    async fn build_wallet(
        &self,
        key_name: &str,
        mnemonic: Option<&str>,
    ) -> Result<Wallet, ChainError>;

    /// Build a wallet suitable for a relayer, for families that support it.
    async fn build_relayer_wallet(&self, key_name: &str) -> Result<Wallet, ChainError>;

    /// Balance of `address` in `denom` base units.
    async fn get_balance(&self, address: &str, denom: &str) -> Result<U256, ChainError>;

    /// Transfer funds from a named key to an address.
    async fn send_funds(&self, key_name: &str, amount: &WalletAmount) -> Result<(), ChainError>;

    /// Submit an IBC transfer over the given channel; returns the tx hash.
    async fn send_ibc_transfer(
        &self,
        channel_id: &str,
        key_name: &str,
        amount: &WalletAmount,
    ) -> Result<String, ChainError>;

    /// Export the chain state at a height (or the latest when `None`).
    async fn export_state(&self, height: Option<u64>) -> Result<String, ChainError>;
}
