//! Multi-chain orchestration.
//!
//! An [`Interchain`] owns a set of chain nodes sharing one docker network
//! for the duration of a test run. `build` brings every chain to readiness
//! (initialize, start, wait for blocks); `close` tears down every resource
//! the run created, tolerating individual failures so one stuck container
//! never strands the rest.

pub mod network;

use futures::future::join_all;
use log::{error, info, warn};
use std::sync::Arc;

use interlab_chain::{ChainError, ChainNode, WalletAmount};
use interlab_common::docker::ContainerRuntime;

pub use network::setup_network;

/// Options for one [`Interchain::build`] run.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Test name stamped into cleanup labels and container names.
    pub test_name: String,
    /// Build chains one after another in insertion order instead of
    /// concurrently. Use when a caller imposes a dependency order.
    pub sequential: bool,
    /// Join an existing network instead of creating one. A network created
    /// by `build` is removed by `close`; a provided one is left alone.
    pub network_id: Option<String>,
}

impl BuildOptions {
    /// Concurrent build on a fresh network.
    pub fn new(test_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            sequential: false,
            network_id: None,
        }
    }

    /// Build chains sequentially in insertion order.
    pub fn sequential(mut self) -> Self {
        self.sequential = true;
        self
    }

    /// Attach chains to an existing network.
    pub fn with_network(mut self, network_id: impl Into<String>) -> Self {
        self.network_id = Some(network_id.into());
        self
    }
}

/// The set of chains sharing one network for a single test run.
#[derive(Default)]
pub struct Interchain {
    chains: Vec<Box<dyn ChainNode>>,
    genesis_grants: Vec<(String, WalletAmount)>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    created_network: Option<String>,
    built: bool,
}

impl Interchain {
    /// Empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chain to the build set. Chains build in insertion order when
    /// the build is sequential. Duplicate logical names are rejected.
    pub fn add_chain(&mut self, chain: Box<dyn ChainNode>) -> Result<(), ChainError> {
        let name = &chain.config().name;
        if self.chains.iter().any(|c| &c.config().name == name) {
            return Err(ChainError::Config(format!(
                "duplicate chain name {name} in interchain"
            )));
        }
        self.chains.push(chain);
        Ok(())
    }

    /// Grant an extra genesis account on the named chain when it starts.
    /// Only meaningful for families whose genesis is assembled at start.
    pub fn add_genesis_account(
        &mut self,
        chain_name: impl Into<String>,
        amount: WalletAmount,
    ) -> &mut Self {
        self.genesis_grants.push((chain_name.into(), amount));
        self
    }

    /// Look up a chain by its logical name.
    pub fn chain(&self, name: &str) -> Option<&dyn ChainNode> {
        self.chains
            .iter()
            .find(|c| c.config().name == name)
            .map(|c| c.as_ref())
    }

    /// Mutable lookup by logical name.
    pub fn chain_mut(&mut self, name: &str) -> Option<&mut Box<dyn ChainNode>> {
        self.chains.iter_mut().find(|c| c.config().name == name)
    }

    /// All chains in insertion order.
    pub fn chains(&self) -> impl Iterator<Item = &dyn ChainNode> {
        self.chains.iter().map(|c| c.as_ref())
    }

    /// Bring every chain to readiness.
    ///
    /// Configurations are validated up front, so a misconfigured chain
    /// aborts the build before any engine resource exists. A failure later
    /// in the build aborts with the first hard error after a best-effort
    /// teardown of everything already created.
    pub async fn build(
        &mut self,
        runtime: Arc<dyn ContainerRuntime>,
        opts: BuildOptions,
    ) -> Result<(), ChainError> {
        if self.built {
            return Err(ChainError::Config(
                "interchain has already been built".to_string(),
            ));
        }
        for chain in &self.chains {
            chain.config().validate()?;
        }

        let network_id = match &opts.network_id {
            Some(id) => id.clone(),
            None => {
                let id = setup_network(runtime.as_ref(), &opts.test_name).await?;
                self.created_network = Some(id.clone());
                id
            }
        };
        self.runtime = Some(runtime.clone());

        let result = if opts.sequential {
            self.build_sequential(&runtime, &opts.test_name, &network_id)
                .await
        } else {
            self.build_concurrent(&runtime, &opts.test_name, &network_id)
                .await
        };

        if let Err(e) = result {
            error!("interchain build failed: {e}; attempting partial cleanup");
            self.teardown_all().await;
            return Err(e);
        }
        self.built = true;
        Ok(())
    }

    async fn build_sequential(
        &mut self,
        runtime: &Arc<dyn ContainerRuntime>,
        test_name: &str,
        network_id: &str,
    ) -> Result<(), ChainError> {
        let grants = std::mem::take(&mut self.genesis_grants);
        for chain in self.chains.iter_mut() {
            build_one(chain.as_mut(), runtime, test_name, network_id, &grants).await?;
        }
        Ok(())
    }

    async fn build_concurrent(
        &mut self,
        runtime: &Arc<dyn ContainerRuntime>,
        test_name: &str,
        network_id: &str,
    ) -> Result<(), ChainError> {
        let grants = std::mem::take(&mut self.genesis_grants);
        let builds = self.chains.iter_mut().map(|chain| {
            let runtime = runtime.clone();
            let grants = &grants;
            async move { build_one(chain.as_mut(), &runtime, test_name, network_id, grants).await }
        });
        let results = join_all(builds).await;
        match results.into_iter().find_map(Result::err) {
            Some(first) => Err(first),
            None => Ok(()),
        }
    }

    async fn teardown_all(&self) {
        join_all(self.chains.iter().map(|chain| chain.teardown())).await;
        if let (Some(runtime), Some(network)) = (&self.runtime, &self.created_network) {
            if let Err(e) = runtime.remove_network(network).await {
                warn!("failed to remove network {network}: {e}");
            }
        }
    }

    /// Tear down every container, volume and network this run created.
    /// Individual failures are logged and swallowed so cleanup always runs
    /// to completion. Idempotent.
    pub async fn close(&mut self) {
        info!("tearing down interchain ({} chains)", self.chains.len());
        self.teardown_all().await;
        self.created_network = None;
        self.built = false;
    }
}

async fn build_one(
    chain: &mut dyn ChainNode,
    runtime: &Arc<dyn ContainerRuntime>,
    test_name: &str,
    network_id: &str,
    grants: &[(String, WalletAmount)],
) -> Result<(), ChainError> {
    let name = chain.config().name.clone();
    info!("building chain {name}");
    chain
        .initialize(test_name, runtime.clone(), network_id)
        .await?;
    let genesis: Vec<WalletAmount> = grants
        .iter()
        .filter(|(chain_name, _)| chain_name == &name)
        .map(|(_, amount)| amount.clone())
        .collect();
    chain.start(&genesis).await?;
    info!("chain {name} is ready");
    Ok(())
}
