//! Chain node layer of the Interlab test harness.
//!
//! A [`ChainNode`] is one containerized blockchain node under test. Each
//! supported chain family implements the same capability trait on top of the
//! container plumbing in `interlab_common`:
//!
//! - [`ethereum::EthereumChain`]: anvil-style Ethereum devnets
//! - [`cosmos::CosmosChain`]: Cosmos-SDK single-validator chains
//!
//! Readiness is explicit: `start` only returns once the node has produced
//! its configured number of blocks, so a started chain is always queryable.

pub mod config;
pub mod cosmos;
pub mod error;
pub mod ethereum;
pub mod node;
pub mod waiters;
pub mod wallet;

pub use config::{ChainConfig, ChainKind, DockerImage, WalletAmount};
pub use error::ChainError;
pub use node::{ChainNode, HeightQuery};
pub use wallet::{Wallet, FAUCET_KEY_NAME};
