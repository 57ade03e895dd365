//! Error types for the chain layer.

use interlab_common::docker::DockerError;
use std::num::ParseIntError;
use std::time::Duration;
use thiserror::Error;

/// Error type for chain node operations.
///
/// Variants distinguish the failure classes the harness treats differently:
/// configuration errors are never retried, protocol errors are fatal for the
/// call that produced them, and unsupported-operation errors mark a
/// capability gap rather than a flaky environment.
#[derive(Error, Debug)]
pub enum ChainError {
    /// Invalid or incomplete chain configuration.
    #[error("invalid chain configuration: {0}")]
    Config(String),

    /// Failure in the container runtime layer.
    #[error(transparent)]
    Docker(#[from] DockerError),

    /// I/O error resolving host paths (e.g. a load-state file).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A height query produced output that is not a base-10 integer.
    #[error("height query returned {output:?}, not a base-10 integer")]
    InvalidHeight {
        /// The trimmed output that failed to parse.
        output: String,
        /// Underlying parse failure.
        #[source]
        source: ParseIntError,
    },

    /// A CLI invocation produced output the harness could not interpret.
    #[error("unexpected {what} output: {output:?}")]
    Protocol {
        /// What was being parsed.
        what: &'static str,
        /// The offending output, truncated for logging.
        output: String,
    },

    /// The chain family does not implement the requested operation.
    #[error("operation {operation} is unsupported for {chain} chains")]
    Unsupported {
        /// Chain family name.
        chain: &'static str,
        /// Operation that was requested.
        operation: &'static str,
    },

    /// No keystore entry exists for the given key name.
    #[error("no key named {0} in the node keystore")]
    UnknownKey(String),

    /// The node has not been initialized yet.
    #[error("chain {0} has not been initialized")]
    NotInitialized(String),

    /// The node has not been started yet.
    #[error("chain {0} has not been started")]
    NotStarted(String),

    /// An RPC endpoint never became ready within its deadline.
    #[error("rpc endpoint {url} not ready within {timeout:?}")]
    RpcNotReady {
        /// Endpoint that was probed.
        url: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// A readiness condition did not hold within its deadline.
    #[error("timed out after {timeout:?} waiting for {condition}")]
    DeadlineExceeded {
        /// Human-readable description of the awaited condition.
        condition: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },
}

impl ChainError {
    /// Shorthand for the unsupported-operation variant.
    pub fn unsupported(chain: &'static str, operation: &'static str) -> Self {
        ChainError::Unsupported { chain, operation }
    }

    /// Whether this error marks a capability gap rather than a failure.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, ChainError::Unsupported { .. })
    }
}
