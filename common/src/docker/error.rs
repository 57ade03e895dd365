//! Error types for the container runtime layer.

use thiserror::Error;

/// Error type for container engine operations.
#[derive(Error, Debug)]
pub enum DockerError {
    /// Engine API error reported by the docker daemon.
    #[error("docker api error: {0}")]
    Api(#[from] bollard::errors::Error),

    /// A lifecycle transition was attempted from an incompatible state.
    #[error("container {name} is {state}, cannot {action}")]
    StateConflict {
        /// Container name.
        name: String,
        /// State the container was actually in.
        state: &'static str,
        /// Transition that was rejected.
        action: &'static str,
    },

    /// No image was configured for the container about to be created.
    #[error("no image configured for container {0}")]
    MissingImage(String),

    /// The engine never published a host binding for an exposed port.
    #[error("container {name} has no published host port for {port}")]
    PortNotPublished {
        /// Container name.
        name: String,
        /// Container-internal port, e.g. `8545/tcp`.
        port: String,
    },

    /// A one-shot exec job exited with a non-zero status.
    #[error("command {command} exited with status {exit_code}: {stderr}")]
    JobFailed {
        /// The command line that was run.
        command: String,
        /// Exit status reported by the engine.
        exit_code: i64,
        /// Captured standard error.
        stderr: String,
    },

    /// An operation referenced a container that was never created.
    #[error("container {0} was never created")]
    NotCreated(String),

    /// Engine-level failure that is not an API error, e.g. an injected mock
    /// fault or a malformed engine response.
    #[error("container engine failure: {0}")]
    Engine(String),
}

impl DockerError {
    /// Whether the error represents a start/create conflict rather than an
    /// engine failure. Used by callers that want to distinguish programmer
    /// errors from infrastructure flakiness.
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, DockerError::StateConflict { .. })
    }
}
