//! The capability surface the harness requires from a container engine.
//!
//! The trait deliberately does not expose the engine's wire types: callers
//! describe containers and jobs with the plain structs below and the
//! implementation maps them onto whatever client it wraps.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;

use super::error::DockerError;

/// A host file bind-mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    /// Absolute path on the host.
    pub source: String,
    /// Absolute path inside the container.
    pub target: String,
}

/// Description of a long-running node container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Container name, also used as the engine-side handle.
    pub name: String,
    /// Image reference, `repository:tag`.
    pub image: String,
    /// Full command line (binary plus flags).
    pub cmd: Vec<String>,
    /// Environment entries, `KEY=value`.
    pub env: Vec<String>,
    /// Container-internal ports to publish to ephemeral host ports,
    /// in docker notation (`8545/tcp`).
    pub exposed_ports: Vec<String>,
    /// Volume binds, `volume-name:/container/path`.
    pub binds: Vec<String>,
    /// Additional host-file bind mounts.
    pub mounts: Vec<BindMount>,
    /// Docker network the container joins.
    pub network_id: String,
    /// Hostname other containers on the network resolve.
    pub hostname: String,
    /// Labels, including the cleanup markers.
    pub labels: HashMap<String, String>,
}

/// Description of a short-lived exec job run in its own container.
#[derive(Debug, Clone, Default)]
pub struct JobSpec {
    /// Image reference, `repository:tag`.
    pub image: String,
    /// Command line to run.
    pub cmd: Vec<String>,
    /// Environment entries, `KEY=value`.
    pub env: Vec<String>,
    /// Volume binds, `volume-name:/container/path`.
    pub binds: Vec<String>,
    /// Network to join, if the job needs to reach node containers.
    pub network_id: Option<String>,
    /// User to run as, e.g. `0` for root chown jobs.
    pub user: Option<String>,
    /// Labels, including the cleanup markers.
    pub labels: HashMap<String, String>,
}

/// Captured output of a finished exec job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Decoded standard output.
    pub stdout: String,
    /// Decoded standard error.
    pub stderr: String,
}

impl ExecOutput {
    /// Standard output with surrounding whitespace removed. Most CLI tools
    /// under test print a single value followed by a newline.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// One decoded line (or chunk) of container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLine {
    /// Chunk written to the container's stdout.
    Stdout(String),
    /// Chunk written to the container's stderr.
    Stderr(String),
}

/// Capability surface over a container engine.
///
/// One runtime handle serves every node in a test: implementations must be
/// safe for concurrent use. All teardown operations (`stop_container`,
/// `remove_container`, `remove_volume`, `remove_network`) are idempotent:
/// invoking them on an already-gone resource is a no-op, because cleanup
/// paths run under partial failure and may fire twice.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull an image. Callers treat failures as non-fatal (the image may be
    /// cached locally) and must still attempt container creation afterwards.
    async fn pull_image(&self, image: &str) -> Result<(), DockerError>;

    /// Create a named volume carrying the given labels. Returns the volume
    /// name the engine assigned.
    async fn create_volume(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<String, DockerError>;

    /// Remove a volume. No-op if it is already gone.
    async fn remove_volume(&self, name: &str) -> Result<(), DockerError>;

    /// Create a bridge network carrying the given labels. Returns the
    /// network identifier used for later attach/remove calls.
    async fn create_network(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<String, DockerError>;

    /// Remove a network. No-op if it is already gone.
    async fn remove_network(&self, id: &str) -> Result<(), DockerError>;

    /// Create a container from the spec. Returns the engine container id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, DockerError>;

    /// Start a created container.
    async fn start_container(&self, id: &str) -> Result<(), DockerError>;

    /// Stop a running container. No-op if it is not running.
    async fn stop_container(&self, id: &str) -> Result<(), DockerError>;

    /// Force-remove a container. No-op if it is already gone.
    async fn remove_container(&self, id: &str) -> Result<(), DockerError>;

    /// Resolve the host-side `address:port` published for each of the given
    /// container-internal ports. Must only be called on a started container;
    /// a port with no binding yields [`DockerError::PortNotPublished`],
    /// never an empty entry.
    async fn resolve_host_ports(
        &self,
        id: &str,
        ports: &[String],
    ) -> Result<HashMap<String, String>, DockerError>;

    /// Run a one-shot job in an ephemeral container: create, start, wait for
    /// exit, capture output, remove. A non-zero exit status surfaces as
    /// [`DockerError::JobFailed`] with the captured stderr.
    async fn run_job(&self, spec: &JobSpec) -> Result<ExecOutput, DockerError>;

    /// Open the container's log stream. With `follow` the stream stays live
    /// until the container stops or the stream is dropped.
    async fn container_logs(
        &self,
        id: &str,
        follow: bool,
    ) -> Result<BoxStream<'static, Result<LogLine, DockerError>>, DockerError>;
}
