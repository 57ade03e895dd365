//! Per-node container lifecycle state machine.
//!
//! Each [`ContainerLifecycle`] owns exactly one container. Transitions are
//! single-flight: a second create or start issued while one is outstanding is
//! rejected with a state conflict before it reaches the engine. Teardown
//! transitions are idempotent and reachable from every state.

use futures::StreamExt;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::error::DockerError;
use super::runtime::{ContainerRuntime, ContainerSpec, LogLine};

/// States of a node container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No container exists yet.
    Uninitialized,
    /// A create call is in flight.
    Creating,
    /// The container exists but has not been started.
    Created,
    /// A start call is in flight.
    Starting,
    /// The container is running.
    Started,
    /// The container was stopped but still exists.
    Stopped,
    /// The container is gone.
    Removed,
}

impl LifecycleState {
    fn name(self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Creating => "creating",
            LifecycleState::Created => "created",
            LifecycleState::Starting => "starting",
            LifecycleState::Started => "started",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Removed => "removed",
        }
    }
}

/// Receiver for errors raised by the background log-streaming task.
pub type LogStreamErrors = mpsc::UnboundedReceiver<DockerError>;

/// Owns the create → start → stop/remove lifecycle of one container.
pub struct ContainerLifecycle {
    runtime: Arc<dyn ContainerRuntime>,
    name: String,
    state: Mutex<LifecycleState>,
    container_id: Mutex<Option<String>>,
    log_task: Mutex<Option<JoinHandle<()>>>,
}

impl ContainerLifecycle {
    /// Bind a lifecycle to a runtime handle and a container name.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, name: impl Into<String>) -> Self {
        Self {
            runtime,
            name: name.into(),
            state: Mutex::new(LifecycleState::Uninitialized),
            container_id: Mutex::new(None),
            log_task: Mutex::new(None),
        }
    }

    /// The container name this lifecycle owns.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Atomically move into a transitional state, rejecting concurrent or
    /// out-of-order transitions.
    fn begin(
        &self,
        allowed: LifecycleState,
        transitional: LifecycleState,
        action: &'static str,
    ) -> Result<(), DockerError> {
        let mut state = self.state.lock();
        if *state != allowed {
            return Err(DockerError::StateConflict {
                name: self.name.clone(),
                state: state.name(),
                action,
            });
        }
        *state = transitional;
        Ok(())
    }

    fn settle(&self, state: LifecycleState) {
        *self.state.lock() = state;
    }

    fn container_id(&self) -> Option<String> {
        self.container_id.lock().clone()
    }

    /// Create the container. The spec must name exactly one image.
    pub async fn create(&self, spec: ContainerSpec) -> Result<(), DockerError> {
        if spec.image.is_empty() {
            return Err(DockerError::MissingImage(self.name.clone()));
        }
        self.begin(LifecycleState::Uninitialized, LifecycleState::Creating, "create")?;
        debug!("creating container {} from {}", self.name, spec.image);
        match self.runtime.create_container(&spec).await {
            Ok(id) => {
                *self.container_id.lock() = Some(id);
                self.settle(LifecycleState::Created);
                Ok(())
            }
            Err(e) => {
                self.settle(LifecycleState::Uninitialized);
                Err(e)
            }
        }
    }

    /// Start the created container.
    pub async fn start(&self) -> Result<(), DockerError> {
        self.begin(LifecycleState::Created, LifecycleState::Starting, "start")?;
        let id = match self.container_id() {
            Some(id) => id,
            None => {
                self.settle(LifecycleState::Uninitialized);
                return Err(DockerError::NotCreated(self.name.clone()));
            }
        };
        debug!("starting container {}", self.name);
        match self.runtime.start_container(&id).await {
            Ok(()) => {
                self.settle(LifecycleState::Started);
                Ok(())
            }
            Err(e) => {
                self.settle(LifecycleState::Created);
                Err(e)
            }
        }
    }

    /// Resolve the published host address for each of the given internal
    /// ports. Only valid once the container is started.
    pub async fn host_ports(
        &self,
        ports: &[String],
    ) -> Result<HashMap<String, String>, DockerError> {
        let state = self.state();
        if state != LifecycleState::Started {
            return Err(DockerError::StateConflict {
                name: self.name.clone(),
                state: state.name(),
                action: "resolve host ports",
            });
        }
        let id = self
            .container_id()
            .ok_or_else(|| DockerError::NotCreated(self.name.clone()))?;
        self.runtime.resolve_host_ports(&id, ports).await
    }

    /// Spawn the background log-streaming task. Lines are forwarded to the
    /// logger under the container's name; stream failures go to the returned
    /// channel so the caller can observe them without blocking on the task.
    pub async fn start_log_stream(&self) -> Result<LogStreamErrors, DockerError> {
        let state = self.state();
        if state != LifecycleState::Started {
            return Err(DockerError::StateConflict {
                name: self.name.clone(),
                state: state.name(),
                action: "stream logs",
            });
        }
        let id = self
            .container_id()
            .ok_or_else(|| DockerError::NotCreated(self.name.clone()))?;
        let mut stream = self.runtime.container_logs(&id, true).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let name = self.name.clone();
        let handle = tokio::spawn(async move {
            while let Some(line) = stream.next().await {
                match line {
                    Ok(LogLine::Stdout(msg)) => debug!("[{}] {}", name, msg.trim_end()),
                    Ok(LogLine::Stderr(msg)) => debug!("[{}] {}", name, msg.trim_end()),
                    Err(e) => {
                        warn!("log stream for {} failed: {}", name, e);
                        let _ = tx.send(e);
                        break;
                    }
                }
            }
        });
        *self.log_task.lock() = Some(handle);
        Ok(rx)
    }

    /// Stop the container. Safe to call in any state; stopping a container
    /// that never started or is already stopped is a no-op.
    pub async fn stop(&self) -> Result<(), DockerError> {
        let id = match self.container_id() {
            Some(id) => id,
            None => return Ok(()),
        };
        {
            let state = self.state.lock();
            if matches!(*state, LifecycleState::Stopped | LifecycleState::Removed) {
                return Ok(());
            }
        }
        debug!("stopping container {}", self.name);
        self.runtime.stop_container(&id).await?;
        self.settle(LifecycleState::Stopped);
        Ok(())
    }

    /// Stop and remove the container. Reachable from any state and
    /// idempotent; used both for orderly teardown and force-cleanup.
    pub async fn remove(&self) -> Result<(), DockerError> {
        if let Some(task) = self.log_task.lock().take() {
            task.abort();
        }
        let id = match self.container_id() {
            Some(id) => id,
            None => {
                self.settle(LifecycleState::Removed);
                return Ok(());
            }
        };
        if self.state() == LifecycleState::Removed {
            return Ok(());
        }
        debug!("removing container {}", self.name);
        if let Err(e) = self.runtime.stop_container(&id).await {
            warn!("failed to stop container {}: {}", self.name, e);
        }
        self.runtime.remove_container(&id).await?;
        self.settle(LifecycleState::Removed);
        Ok(())
    }
}

impl Drop for ContainerLifecycle {
    fn drop(&mut self) {
        if let Some(task) = self.log_task.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::mock::MockRuntime;
    use crate::docker::runtime::ContainerSpec;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "example/node:latest".to_string(),
            cmd: vec!["node".to_string(), "start".to_string()],
            exposed_ports: vec!["8545/tcp".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_rejects_missing_image() {
        let runtime = Arc::new(MockRuntime::new());
        let lifecycle = ContainerLifecycle::new(runtime, "node-a");
        let mut missing = spec("node-a");
        missing.image.clear();
        let err = lifecycle.create(missing).await.unwrap_err();
        assert!(matches!(err, DockerError::MissingImage(_)));
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
    }

    #[tokio::test]
    async fn create_start_stop_remove_round_trip() {
        let runtime = Arc::new(MockRuntime::new());
        let lifecycle = ContainerLifecycle::new(runtime.clone(), "node-a");

        lifecycle.create(spec("node-a")).await.unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Created);

        lifecycle.start().await.unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Started);

        let ports = lifecycle
            .host_ports(&["8545/tcp".to_string()])
            .await
            .unwrap();
        assert!(ports.contains_key("8545/tcp"));

        lifecycle.stop().await.unwrap();
        lifecycle.remove().await.unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Removed);
        assert_eq!(runtime.live_containers(), 0);
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let runtime = Arc::new(MockRuntime::new());
        let lifecycle = ContainerLifecycle::new(runtime, "node-a");

        lifecycle.create(spec("node-a")).await.unwrap();
        lifecycle.start().await.unwrap();

        lifecycle.stop().await.unwrap();
        lifecycle.stop().await.unwrap();
        lifecycle.remove().await.unwrap();
        lifecycle.remove().await.unwrap();
    }

    #[tokio::test]
    async fn teardown_on_never_started_node_is_a_no_op() {
        let runtime = Arc::new(MockRuntime::new());
        let lifecycle = ContainerLifecycle::new(runtime, "node-a");
        lifecycle.stop().await.unwrap();
        lifecycle.remove().await.unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Removed);
    }

    #[tokio::test]
    async fn double_start_is_rejected_before_the_engine() {
        let runtime = Arc::new(MockRuntime::new());
        let lifecycle = ContainerLifecycle::new(runtime.clone(), "node-a");
        lifecycle.create(spec("node-a")).await.unwrap();
        lifecycle.start().await.unwrap();

        let err = lifecycle.start().await.unwrap_err();
        assert!(err.is_state_conflict());
        assert_eq!(runtime.start_calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_creates_produce_exactly_one_container() {
        let runtime = Arc::new(MockRuntime::new());
        let lifecycle = Arc::new(ContainerLifecycle::new(runtime.clone(), "node-a"));

        let a = {
            let lc = lifecycle.clone();
            tokio::spawn(async move { lc.create(spec("node-a")).await })
        };
        let b = {
            let lc = lifecycle.clone();
            tokio::spawn(async move { lc.create(spec("node-a")).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(e) if e.is_state_conflict())));
        assert_eq!(runtime.live_containers(), 1);
    }

    #[tokio::test]
    async fn host_ports_require_a_started_container() {
        let runtime = Arc::new(MockRuntime::new());
        let lifecycle = ContainerLifecycle::new(runtime, "node-a");
        lifecycle.create(spec("node-a")).await.unwrap();
        let err = lifecycle
            .host_ports(&["8545/tcp".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_state_conflict());
    }
}
