//! In-memory [`ContainerRuntime`] for engine-free tests.
//!
//! `MockRuntime` tracks volumes, networks and containers the way a real
//! engine would, assigns deterministic host ports, and lets tests script the
//! output of one-shot jobs and inject start/pull failures. Lifecycle and
//! orchestration tests run against it without a docker daemon.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::error::DockerError;
use super::runtime::{ContainerRuntime, ContainerSpec, ExecOutput, JobSpec, LogLine};

/// Scripted handler invoked for every [`ContainerRuntime::run_job`] call.
pub type JobHandler = Box<dyn FnMut(&JobSpec) -> Result<ExecOutput, DockerError> + Send>;

/// Lifecycle state of a mock container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockState {
    Created,
    Started,
    Stopped,
    Removed,
}

#[derive(Clone)]
struct MockContainer {
    name: String,
    spec: ContainerSpec,
    state: MockState,
    host_port_base: u16,
}

#[derive(Default)]
struct MockStore {
    containers: HashMap<String, MockContainer>,
    volumes: Vec<String>,
    networks: Vec<String>,
    next_port_base: u16,
}

/// In-memory container engine.
pub struct MockRuntime {
    store: Mutex<MockStore>,
    job_handler: Mutex<Option<JobHandler>>,
    fail_start_matching: Mutex<Vec<String>>,
    fail_pulls: AtomicBool,
    start_calls: AtomicUsize,
    jobs_run: AtomicUsize,
}

impl MockRuntime {
    /// Create an empty mock engine.
    pub fn new() -> Self {
        Self {
            store: Mutex::new(MockStore {
                next_port_base: 49152,
                ..Default::default()
            }),
            job_handler: Mutex::new(None),
            fail_start_matching: Mutex::new(Vec::new()),
            fail_pulls: AtomicBool::new(false),
            start_calls: AtomicUsize::new(0),
            jobs_run: AtomicUsize::new(0),
        }
    }

    /// Script the output of subsequent `run_job` calls.
    pub fn set_job_handler(
        &self,
        handler: impl FnMut(&JobSpec) -> Result<ExecOutput, DockerError> + Send + 'static,
    ) {
        *self.job_handler.lock() = Some(Box::new(handler));
    }

    /// Make `start_container` fail for any container whose name contains the
    /// given fragment.
    pub fn fail_start_matching(&self, fragment: impl Into<String>) {
        self.fail_start_matching.lock().push(fragment.into());
    }

    /// Make every `pull_image` call fail. Pulls are best-effort for callers,
    /// so this exercises the log-and-continue path.
    pub fn fail_pulls(&self) {
        self.fail_pulls.store(true, Ordering::SeqCst);
    }

    /// Containers that have been created and not yet removed.
    pub fn live_containers(&self) -> usize {
        self.store
            .lock()
            .containers
            .values()
            .filter(|c| c.state != MockState::Removed)
            .count()
    }

    /// Names of live containers.
    pub fn live_container_names(&self) -> Vec<String> {
        self.store
            .lock()
            .containers
            .values()
            .filter(|c| c.state != MockState::Removed)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Volumes that have been created and not yet removed.
    pub fn live_volumes(&self) -> Vec<String> {
        self.store.lock().volumes.clone()
    }

    /// Networks that have been created and not yet removed.
    pub fn live_networks(&self) -> Vec<String> {
        self.store.lock().networks.clone()
    }

    /// Number of `start_container` calls that reached the engine.
    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Number of one-shot jobs that were run.
    pub fn jobs_run(&self) -> usize {
        self.jobs_run.load(Ordering::SeqCst)
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn pull_image(&self, image: &str) -> Result<(), DockerError> {
        if self.fail_pulls.load(Ordering::SeqCst) {
            return Err(DockerError::Engine(format!("no such image: {image}")));
        }
        Ok(())
    }

    async fn create_volume(
        &self,
        name: &str,
        _labels: &HashMap<String, String>,
    ) -> Result<String, DockerError> {
        self.store.lock().volumes.push(name.to_string());
        Ok(name.to_string())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), DockerError> {
        self.store.lock().volumes.retain(|v| v != name);
        Ok(())
    }

    async fn create_network(
        &self,
        name: &str,
        _labels: &HashMap<String, String>,
    ) -> Result<String, DockerError> {
        self.store.lock().networks.push(name.to_string());
        Ok(name.to_string())
    }

    async fn remove_network(&self, id: &str) -> Result<(), DockerError> {
        self.store.lock().networks.retain(|n| n != id);
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, DockerError> {
        let mut store = self.store.lock();
        let id = format!("mock-{}", spec.name);
        if store
            .containers
            .get(&id)
            .is_some_and(|c| c.state != MockState::Removed)
        {
            return Err(DockerError::Engine(format!(
                "container name {} already in use",
                spec.name
            )));
        }
        let base = store.next_port_base;
        store.next_port_base += 16;
        store.containers.insert(
            id.clone(),
            MockContainer {
                name: spec.name.clone(),
                spec: spec.clone(),
                state: MockState::Created,
                host_port_base: base,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let mut store = self.store.lock();
        let container = store
            .containers
            .get_mut(id)
            .ok_or_else(|| DockerError::NotCreated(id.to_string()))?;
        let fail = self
            .fail_start_matching
            .lock()
            .iter()
            .any(|frag| container.name.contains(frag.as_str()));
        if fail {
            return Err(DockerError::Engine(format!(
                "injected start failure for {}",
                container.name
            )));
        }
        container.state = MockState::Started;
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<(), DockerError> {
        if let Some(container) = self.store.lock().containers.get_mut(id) {
            if container.state == MockState::Started {
                container.state = MockState::Stopped;
            }
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), DockerError> {
        if let Some(container) = self.store.lock().containers.get_mut(id) {
            container.state = MockState::Removed;
        }
        Ok(())
    }

    async fn resolve_host_ports(
        &self,
        id: &str,
        ports: &[String],
    ) -> Result<HashMap<String, String>, DockerError> {
        let store = self.store.lock();
        let container = store
            .containers
            .get(id)
            .ok_or_else(|| DockerError::NotCreated(id.to_string()))?;
        if container.state != MockState::Started {
            return Err(DockerError::Engine(format!(
                "container {} is not running",
                container.name
            )));
        }
        let mut resolved = HashMap::new();
        for port in ports {
            let index = container
                .spec
                .exposed_ports
                .iter()
                .position(|p| p == port)
                .ok_or_else(|| DockerError::PortNotPublished {
                    name: container.name.clone(),
                    port: port.clone(),
                })?;
            let host_port = container.host_port_base + index as u16;
            resolved.insert(port.clone(), format!("localhost:{host_port}"));
        }
        Ok(resolved)
    }

    async fn run_job(&self, spec: &JobSpec) -> Result<ExecOutput, DockerError> {
        self.jobs_run.fetch_add(1, Ordering::SeqCst);
        let mut handler = self.job_handler.lock();
        match handler.as_mut() {
            Some(handler) => handler(spec),
            None => Ok(ExecOutput::default()),
        }
    }

    async fn container_logs(
        &self,
        _id: &str,
        _follow: bool,
    ) -> Result<BoxStream<'static, Result<LogLine, DockerError>>, DockerError> {
        Ok(futures::stream::empty().boxed())
    }
}
