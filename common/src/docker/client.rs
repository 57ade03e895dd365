//! Bollard-backed implementation of the [`ContainerRuntime`] capability.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use bollard::network::CreateNetworkOptions;
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use bollard::Docker;
use futures::stream::BoxStream;
use futures::StreamExt;
use log::debug;
use std::collections::HashMap;

use super::error::DockerError;
use super::runtime::{ContainerRuntime, ContainerSpec, ExecOutput, JobSpec, LogLine};
use super::{random_suffix, sanitize_container_name};

/// Seconds the engine waits before killing a container on stop.
const STOP_TIMEOUT_SECS: i64 = 10;

/// [`ContainerRuntime`] implementation over the docker engine API.
///
/// The wrapped client is cheap to clone and safe for concurrent use; one
/// `DockerRuntime` serves every node in a test run.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the environment's default engine socket.
    pub fn connect() -> Result<Self, DockerError> {
        Ok(Self {
            docker: Docker::connect_with_local_defaults()?,
        })
    }

    /// Wrap an existing client handle.
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Treat gone/not-modified responses as success so teardown paths can run
    /// twice without erroring (stop on stopped = 304, remove on removed = 404).
    fn idempotent(result: Result<(), BollardError>) -> Result<(), DockerError> {
        match result {
            Ok(()) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 304 | 404 | 409,
                ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Wait for a container to exit and report its status code.
    async fn wait_for_exit(&self, name: &str) -> Result<i64, DockerError> {
        let mut wait = self
            .docker
            .wait_container(name, Some(WaitContainerOptions { condition: "not-running" }));
        match wait.next().await {
            Some(Ok(_)) | None => Ok(0),
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
        }
    }

    /// Collect the full (non-follow) log output of a stopped container,
    /// demultiplexed into stdout and stderr.
    async fn collect_output(&self, name: &str) -> Result<ExecOutput, DockerError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut logs = self.docker.logs(name, Some(options));
        let mut output = ExecOutput::default();
        while let Some(chunk) = logs.next().await {
            match chunk? {
                LogOutput::StdErr { message } => {
                    output.stderr.push_str(&String::from_utf8_lossy(&message));
                }
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    output.stdout.push_str(&String::from_utf8_lossy(&message));
                }
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(output)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn pull_image(&self, image: &str) -> Result<(), DockerError> {
        debug!("pulling image {image}");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress?;
        }
        Ok(())
    }

    async fn create_volume(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<String, DockerError> {
        let options = CreateVolumeOptions {
            name: name.to_string(),
            labels: labels.clone(),
            ..Default::default()
        };
        let volume = self.docker.create_volume(options).await?;
        Ok(volume.name)
    }

    async fn remove_volume(&self, name: &str) -> Result<(), DockerError> {
        Self::idempotent(
            self.docker
                .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
                .await,
        )
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<String, DockerError> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            labels: labels.clone(),
            ..Default::default()
        };
        self.docker.create_network(options).await?;
        Ok(name.to_string())
    }

    async fn remove_network(&self, id: &str) -> Result<(), DockerError> {
        Self::idempotent(self.docker.remove_network(id).await)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, DockerError> {
        let exposed: HashMap<String, HashMap<(), ()>> = spec
            .exposed_ports
            .iter()
            .map(|p| (p.clone(), HashMap::new()))
            .collect();
        let mounts: Vec<Mount> = spec
            .mounts
            .iter()
            .map(|m| Mount {
                source: Some(m.source.clone()),
                target: Some(m.target.clone()),
                typ: Some(MountTypeEnum::BIND),
                ..Default::default()
            })
            .collect();
        let host_config = HostConfig {
            binds: Some(spec.binds.clone()),
            mounts: if mounts.is_empty() { None } else { Some(mounts) },
            publish_all_ports: Some(true),
            network_mode: if spec.network_id.is_empty() {
                None
            } else {
                Some(spec.network_id.clone())
            },
            ..Default::default()
        };
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            hostname: if spec.hostname.is_empty() {
                None
            } else {
                Some(spec.hostname.clone())
            },
            exposed_ports: if exposed.is_empty() {
                None
            } else {
                Some(exposed)
            },
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let created = self.docker.create_container(Some(options), config).await?;
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<(), DockerError> {
        Self::idempotent(
            self.docker
                .stop_container(id, Some(StopContainerOptions { t: STOP_TIMEOUT_SECS }))
                .await,
        )
    }

    async fn remove_container(&self, id: &str) -> Result<(), DockerError> {
        Self::idempotent(
            self.docker
                .remove_container(
                    id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await,
        )
    }

    async fn resolve_host_ports(
        &self,
        id: &str,
        ports: &[String],
    ) -> Result<HashMap<String, String>, DockerError> {
        let inspect = self.docker.inspect_container(id, None).await?;
        let bindings = inspect
            .network_settings
            .and_then(|s| s.ports)
            .unwrap_or_default();
        let mut resolved = HashMap::new();
        for port in ports {
            let binding = bindings
                .get(port)
                .and_then(|b| b.as_ref())
                .and_then(|b| b.first())
                .and_then(|b| b.host_port.clone())
                .ok_or_else(|| DockerError::PortNotPublished {
                    name: id.to_string(),
                    port: port.clone(),
                })?;
            resolved.insert(port.clone(), format!("localhost:{binding}"));
        }
        Ok(resolved)
    }

    async fn run_job(&self, spec: &JobSpec) -> Result<ExecOutput, DockerError> {
        let name = format!(
            "{}-job-{}",
            sanitize_container_name(&spec.image.replace([':', '/'], "-")),
            random_suffix(8)
        );
        debug!("running one-shot job {} in {}: {:?}", name, spec.image, spec.cmd);

        let host_config = HostConfig {
            binds: Some(spec.binds.clone()),
            network_mode: spec.network_id.clone(),
            ..Default::default()
        };
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            user: spec.user.clone(),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };
        self.docker.create_container(Some(options), config).await?;

        // From here on the container must be removed no matter what happened.
        let result = async {
            self.docker
                .start_container(&name, None::<StartContainerOptions<String>>)
                .await?;
            let exit_code = self.wait_for_exit(&name).await?;
            let output = self.collect_output(&name).await?;
            Ok::<_, DockerError>((exit_code, output))
        }
        .await;
        self.remove_container(&name).await?;

        let (exit_code, output) = result?;
        if exit_code != 0 {
            return Err(DockerError::JobFailed {
                command: spec.cmd.join(" "),
                exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    async fn container_logs(
        &self,
        id: &str,
        follow: bool,
    ) -> Result<BoxStream<'static, Result<LogLine, DockerError>>, DockerError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow,
            ..Default::default()
        };
        let stream = self.docker.logs(id, Some(options)).filter_map(|chunk| async {
            match chunk {
                Ok(LogOutput::StdErr { message }) => Some(Ok(LogLine::Stderr(
                    String::from_utf8_lossy(&message).into_owned(),
                ))),
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => Some(
                    Ok(LogLine::Stdout(String::from_utf8_lossy(&message).into_owned())),
                ),
                Ok(LogOutput::StdIn { .. }) => None,
                Err(e) => Some(Err(e.into())),
            }
        });
        Ok(stream.boxed())
    }
}
