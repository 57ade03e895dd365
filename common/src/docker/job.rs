//! One-shot exec jobs.
//!
//! A [`JobRunner`] binds an image, network and volume binds once and then
//! runs arbitrary commands in ephemeral containers. Running CLI tooling this
//! way keeps it independent of the long-lived node container, which is not
//! always exec-attachable after start.

use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

use super::error::DockerError;
use super::runtime::{ContainerRuntime, ExecOutput, JobSpec};
use super::cleanup_labels;

/// Runs one-shot commands against a fixed image/network/bind context.
#[derive(Clone)]
pub struct JobRunner {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
    network_id: String,
    binds: Vec<String>,
    labels: HashMap<String, String>,
}

impl JobRunner {
    /// Bind the execution context. `binds` normally carries the node's
    /// volume so the tool sees the node's home directory and keystores.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        image: impl Into<String>,
        network_id: impl Into<String>,
        test_name: &str,
        binds: Vec<String>,
    ) -> Self {
        Self {
            runtime,
            image: image.into(),
            network_id: network_id.into(),
            binds,
            labels: cleanup_labels(test_name),
        }
    }

    /// Run a command to completion and capture its output. A non-zero exit
    /// status surfaces as [`DockerError::JobFailed`].
    pub async fn run(&self, cmd: Vec<String>, env: Vec<String>) -> Result<ExecOutput, DockerError> {
        debug!("exec job in {}: {:?}", self.image, cmd);
        let spec = JobSpec {
            image: self.image.clone(),
            cmd,
            env,
            binds: self.binds.clone(),
            network_id: if self.network_id.is_empty() {
                None
            } else {
                Some(self.network_id.clone())
            },
            user: None,
            labels: self.labels.clone(),
        };
        self.runtime.run_job(&spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::mock::MockRuntime;

    #[tokio::test]
    async fn run_forwards_command_and_context() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.set_job_handler(|spec| {
            assert_eq!(spec.image, "example/tools:1.0");
            assert_eq!(spec.binds, vec!["vol:/home/node".to_string()]);
            assert_eq!(spec.network_id.as_deref(), Some("net-1"));
            Ok(ExecOutput {
                stdout: "42\n".to_string(),
                stderr: String::new(),
            })
        });

        let runner = JobRunner::new(
            runtime,
            "example/tools:1.0",
            "net-1",
            "job_test",
            vec!["vol:/home/node".to_string()],
        );
        let out = runner
            .run(vec!["echo".to_string(), "42".to_string()], vec![])
            .await
            .unwrap();
        assert_eq!(out.stdout_trimmed(), "42");
    }

    #[tokio::test]
    async fn job_failures_carry_stderr() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.set_job_handler(|spec| {
            Err(DockerError::JobFailed {
                command: spec.cmd.join(" "),
                exit_code: 1,
                stderr: "boom".to_string(),
            })
        });
        let runner = JobRunner::new(runtime, "example/tools:1.0", "", "job_test", vec![]);
        let err = runner.run(vec!["false".to_string()], vec![]).await.unwrap_err();
        assert!(matches!(err, DockerError::JobFailed { exit_code: 1, .. }));
    }
}
