use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, KillContainerOptions, LogsOptionsBuilder,
    RemoveContainerOptionsBuilder, StartContainerOptions, WaitContainerOptions,
};
use futures_util::StreamExt;

use super::{ContainerRuntime, OutputBuffer, RunOutput, RunSpec};
use crate::errors::SandboxError;

/// Mount point of the workspace inside the container.
const CONTAINER_WORKDIR: &str = "/sandbox";

/// Upper bound on processes inside one container.
const PIDS_LIMIT: i64 = 256;

/// Runs each script in a fresh Docker container: no network, capped memory
/// and CPU, all capabilities dropped. The container is force-removed after
/// every run.
pub struct DockerRuntime {
    docker: Docker,
    image: String,
}

impl DockerRuntime {
    pub fn connect(image: impl Into<String>) -> Result<Self, SandboxError> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| SandboxError::Connect(e.to_string()))?;
        Ok(Self {
            docker,
            image: image.into(),
        })
    }

    fn container_body(&self, spec: &RunSpec) -> ContainerCreateBody {
        let memory = i64::try_from(spec.limits.memory_bytes).unwrap_or(i64::MAX);
        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}:rw",
                spec.workspace.display(),
                CONTAINER_WORKDIR
            )]),
            memory: Some(memory),
            // Same as memory: no swap on top of the ceiling.
            memory_swap: Some(memory),
            nano_cpus: Some((spec.limits.cpus * 1_000_000_000.0) as i64),
            network_mode: Some("none".to_string()),
            pids_limit: Some(PIDS_LIMIT),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges:true".to_string()]),
            tmpfs: Some(HashMap::from([(
                "/tmp".to_string(),
                "size=256m".to_string(),
            )])),
            ..Default::default()
        };

        ContainerCreateBody {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                spec.script.clone(),
            ]),
            env: Some(vec!["HOME=/tmp".to_string()]),
            working_dir: Some(CONTAINER_WORKDIR.to_string()),
            network_disabled: Some(true),
            user: host_user(),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn wait_exit(&self, container_id: &str) -> Result<i64, SandboxError> {
        let mut stream = self
            .docker
            .wait_container(container_id, None::<WaitContainerOptions>);
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports nonzero exits as an error carrying the code.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(SandboxError::Runtime(e.to_string())),
            None => Err(SandboxError::Runtime(
                "container wait ended without an exit status".to_string(),
            )),
        }
    }

    /// Drain the log stream, keeping at most `max` bytes per stream.
    async fn collect_logs(
        &self,
        container_id: &str,
        max: usize,
    ) -> Result<(String, String), SandboxError> {
        let options = LogsOptionsBuilder::default().stdout(true).stderr(true).build();
        let mut stream = self.docker.logs(container_id, Some(options));
        let mut stdout = OutputBuffer::new(max);
        let mut stderr = OutputBuffer::new(max);
        while let Some(chunk) = stream.next().await {
            match chunk.map_err(|e| SandboxError::Runtime(e.to_string()))? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    stdout.push(&message)
                }
                LogOutput::StdErr { message } => stderr.push(&message),
                LogOutput::StdIn { .. } => {}
            }
        }
        if stdout.dropped() > 0 || stderr.dropped() > 0 {
            tracing::debug!(
                container_id,
                stdout_dropped = stdout.dropped(),
                stderr_dropped = stderr.dropped(),
                "Container output exceeded the cap"
            );
        }
        Ok((stdout.into_string(), stderr.into_string()))
    }

    async fn run_started(&self, spec: &RunSpec, container_id: &str) -> Result<RunOutput, SandboxError> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions>)
            .await
            .map_err(|e| SandboxError::Launch(format!("failed to start container: {}", e)))?;

        let exit_code = match tokio::time::timeout(spec.timeout, self.wait_exit(container_id)).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    task_id = %spec.task_id,
                    container_id,
                    timeout_secs = spec.timeout.as_secs(),
                    "Sandbox timed out, killing container"
                );
                if let Err(e) = self
                    .docker
                    .kill_container(container_id, None::<KillContainerOptions>)
                    .await
                {
                    tracing::warn!(task_id = %spec.task_id, error = %e, "Failed to kill container");
                }
                return Err(SandboxError::TimedOut {
                    secs: spec.timeout.as_secs(),
                });
            }
        };

        let (stdout, stderr) = self.collect_logs(container_id, spec.max_output_bytes).await?;
        Ok(RunOutput {
            exit_code,
            stdout,
            stderr,
        })
    }

    async fn remove(&self, spec: &RunSpec, container_id: &str) {
        let options = RemoveContainerOptionsBuilder::default().force(true).build();
        if let Err(e) = self
            .docker
            .remove_container(container_id, Some(options))
            .await
        {
            tracing::warn!(
                task_id = %spec.task_id,
                container_id,
                error = %e,
                "Failed to remove container (may require manual cleanup)"
            );
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn run(&self, spec: &RunSpec) -> Result<RunOutput, SandboxError> {
        let name = format!(
            "opendev-sandbox-{}-{}",
            container_safe(&spec.task_id),
            uuid::Uuid::new_v4().simple()
        );
        let options = CreateContainerOptionsBuilder::default().name(&name).build();

        let response = self
            .docker
            .create_container(Some(options), self.container_body(spec))
            .await
            .map_err(|e| SandboxError::Launch(e.to_string()))?;
        let container_id = response.id;
        tracing::debug!(task_id = %spec.task_id, container_id = %container_id, "Created sandbox container");

        let result = self.run_started(spec, &container_id).await;
        self.remove(spec, &container_id).await;
        result
    }
}

/// Run as the host user so files the code writes into the bind mount can be
/// removed afterwards.
#[cfg(unix)]
fn host_user() -> Option<String> {
    // SAFETY: getuid/getgid have no preconditions and cannot fail.
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
    Some(format!("{}:{}", uid, gid))
}

#[cfg(not(unix))]
fn host_user() -> Option<String> {
    None
}

fn container_safe(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(36)
        .collect()
}
