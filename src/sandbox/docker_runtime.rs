use std::pin::pin;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::models::HostConfig;
use futures_util::StreamExt;

use super::{ContainerRuntime, ContainerSpec};

// CFS period in microseconds; the quota is a fraction of it
const CPU_PERIOD: i64 = 100_000;

/// Containers driven through the Docker Engine API
///
/// The client is cheap to clone and safe to share between workers.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self { docker })
    }

    fn container_config(spec: &ContainerSpec) -> Config<String> {
        let limits = &spec.limits;
        let memory = limits.memory_bytes as i64;

        Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            working_dir: Some(spec.mount_point.clone()),
            network_disabled: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(HostConfig {
                binds: Some(vec![format!(
                    "{}:{}:rw",
                    spec.workspace.display(),
                    spec.mount_point
                )]),
                memory: Some(memory),
                memory_swap: Some(memory),
                cpu_period: Some(CPU_PERIOD),
                cpu_quota: Some(CPU_PERIOD * limits.cpu_percent as i64 / 100),
                pids_limit: limits.pids_limit.map(i64::from),
                network_mode: Some("none".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let response = self
            .docker
            .create_container(
                None::<CreateContainerOptions<String>>,
                Self::container_config(spec),
            )
            .await
            .with_context(|| format!("Docker refused to create a container from {}", spec.image))?;

        for warning in &response.warnings {
            log::warn!("Docker warning for container {}: {warning}", response.id);
        }
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        let mut stream = pin!(self.docker.wait_container(
            id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        ));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports any non-zero exit as an error
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => bail!("Wait stream of container {id} ended without a status"),
        }
    }

    async fn kill(&self, id: &str) -> Result<()> {
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn logs(&self, id: &str, limit: usize) -> Result<Vec<u8>> {
        let mut stream = pin!(self.docker.logs(
            id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                tail: "all".to_string(),
                ..Default::default()
            }),
        ));

        let mut output = Vec::new();
        while let Some(frame) = stream.next().await {
            let frame = frame?.into_bytes();
            let room = limit - output.len();
            if frame.len() >= room {
                output.extend_from_slice(&frame[..room]);
                log::debug!("Output of container {id} truncated at {limit} bytes");
                break;
            }
            output.extend_from_slice(&frame);
        }
        Ok(output)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }
}
