mod adapter;
mod docker_runtime;
mod local_runtime;
mod workspace;

pub use adapter::SandboxAdapter;
pub use docker_runtime::DockerRuntime;
pub use local_runtime::LocalRuntime;
pub use workspace::{Workspace, WorkspaceManager};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{Backend, RuntimeConfig};

/// Hard ceilings applied to every sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    pub time_limit: Duration,
    pub memory_bytes: u64,
    /// Share of one core, in percent
    pub cpu_percent: u32,
    pub pids_limit: Option<u32>,
    /// Captured output beyond this many bytes is discarded
    pub output_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(5),
            memory_bytes: 256 * 1024 * 1024,
            cpu_percent: 50,
            pids_limit: Some(64),
            output_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Everything a runtime needs to create one execution unit
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub command: Vec<String>,
    /// Host directory bound read/write at `mount_point`, also the working directory
    pub workspace: PathBuf,
    pub mount_point: String,
    pub limits: ResourceLimits,
}

/// Result of one sandbox run. `exit_code` is `None` when the time limit hit.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub exit_code: Option<i64>,
    pub output: String,
    pub wall_time: Duration,
}

impl RunOutcome {
    pub fn wall_time_ms(&self) -> u64 {
        self.wall_time.as_millis() as u64
    }
}

/// Failure of the execution substrate itself, as opposed to a failure of
/// the program running inside it
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Failed to create sandbox: {0:#}")]
    Create(anyhow::Error),
    #[error("Failed to start sandbox: {0:#}")]
    Start(anyhow::Error),
    #[error("Failed to await sandbox: {0:#}")]
    Wait(anyhow::Error),
    #[error("Failed to collect sandbox output: {0:#}")]
    Logs(anyhow::Error),
    #[error("Sandbox run cancelled")]
    Cancelled,
}

/// Operations of an isolation substrate able to run one command per unit
///
/// Units are keyed by the id returned from `create`. `wait` may block
/// forever; bounding it is the caller's job. `remove` must also stop a unit
/// that is still running.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, id: &str) -> Result<()>;

    /// Blocks until the unit terminates and returns its exit code
    async fn wait(&self, id: &str) -> Result<i64>;

    async fn kill(&self, id: &str) -> Result<()>;

    /// Combined standard output and standard error, at most `limit` bytes
    async fn logs(&self, id: &str, limit: usize) -> Result<Vec<u8>>;

    async fn remove(&self, id: &str) -> Result<()>;
}

/// Creates the runtime named by the configuration
///
/// The Docker backend only connects lazily, so a missing daemon surfaces as
/// a `SandboxError::Create` on the first submission rather than here.
pub fn create_container_runtime(config: &RuntimeConfig) -> Result<Arc<dyn ContainerRuntime>> {
    match config.backend {
        Backend::Docker => {
            log::info!("Creating Docker runtime");
            Ok(Arc::new(DockerRuntime::connect()?))
        }
        Backend::Local => {
            log::info!("Creating local process runtime");
            log::warn!(
                "The local runtime provides NO container isolation - use only in trusted environments"
            );
            Ok(Arc::new(LocalRuntime::new()))
        }
    }
}
