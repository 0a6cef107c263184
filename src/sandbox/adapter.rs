use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::language::LanguageProfile;

use super::{ContainerRuntime, ContainerSpec, ResourceLimits, RunOutcome, SandboxError};

/// Runs one command to completion inside a fresh execution unit
///
/// Every unit created here is removed before `run` returns, whether the
/// program finished, timed out, was cancelled, or a runtime call failed. If
/// the `run` future itself is dropped, the removal is handed to the async
/// runtime.
#[derive(Clone)]
pub struct SandboxAdapter {
    runtime: Arc<dyn ContainerRuntime>,
    mount_point: String,
}

impl SandboxAdapter {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, mount_point: impl Into<String>) -> Self {
        Self {
            runtime,
            mount_point: mount_point.into(),
        }
    }

    pub async fn run(
        &self,
        workspace: &Path,
        profile: &LanguageProfile,
        limits: &ResourceLimits,
        token: &CancellationToken,
    ) -> Result<RunOutcome, SandboxError> {
        let spec = ContainerSpec {
            image: profile.image.clone(),
            command: profile.render_command(),
            workspace: workspace.to_path_buf(),
            mount_point: self.mount_point.clone(),
            limits: limits.clone(),
        };

        log::debug!("Creating sandbox with image: {}", spec.image);
        let id = self
            .runtime
            .create(&spec)
            .await
            .map_err(SandboxError::Create)?;
        log::debug!("Sandbox created with ID: {id}");

        let guard = UnitGuard {
            runtime: Arc::clone(&self.runtime),
            id,
            released: false,
        };
        let outcome = self.drive(&guard.id, limits, token).await;
        guard.release().await;

        outcome
    }

    /// Start, bounded wait, forced kill on timeout, then output collection
    async fn drive(
        &self,
        id: &str,
        limits: &ResourceLimits,
        token: &CancellationToken,
    ) -> Result<RunOutcome, SandboxError> {
        self.runtime.start(id).await.map_err(SandboxError::Start)?;
        let started = Instant::now();
        log::debug!("Sandbox {id} started");

        let waited = tokio::select! {
            biased;
            _ = token.cancelled() => {
                log::debug!("Sandbox {id} cancelled, killing it");
                self.kill(id).await;
                return Err(SandboxError::Cancelled);
            }
            waited = tokio::time::timeout(limits.time_limit, self.runtime.wait(id)) => waited,
        };
        let exit_code = match waited {
            Ok(waited) => Some(waited.map_err(SandboxError::Wait)?),
            Err(_) => {
                log::debug!(
                    "Sandbox {id} exceeded {}ms, killing it",
                    limits.time_limit.as_millis()
                );
                self.kill(id).await;
                None
            }
        };
        let wall_time = started.elapsed();
        log::debug!(
            "Sandbox {id} finished with status code: {exit_code:?}, execution time: {}ms",
            wall_time.as_millis()
        );

        let mut output = self
            .runtime
            .logs(id, limits.output_bytes)
            .await
            .map_err(SandboxError::Logs)?;
        if output.len() > limits.output_bytes {
            output.truncate(limits.output_bytes);
        }

        Ok(RunOutcome {
            exit_code,
            output: String::from_utf8_lossy(&output).into_owned(),
            wall_time,
        })
    }

    // Removal is forced anyway, so a failed kill is not fatal
    async fn kill(&self, id: &str) {
        if let Err(e) = self.runtime.kill(id).await {
            log::warn!("Failed to kill sandbox {id}: {e:#}");
        }
    }
}

/// Owns a created unit until it has been removed
struct UnitGuard {
    runtime: Arc<dyn ContainerRuntime>,
    id: String,
    released: bool,
}

impl UnitGuard {
    async fn release(mut self) {
        if let Err(e) = self.runtime.remove(&self.id).await {
            log::warn!("Failed to remove sandbox {}: {e:#}", self.id);
        } else {
            log::debug!("Sandbox {} removed", self.id);
        }
        self.released = true;
    }
}

impl Drop for UnitGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let runtime = Arc::clone(&self.runtime);
        let id = std::mem::take(&mut self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                log::debug!("Sandbox {id} abandoned, scheduling removal");
                handle.spawn(async move {
                    if let Err(e) = runtime.remove(&id).await {
                        log::warn!("Failed to remove abandoned sandbox {id}: {e:#}");
                    }
                });
            }
            Err(_) => log::error!("Sandbox {id} leaked: no async runtime left to remove it"),
        }
    }
}
