use std::collections::HashMap;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{ContainerRuntime, ContainerSpec};

// How long output readers may keep draining pipes after the program ends
const READER_GRACE: Duration = Duration::from_secs(1);

struct LocalUnit {
    spec: ContainerSpec,
    child: Option<Child>,
    /// Also the process group id, every unit leads its own group
    pid: Option<i32>,
    exit_code: Option<i64>,
    output: Arc<Mutex<Vec<u8>>>,
    readers: Vec<JoinHandle<()>>,
}

/// Runs each unit as a plain child process in the workspace directory
///
/// Only the wall-clock limit and an address-space ceiling are enforced; there
/// is no filesystem, network, or CPU-share isolation. Meant for development
/// machines without a container engine.
#[derive(Default)]
pub struct LocalRuntime {
    units: Mutex<HashMap<String, LocalUnit>>,
}

impl LocalRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of units created and not yet removed
    pub fn live_units(&self) -> usize {
        self.units.lock().len()
    }

    fn spawn(
        spec: &ContainerSpec,
        output: &Arc<Mutex<Vec<u8>>>,
    ) -> Result<(Child, Vec<JoinHandle<()>>)> {
        let (program, args) = spec
            .command
            .split_first()
            .ok_or_else(|| anyhow!("Empty command"))?;

        let memory_bytes = spec.limits.memory_bytes;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&spec.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);
        // SAFETY: only calls setrlimit, which is async-signal-safe
        unsafe {
            cmd.pre_exec(move || limit_address_space(memory_bytes));
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {program}"))?;

        let limit = spec.limits.output_bytes;
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(capture(stdout, Arc::clone(output), limit)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(capture(stderr, Arc::clone(output), limit)));
        }

        Ok((child, readers))
    }
}

#[async_trait]
impl ContainerRuntime for LocalRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        if spec.command.is_empty() {
            bail!("Empty command");
        }
        if !spec.workspace.is_dir() {
            bail!("Workspace {} does not exist", spec.workspace.display());
        }

        let id = format!("local-{}", Uuid::new_v4());
        self.units.lock().insert(
            id.clone(),
            LocalUnit {
                spec: spec.clone(),
                child: None,
                pid: None,
                exit_code: None,
                output: Arc::new(Mutex::new(Vec::new())),
                readers: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        let mut units = self.units.lock();
        let unit = units.get_mut(id).ok_or_else(|| anyhow!("No such unit: {id}"))?;
        if unit.pid.is_some() {
            bail!("Unit {id} already started");
        }

        let (child, readers) = Self::spawn(&unit.spec, &unit.output)?;
        unit.pid = child.id().map(|pid| pid as i32);
        unit.child = Some(child);
        unit.readers = readers;
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        let (child, pid) = {
            let mut units = self.units.lock();
            let unit = units.get_mut(id).ok_or_else(|| anyhow!("No such unit: {id}"))?;
            if let Some(code) = unit.exit_code {
                return Ok(code);
            }
            let child = unit
                .child
                .take()
                .ok_or_else(|| anyhow!("Unit {id} is not running"))?;
            (child, unit.pid)
        };

        let mut waiting = Waiting {
            units: &self.units,
            id,
            child: Some(child),
        };
        let status = waiting.wait().await?;
        // Shell convention for signal deaths
        let code = status
            .code()
            .map(i64::from)
            .or_else(|| status.signal().map(|s| 128 + i64::from(s)))
            .unwrap_or(-1);

        if let Some(unit) = self.units.lock().get_mut(id) {
            unit.exit_code = Some(code);
        }
        // Background processes the program left behind still hold the group id
        if let Some(pid) = pid {
            if let Err(e) = kill_group(pid) {
                log::warn!("Failed to kill leftover processes of unit {id}: {e}");
            }
        }
        Ok(code)
    }

    async fn kill(&self, id: &str) -> Result<()> {
        let (pid, exit_code) = {
            let units = self.units.lock();
            let unit = units.get(id).ok_or_else(|| anyhow!("No such unit: {id}"))?;
            (unit.pid, unit.exit_code)
        };

        match (pid, exit_code) {
            // Already reaped, the group id may belong to someone else by now
            (Some(_), Some(_)) => Ok(()),
            (Some(pid), None) => Ok(kill_group(pid)?),
            (None, _) => bail!("Unit {id} was never started"),
        }
    }

    async fn logs(&self, id: &str, limit: usize) -> Result<Vec<u8>> {
        let (readers, output) = {
            let mut units = self.units.lock();
            let unit = units.get_mut(id).ok_or_else(|| anyhow!("No such unit: {id}"))?;
            (std::mem::take(&mut unit.readers), Arc::clone(&unit.output))
        };

        for reader in readers {
            let abort = reader.abort_handle();
            if tokio::time::timeout(READER_GRACE, reader).await.is_err() {
                log::warn!("Output of unit {id} still open after the program ended");
                abort.abort();
            }
        }

        let output = output.lock();
        Ok(output[..output.len().min(limit)].to_vec())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let unit = self
            .units
            .lock()
            .remove(id)
            .ok_or_else(|| anyhow!("No such unit: {id}"))?;

        for reader in &unit.readers {
            reader.abort();
        }
        // An unreaped child keeps its pid, so the group is still ours
        if let (Some(pid), None) = (unit.pid, unit.exit_code) {
            kill_group(pid)?;
        }
        Ok(())
    }
}

/// Hands the child back to its unit if `wait` is abandoned before it is reaped
struct Waiting<'a> {
    units: &'a Mutex<HashMap<String, LocalUnit>>,
    id: &'a str,
    child: Option<Child>,
}

impl Waiting<'_> {
    async fn wait(&mut self) -> io::Result<ExitStatus> {
        let status = match self.child.as_mut() {
            Some(child) => child.wait().await?,
            None => return Err(io::Error::other("child already reaped")),
        };
        self.child = None;
        Ok(status)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        let Some(child) = self.child.take() else {
            return;
        };
        if let Some(unit) = self.units.lock().get_mut(self.id) {
            unit.child = Some(child);
        }
    }
}

/// Drains `stream` to the end, keeping at most `limit` bytes in `output`
async fn capture(mut stream: impl AsyncRead + Unpin, output: Arc<Mutex<Vec<u8>>>, limit: usize) {
    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let mut output = output.lock();
                let room = limit.saturating_sub(output.len());
                output.extend_from_slice(&buf[..n.min(room)]);
            }
            Err(e) => {
                log::warn!("Failed to read program output: {e}");
                break;
            }
        }
    }
}

fn limit_address_space(bytes: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: bytes as libc::rlim_t,
        rlim_max: bytes as libc::rlim_t,
    };
    if unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// SIGKILLs a whole process group; a group that is already gone is fine
fn kill_group(pgid: i32) -> io::Result<()> {
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}
