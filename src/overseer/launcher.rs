//! Starting a detached overseer worker.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

/// Starts a worker for a project once the caller has been granted the lock.
///
/// Must return without waiting for the worker: the hook that calls it is on the host's
/// critical path.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, project: &Path, token: &str) -> Result<()>;
}

/// Re-executes the current binary as `skills daemon run` in its own process group, with all
/// standard streams detached.
pub struct ProcessLauncher {
    exe: PathBuf,
}

impl ProcessLauncher {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }

    pub fn current() -> Result<Self> {
        let exe = std::env::current_exe().context("failed to get current executable path")?;
        Ok(Self::new(exe))
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, project: &Path, token: &str) -> Result<()> {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("daemon")
            .arg("run")
            .arg("--project")
            .arg(project)
            .arg("--token")
            .arg(token)
            .current_dir(project)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Survive the host killing the hook's process group
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn overseer for {}", project.display()))?;

        tracing::info!(project = %project.display(), pid = child.id(), "overseer launched");
        Ok(())
    }
}
