#![forbid(unsafe_code)]

mod interposer;

pub use interposer::{
    DEPTH_VAR, Environment, InterposeSettings, OUTFILE_VAR, PRELOAD_VAR, SHIFT_VAR,
    resolve_interposer,
};

use crate::error::Error;
use std::path::Path;
use std::process::ExitStatus;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// The monitored process.
#[derive(Debug)]
pub struct Subject {
    pid: u32,
    child: Child,
    status: Option<ExitStatus>,
}

impl Subject {
    /// Start `command` with exactly `env`, sending stdout and stderr to `output`.
    pub fn launch(command: &[String], env: &Environment, output: &Path) -> Result<Self, Error> {
        let joined = command.join(" ");
        let launch_failed = |source| Error::SubjectLaunchFailed {
            command: joined.clone(),
            source,
        };
        let (program, args) = command
            .split_first()
            .ok_or(Error::InvalidRunConfig("empty subject command"))?;

        let stdout = std::fs::File::create(output).map_err(launch_failed)?;
        let stderr = stdout.try_clone().map_err(launch_failed)?;

        let child = Command::new(program)
            .args(args)
            .env_clear()
            .envs(env.iter())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(launch_failed)?;
        let pid = child.id().ok_or_else(|| {
            launch_failed(std::io::Error::other("subject exited before its pid was read"))
        })?;

        info!(pid, command = %joined, "subject started");
        Ok(Self {
            pid,
            child,
            status: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Non-blocking liveness check.
    pub fn poll(&mut self) -> Result<bool, Error> {
        if self.status.is_some() {
            return Ok(false);
        }
        match self.child.try_wait()? {
            Some(status) => {
                self.record_exit(status);
                Ok(false)
            }
            None => Ok(true),
        }
    }

    /// Wait until the subject exits. Cancel safe.
    pub async fn wait(&mut self) -> Result<ExitStatus, Error> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.child.wait().await?;
        self.record_exit(status);
        Ok(status)
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Kill the subject. Used when it cannot be placed into its cgroups.
    pub async fn kill(&mut self) {
        if self.status.is_some() {
            return;
        }
        if let Err(err) = self.child.kill().await {
            warn!(pid = self.pid, %err, "failed to kill subject");
        }
    }

    fn record_exit(&mut self, status: ExitStatus) {
        debug!(pid = self.pid, ?status, "subject exited");
        self.status = Some(status);
    }
}
