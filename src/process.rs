//! Subprocess plumbing
//!
//! The supervisor drives four external tools (the Consul agent, mysqld,
//! xtrabackup and the `mc` object-store CLI) plus tar and chown. Short
//! tools run to completion with a checked exit status; long-lived
//! collaborators are launched detached and polled for liveness from the
//! control loop.

use std::ffi::OsStr;
use std::process::ExitStatus;

use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Failed { program: String, status: ExitStatus },

    #[error("waiting on {program} failed: {source}")]
    Wait {
        program: String,
        source: std::io::Error,
    },
}

/// Run a command to completion; non-zero exit is an error.
pub async fn run<I, S>(program: &str, args: I) -> Result<(), ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    debug!(program, "running command");
    let status = Command::new(program)
        .args(args)
        .status()
        .await
        .map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !status.success() {
        return Err(ProcessError::Failed {
            program: program.to_string(),
            status,
        });
    }

    Ok(())
}

/// Run a command to completion and capture its stdout.
pub async fn output<I, S>(program: &str, args: I) -> Result<String, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    debug!(program, "running command for output");
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(ProcessError::Failed {
            program: program.to_string(),
            status: output.status,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Launch a long-running child process.
///
/// The child is not killed when the handle is dropped; it outlives any
/// single operation and is observed via [`Supervised`].
pub fn spawn<I, S>(program: &str, args: I) -> Result<Child, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(program)
        .args(args)
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })
}

/// A long-lived child process watched by the control loop.
pub struct Supervised {
    name: &'static str,
    child: Child,
    exited: bool,
}

impl Supervised {
    pub fn new(name: &'static str, child: Child) -> Self {
        Self {
            name,
            child,
            exited: false,
        }
    }

    /// Check liveness without blocking; an exit is logged exactly once.
    pub fn poll(&mut self) {
        if self.exited {
            return;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                warn!(process = self.name, %status, "supervised process exited");
                self.exited = true;
            }
            Ok(None) => {}
            Err(error) => {
                warn!(process = self.name, %error, "liveness check failed");
            }
        }
    }

    pub fn has_exited(&self) -> bool {
        self.exited
    }
}

#[cfg(test)]
#[path = "process_test.rs"]
mod tests;
