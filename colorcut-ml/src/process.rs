//! Managed child-process execution for sweep invocations.

use crate::error::MlError;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// How a finished child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramExit {
    pub success: bool,
    /// `None` when the child was killed by a signal.
    pub code: Option<i32>,
    pub duration: Duration,
}

/// Runs one program with a fixed argument prefix, one child at a time.
#[derive(Debug, Clone)]
pub struct ProgramRunner {
    program: PathBuf,
    base_args: Vec<String>,
    workspace: Option<PathBuf>,
    timeout: Duration,
}

impl ProgramRunner {
    pub fn new(program: PathBuf, base_args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program,
            base_args,
            workspace: None,
            timeout,
        }
    }

    pub fn with_workspace(mut self, workspace: PathBuf) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The full command line, for logs and reports.
    pub fn command_line(&self, args: &[String]) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.base_args.iter().cloned())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the program with `args` appended, inheriting stdio, and wait for it.
    pub async fn run(&self, args: &[String]) -> Result<ProgramExit, MlError> {
        let command_line = self.command_line(args);
        debug!(command = %command_line, "Spawning child process");

        let mut command = Command::new(&self.program);
        command.args(&self.base_args).args(args).kill_on_drop(true);
        if let Some(dir) = &self.workspace {
            command.current_dir(dir);
        }

        let started = Instant::now();
        let status = tokio::time::timeout(self.timeout, command.status())
            .await
            .map_err(|_| {
                MlError::Timeout(format!(
                    "`{command_line}` did not finish within {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                MlError::sweep(format!("failed to spawn `{command_line}`: {e}"))
            })?;

        Ok(ProgramExit {
            success: status.success(),
            code: status.code(),
            duration: started.elapsed(),
        })
    }
}
